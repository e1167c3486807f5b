use super::{ClusterInfo, DataStoreInfo, ResourceDescriber, SecretData, SecretStore};
use crate::error::{Result, RolloutError};
use crate::tool_runner::{CommandOutput, CommandRunner, CommandSpec};
use crate::types::Endpoint;
use serde::de::DeserializeOwned;
use serde::Deserialize;

const NOT_FOUND: &str = "ResourceNotFoundException";

fn aws(region: &str, service: &str, operation: &str) -> CommandSpec {
    CommandSpec::new("aws")
        .args([service, operation])
        .args(["--region", region, "--output", "json"])
}

fn parse<T: DeserializeOwned>(spec: &CommandSpec, out: &CommandOutput) -> Result<T> {
    serde_json::from_str(&out.stdout).map_err(|e| RolloutError::UnexpectedOutput {
        command: spec.display(),
        reason: e.to_string(),
    })
}

fn is_not_found(out: &CommandOutput) -> bool {
    !out.success() && out.stderr.contains(NOT_FOUND)
}

// ---------------------------------------------------------------------------
// AwsDescriber
// ---------------------------------------------------------------------------

/// Read-only describe calls against EKS, RDS, and ElastiCache.
pub struct AwsDescriber<'r> {
    runner: &'r dyn CommandRunner,
    region: String,
}

impl<'r> AwsDescriber<'r> {
    pub fn new(runner: &'r dyn CommandRunner, region: impl Into<String>) -> Self {
        Self {
            runner,
            region: region.into(),
        }
    }

    /// The account the CLI is authenticated against. Any failure here means
    /// the cloud cannot be reached at all.
    pub fn caller_identity(&self) -> Result<String> {
        let spec = aws(&self.region, "sts", "get-caller-identity");
        let out = self.runner.run(&spec)?;
        if !out.success() {
            return Err(RolloutError::Environment(format!(
                "cannot reach the cloud account (`{}`): {}",
                spec.display(),
                out.stderr.trim()
            )));
        }
        Ok(parse::<CallerIdentity>(&spec, &out)?.arn)
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CallerIdentity {
    arn: String,
}

#[derive(Deserialize)]
struct ListClusters {
    #[serde(default)]
    clusters: Vec<String>,
}

#[derive(Deserialize)]
struct DescribeCluster {
    cluster: ClusterJson,
}

#[derive(Deserialize)]
struct ClusterJson {
    name: String,
    status: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AddressJson {
    address: String,
    port: u16,
}

impl From<AddressJson> for Endpoint {
    fn from(a: AddressJson) -> Self {
        Endpoint::new(a.address, a.port)
    }
}

#[derive(Deserialize)]
struct DbInstances {
    #[serde(rename = "DBInstances", default)]
    instances: Vec<DbInstance>,
}

#[derive(Deserialize)]
struct DbInstance {
    #[serde(rename = "DBInstanceIdentifier")]
    id: String,
    #[serde(rename = "DBInstanceStatus")]
    status: String,
    #[serde(rename = "Endpoint")]
    endpoint: Option<AddressJson>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CacheClusters {
    #[serde(default)]
    cache_clusters: Vec<CacheCluster>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CacheCluster {
    cache_cluster_id: String,
    cache_cluster_status: String,
    #[serde(default)]
    cache_nodes: Vec<CacheNode>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CacheNode {
    endpoint: Option<AddressJson>,
}

impl ResourceDescriber for AwsDescriber<'_> {
    fn list_clusters(&self) -> Result<Vec<String>> {
        let spec = aws(&self.region, "eks", "list-clusters");
        let out = self.runner.run_checked(&spec)?;
        Ok(parse::<ListClusters>(&spec, &out)?.clusters)
    }

    fn describe_cluster(&self, name: &str) -> Result<Option<ClusterInfo>> {
        let spec = aws(&self.region, "eks", "describe-cluster").args(["--name", name]);
        let out = self.runner.run(&spec)?;
        if is_not_found(&out) {
            return Ok(None);
        }
        let out = out.check(&spec)?;
        let c = parse::<DescribeCluster>(&spec, &out)?.cluster;
        Ok(Some(ClusterInfo {
            name: c.name,
            status: c.status,
        }))
    }

    fn databases(&self) -> Result<Vec<DataStoreInfo>> {
        let spec = aws(&self.region, "rds", "describe-db-instances");
        let out = self.runner.run_checked(&spec)?;
        Ok(parse::<DbInstances>(&spec, &out)?
            .instances
            .into_iter()
            .map(|db| DataStoreInfo {
                id: db.id,
                status: db.status,
                endpoint: db.endpoint.map(Endpoint::from),
            })
            .collect())
    }

    fn caches(&self) -> Result<Vec<DataStoreInfo>> {
        let spec = aws(&self.region, "elasticache", "describe-cache-clusters")
            .arg("--show-cache-node-info");
        let out = self.runner.run_checked(&spec)?;
        Ok(parse::<CacheClusters>(&spec, &out)?
            .cache_clusters
            .into_iter()
            .map(|c| DataStoreInfo {
                id: c.cache_cluster_id,
                status: c.cache_cluster_status,
                endpoint: c
                    .cache_nodes
                    .into_iter()
                    .find_map(|n| n.endpoint)
                    .map(Endpoint::from),
            })
            .collect())
    }
}

// ---------------------------------------------------------------------------
// AwsSecretStore
// ---------------------------------------------------------------------------

/// Secrets Manager documents holding a flat JSON object of strings.
pub struct AwsSecretStore<'r> {
    runner: &'r dyn CommandRunner,
    region: String,
}

impl<'r> AwsSecretStore<'r> {
    pub fn new(runner: &'r dyn CommandRunner, region: impl Into<String>) -> Self {
        Self {
            runner,
            region: region.into(),
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SecretValue {
    secret_string: Option<String>,
}

/// Secret documents may carry numbers (ports) as JSON numbers.
fn flatten(doc: serde_json::Map<String, serde_json::Value>) -> SecretData {
    doc.into_iter()
        .filter_map(|(k, v)| match v {
            serde_json::Value::String(s) => Some((k, s)),
            serde_json::Value::Number(n) => Some((k, n.to_string())),
            serde_json::Value::Bool(b) => Some((k, b.to_string())),
            _ => None,
        })
        .collect()
}

impl SecretStore for AwsSecretStore<'_> {
    fn get(&self, id: &str) -> Result<Option<SecretData>> {
        let spec = aws(&self.region, "secretsmanager", "get-secret-value").args(["--secret-id", id]);
        let out = self.runner.run(&spec)?;
        if is_not_found(&out) {
            return Ok(None);
        }
        let out = out.check(&spec)?;
        let value: SecretValue = parse(&spec, &out)?;
        let Some(text) = value.secret_string else {
            return Ok(None);
        };
        let doc: serde_json::Map<String, serde_json::Value> =
            serde_json::from_str(&text).map_err(|e| RolloutError::UnexpectedOutput {
                command: spec.display(),
                reason: format!("secret '{id}' is not a JSON object: {e}"),
            })?;
        Ok(Some(flatten(doc)))
    }

    fn put(&self, id: &str, values: &SecretData) -> Result<()> {
        let secret_string = serde_json::to_string(values)?;
        let input = serde_json::json!({ "SecretId": id, "SecretString": secret_string });
        let spec = aws(&self.region, "secretsmanager", "put-secret-value")
            .args(["--cli-input-json", "file:///dev/stdin"])
            .stdin(input.to_string());
        let out = self.runner.run(&spec)?;
        if !is_not_found(&out) {
            out.check(&spec)?;
            return Ok(());
        }

        let input = serde_json::json!({ "Name": id, "SecretString": secret_string });
        let spec = aws(&self.region, "secretsmanager", "create-secret")
            .args(["--cli-input-json", "file:///dev/stdin"])
            .stdin(input.to_string());
        self.runner.run_checked(&spec)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool_runner::scripted::ScriptedRunner;

    #[test]
    fn caller_identity_failure_is_environment_error() {
        let runner = ScriptedRunner::default().reply(255, "Unable to locate credentials");
        let aws = AwsDescriber::new(&runner, "us-east-1");
        let err = aws.caller_identity().unwrap_err();
        assert!(matches!(err, RolloutError::Environment(ref m) if m.contains("Unable to locate credentials")));

        let runner = ScriptedRunner::default().reply(
            0,
            r#"{"UserId":"AIDA","Account":"123456789012","Arn":"arn:aws:iam::123456789012:user/ci"}"#,
        );
        let aws = AwsDescriber::new(&runner, "us-east-1");
        assert_eq!(aws.caller_identity().unwrap(), "arn:aws:iam::123456789012:user/ci");
    }

    #[test]
    fn describe_missing_cluster_is_none() {
        let runner = ScriptedRunner::default().reply(
            254,
            "An error occurred (ResourceNotFoundException) when calling DescribeCluster",
        );
        let aws = AwsDescriber::new(&runner, "us-east-1");
        assert_eq!(aws.describe_cluster("shop").unwrap(), None);
    }

    #[test]
    fn describe_cluster_parses_status() {
        let runner = ScriptedRunner::default()
            .reply(0, r#"{"cluster":{"name":"shop-eks","status":"ACTIVE","version":"1.29"}}"#);
        let aws = AwsDescriber::new(&runner, "eu-west-1");
        let info = aws.describe_cluster("shop-eks").unwrap().unwrap();
        assert!(info.is_active());
        assert!(runner.lines()[0].contains("--region eu-west-1"));
    }

    #[test]
    fn databases_parse_endpoint() {
        let runner = ScriptedRunner::default().reply(
            0,
            r#"{"DBInstances":[{"DBInstanceIdentifier":"shop-db","DBInstanceStatus":"available",
                "Endpoint":{"Address":"shop-db.abc.rds.amazonaws.com","Port":5432}}]}"#,
        );
        let aws = AwsDescriber::new(&runner, "us-east-1");
        let dbs = aws.databases().unwrap();
        assert_eq!(dbs.len(), 1);
        assert_eq!(
            dbs[0].endpoint,
            Some(Endpoint::new("shop-db.abc.rds.amazonaws.com", 5432))
        );
    }

    #[test]
    fn cache_without_nodes_has_no_endpoint() {
        let runner = ScriptedRunner::default().reply(
            0,
            r#"{"CacheClusters":[{"CacheClusterId":"shop-cache","CacheClusterStatus":"creating"}]}"#,
        );
        let aws = AwsDescriber::new(&runner, "us-east-1");
        let caches = aws.caches().unwrap();
        assert_eq!(caches[0].status, "creating");
        assert_eq!(caches[0].endpoint, None);
    }

    #[test]
    fn secret_get_flattens_numbers() {
        let runner = ScriptedRunner::default().reply(
            0,
            r#"{"Name":"shop/runtime","SecretString":"{\"username\":\"app\",\"port\":5432}"}"#,
        );
        let store = AwsSecretStore::new(&runner, "us-east-1");
        let data = store.get("shop/runtime").unwrap().unwrap();
        assert_eq!(data["username"], "app");
        assert_eq!(data["port"], "5432");
    }

    #[test]
    fn secret_get_missing_is_none() {
        let runner = ScriptedRunner::default().reply(255, "ResourceNotFoundException");
        let store = AwsSecretStore::new(&runner, "us-east-1");
        assert!(store.get("shop/runtime").unwrap().is_none());
    }

    #[test]
    fn secret_put_creates_when_missing_and_keeps_values_off_argv() {
        let runner = ScriptedRunner::default()
            .reply(255, "ResourceNotFoundException")
            .reply(0, "{}");
        let store = AwsSecretStore::new(&runner, "us-east-1");
        let mut values = SecretData::new();
        values.insert("jwt_secret".into(), "s3cr3t".into());
        store.put("shop/runtime", &values).unwrap();

        let seen = runner.seen.borrow();
        assert_eq!(seen.len(), 2);
        assert!(seen[1].args.contains(&"create-secret".to_string()));
        assert!(seen.iter().all(|s| !s.display().contains("s3cr3t")));
        assert!(seen[1].stdin.as_deref().unwrap().contains("s3cr3t"));
    }
}
