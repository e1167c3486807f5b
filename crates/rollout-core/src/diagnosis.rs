//! Ranked likely causes for a workload that will not become ready.

use crate::clients::PodSignal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Restarts after which a crash loop is treated as terminal.
pub const CRASH_RESTART_THRESHOLD: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cause {
    MissingArtifact,
    RegistryAuth,
    ResourceStarvation,
    ApplicationCrash,
    Misconfiguration,
}

impl fmt::Display for Cause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Cause::MissingArtifact => "artifact missing from registry",
            Cause::RegistryAuth => "registry authentication failure",
            Cause::ResourceStarvation => "insufficient cluster resources",
            Cause::ApplicationCrash => "application crashes on startup",
            Cause::Misconfiguration => "container configuration error",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankedCause {
    pub cause: Cause,
    pub evidence: String,
    pub remediation: Vec<String>,
    #[serde(skip)]
    score: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnosis {
    pub summary: String,
    /// Most likely first.
    pub causes: Vec<RankedCause>,
    /// Commands an operator can run to look further.
    pub inspect: Vec<String>,
}

struct Context<'a> {
    namespace: &'a str,
    workload: &'a str,
    image: &'a str,
}

fn remediation(cause: Cause, ctx: &Context) -> Vec<String> {
    match cause {
        Cause::MissingArtifact => vec![
            format!("verify the image exists: docker manifest inspect {}", ctx.image),
            "re-run without --skip-artifacts to publish it".to_string(),
        ],
        Cause::RegistryAuth => vec![
            "check the node role can pull from the registry (ecr:GetAuthorizationToken, ecr:BatchGetImage)"
                .to_string(),
            format!(
                "kubectl get events -n {} --field-selector reason=Failed",
                ctx.namespace
            ),
        ],
        Cause::ResourceStarvation => vec![
            "kubectl describe nodes | grep -A5 'Allocated resources'".to_string(),
            "scale the node group or lower the workload's resource requests".to_string(),
        ],
        Cause::ApplicationCrash => vec![
            format!(
                "kubectl logs -n {} deployment/{} --previous --tail=100",
                ctx.namespace, ctx.workload
            ),
            "check the credentials secret holds the values the service expects".to_string(),
        ],
        Cause::Misconfiguration => vec![format!(
            "kubectl describe pods -n {} -l app={}",
            ctx.namespace, ctx.workload
        )],
    }
}

/// Scores per cause for one signal. Higher is more likely.
fn classify(signal: &PodSignal) -> Vec<(Cause, u32)> {
    let message = signal.message.as_deref().unwrap_or("").to_ascii_lowercase();
    match signal.reason.as_str() {
        "ErrImagePull" | "ImagePullBackOff" => {
            if ["unauthorized", "denied", "no basic auth", "forbidden"]
                .iter()
                .any(|m| message.contains(m))
            {
                vec![(Cause::RegistryAuth, 3), (Cause::MissingArtifact, 1)]
            } else if ["not found", "manifest unknown", "does not exist"]
                .iter()
                .any(|m| message.contains(m))
            {
                vec![(Cause::MissingArtifact, 3), (Cause::RegistryAuth, 1)]
            } else {
                vec![(Cause::MissingArtifact, 2), (Cause::RegistryAuth, 2)]
            }
        }
        "InvalidImageName" => vec![(Cause::MissingArtifact, 3)],
        "Unschedulable" | "OOMKilled" | "Evicted" => vec![(Cause::ResourceStarvation, 3)],
        "CreateContainerConfigError" | "CreateContainerError" => {
            vec![(Cause::Misconfiguration, 3)]
        }
        "CrashLoopBackOff" | "Error" => {
            let weight = if signal.restarts >= CRASH_RESTART_THRESHOLD { 3 } else { 2 };
            vec![(Cause::ApplicationCrash, weight)]
        }
        _ if message.contains("insufficient") => vec![(Cause::ResourceStarvation, 2)],
        _ => Vec::new(),
    }
}

/// True when the signals show a failure that will not heal by waiting.
pub fn is_terminal(signals: &[PodSignal]) -> bool {
    signals.iter().any(|s| match s.reason.as_str() {
        "ErrImagePull" | "ImagePullBackOff" | "InvalidImageName" => true,
        "CreateContainerConfigError" => true,
        "CrashLoopBackOff" | "Error" => s.restarts >= CRASH_RESTART_THRESHOLD,
        _ => false,
    })
}

impl Diagnosis {
    pub fn from_signals(namespace: &str, workload: &str, image: &str, signals: &[PodSignal]) -> Self {
        let ctx = Context {
            namespace,
            workload,
            image,
        };
        let mut causes: Vec<RankedCause> = Vec::new();
        for signal in signals {
            for (cause, score) in classify(signal) {
                let evidence = match &signal.message {
                    Some(m) => format!("{}: {} ({m})", signal.pod, signal.reason),
                    None => format!("{}: {}", signal.pod, signal.reason),
                };
                match causes.iter_mut().find(|c| c.cause == cause) {
                    Some(existing) => existing.score += score,
                    None => causes.push(RankedCause {
                        cause,
                        evidence,
                        remediation: remediation(cause, &ctx),
                        score,
                    }),
                }
            }
        }
        causes.sort_by(|a, b| b.score.cmp(&a.score).then(a.cause.cmp(&b.cause)));

        let summary = match causes.first() {
            Some(top) => format!("most likely {}", top.cause),
            None => "no pod-level failure signal observed".to_string(),
        };
        Diagnosis {
            summary,
            causes,
            inspect: vec![
                format!("kubectl get pods -n {namespace} -l app={workload}"),
                format!("kubectl rollout status deployment/{workload} -n {namespace}"),
            ],
        }
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str("inspect:\n");
        for cmd in &self.inspect {
            out.push_str(&format!("  {cmd}\n"));
        }
        if !self.causes.is_empty() {
            out.push_str("likely causes:\n");
        }
        for (i, c) in self.causes.iter().enumerate() {
            out.push_str(&format!("  {}. {} [{}]\n", i + 1, c.cause, c.evidence));
            for r in &c.remediation {
                out.push_str(&format!("       - {r}\n"));
            }
        }
        out.trim_end().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signal(reason: &str, message: Option<&str>, restarts: u32) -> PodSignal {
        PodSignal {
            pod: "auth-1".into(),
            reason: reason.into(),
            message: message.map(str::to_string),
            restarts,
        }
    }

    #[test]
    fn pull_denied_ranks_registry_auth_first() {
        let signals = [signal(
            "ErrImagePull",
            Some("pull access denied, repository does not exist or may require authorization"),
            0,
        )];
        let d = Diagnosis::from_signals("shop", "auth", "reg/auth:v1", &signals);
        assert_eq!(d.causes[0].cause, Cause::RegistryAuth);
        assert_eq!(d.causes[1].cause, Cause::MissingArtifact);
        assert!(is_terminal(&signals));
    }

    #[test]
    fn manifest_unknown_ranks_missing_artifact_first() {
        let signals = [signal("ImagePullBackOff", Some("manifest unknown"), 0)];
        let d = Diagnosis::from_signals("shop", "auth", "reg/auth:v1", &signals);
        assert_eq!(d.causes[0].cause, Cause::MissingArtifact);
        assert!(d.summary.contains("artifact missing"));
        assert!(d.render().contains("docker manifest inspect reg/auth:v1"));
    }

    #[test]
    fn crash_loop_is_terminal_only_after_repeats() {
        assert!(!is_terminal(&[signal("CrashLoopBackOff", None, 1)]));
        assert!(is_terminal(&[signal("CrashLoopBackOff", None, 4)]));
        let d = Diagnosis::from_signals("shop", "auth", "img", &[signal("CrashLoopBackOff", None, 4)]);
        assert_eq!(d.causes[0].cause, Cause::ApplicationCrash);
        assert!(d.render().contains("--previous"));
    }

    #[test]
    fn unschedulable_is_starvation_but_not_terminal() {
        let signals = [signal("Unschedulable", Some("0/3 nodes: Insufficient cpu"), 0)];
        assert!(!is_terminal(&signals));
        let d = Diagnosis::from_signals("shop", "auth", "img", &signals);
        assert_eq!(d.causes[0].cause, Cause::ResourceStarvation);
    }

    #[test]
    fn no_signals_still_lists_inspect_commands() {
        let d = Diagnosis::from_signals("shop", "auth", "img", &[]);
        assert!(d.causes.is_empty());
        assert!(d.render().contains("kubectl get pods -n shop -l app=auth"));
    }
}
