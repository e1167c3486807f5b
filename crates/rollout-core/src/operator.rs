//! The single interactive boundary.
//!
//! Nothing else in the core reads from a terminal. The Phase Controller asks
//! the operator before cost-incurring actions, and the prober asks it to
//! pick between ambiguous candidates.

pub trait Operator {
    /// Yes/no gate. `false` declines the action.
    fn confirm(&self, prompt: &str) -> bool;

    /// Pick one of `candidates` for `target`. `None` declines.
    fn choose(&self, target: &str, candidates: &[String]) -> Option<String>;

    /// When false, ambiguity is fatal instead of prompting.
    fn is_interactive(&self) -> bool;
}

/// Never prompts. Confirms only when `assume_yes` is set.
#[derive(Debug, Clone, Copy, Default)]
pub struct Unattended {
    pub assume_yes: bool,
}

impl Unattended {
    pub fn new(assume_yes: bool) -> Self {
        Self { assume_yes }
    }
}

impl Operator for Unattended {
    fn confirm(&self, prompt: &str) -> bool {
        if !self.assume_yes {
            tracing::warn!(%prompt, "confirmation required; pass --yes to proceed unattended");
        }
        self.assume_yes
    }

    fn choose(&self, _target: &str, _candidates: &[String]) -> Option<String> {
        None
    }

    fn is_interactive(&self) -> bool {
        false
    }
}
