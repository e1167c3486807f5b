//! The terminal side of the operator boundary.

use rollout_core::operator::{Operator, Unattended};
use rollout_core::readiness::CancelToken;
use std::io::{self, BufRead, Write};

/// Conventional exit status after a second Ctrl-C.
const INTERRUPTED: i32 = 130;

/// Prompts on stderr and reads answers from stdin.
pub struct TerminalOperator {
    assume_yes: bool,
}

impl TerminalOperator {
    fn read_line(&self) -> Option<String> {
        let mut line = String::new();
        match io::stdin().lock().read_line(&mut line) {
            Ok(0) | Err(_) => None,
            Ok(_) => Some(line.trim().to_string()),
        }
    }
}

impl Operator for TerminalOperator {
    fn confirm(&self, prompt: &str) -> bool {
        if self.assume_yes {
            tracing::info!(%prompt, "auto-confirmed");
            return true;
        }
        eprint!("{prompt} [y/N] ");
        let _ = io::stderr().flush();
        matches!(
            self.read_line().as_deref().map(str::to_ascii_lowercase).as_deref(),
            Some("y" | "yes")
        )
    }

    fn choose(&self, target: &str, candidates: &[String]) -> Option<String> {
        eprintln!("More than one {target} matches:");
        for (i, c) in candidates.iter().enumerate() {
            eprintln!("  {}) {c}", i + 1);
        }
        eprint!("Select {target} (number or name, empty to abort): ");
        let _ = io::stderr().flush();
        let answer = self.read_line()?;
        pick(&answer, candidates)
    }

    fn is_interactive(&self) -> bool {
        true
    }
}

fn pick(answer: &str, candidates: &[String]) -> Option<String> {
    if answer.is_empty() {
        return None;
    }
    if let Ok(n) = answer.parse::<usize>() {
        return n.checked_sub(1).and_then(|i| candidates.get(i)).cloned();
    }
    candidates.iter().find(|c| c.as_str() == answer).cloned()
}

/// `--non-interactive` never prompts; otherwise the terminal is used.
pub fn operator(assume_yes: bool, non_interactive: bool) -> Box<dyn Operator> {
    if non_interactive {
        Box::new(Unattended::new(assume_yes))
    } else {
        Box::new(TerminalOperator { assume_yes })
    }
}

/// A token cancelled by the first Ctrl-C. The run then stops at the next
/// readiness wait and still writes its summary; a second Ctrl-C exits.
pub fn cancel_on_interrupt() -> CancelToken {
    let token = CancelToken::new();
    let handle = token.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        if !interrupt(&handle) {
            std::process::exit(INTERRUPTED);
        }
    }) {
        tracing::warn!(error = %e, "could not install interrupt handler");
    }
    token
}

/// Cancel on the first interrupt. Returns false once already cancelled.
fn interrupt(token: &CancelToken) -> bool {
    if token.is_cancelled() {
        return false;
    }
    eprintln!("\ninterrupted; stopping after the current step (Ctrl-C again to exit now)");
    token.cancel();
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pick_by_number_or_name() {
        let c = vec!["shop-a".to_string(), "shop-b".to_string()];
        assert_eq!(pick("2", &c).as_deref(), Some("shop-b"));
        assert_eq!(pick("shop-a", &c).as_deref(), Some("shop-a"));
        assert_eq!(pick("0", &c), None);
        assert_eq!(pick("3", &c), None);
        assert_eq!(pick("", &c), None);
        assert_eq!(pick("shop", &c), None);
    }

    #[test]
    fn non_interactive_never_prompts() {
        let op = operator(false, true);
        assert!(!op.is_interactive());
        assert!(!op.confirm("apply?"));
        assert!(operator(true, true).confirm("apply?"));
    }

    #[test]
    fn first_interrupt_cancels_second_exits() {
        let token = CancelToken::new();
        let waiter = token.clone();
        assert!(interrupt(&token));
        assert!(waiter.is_cancelled());
        assert!(!interrupt(&token));
    }
}
