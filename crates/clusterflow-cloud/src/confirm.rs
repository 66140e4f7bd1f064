//! Operator confirmation for destructive operations

/// Asked before worker removal and whole-cluster deletion.
///
/// Anything other than an affirmative answer leaves the cluster untouched.
pub trait Confirmation: Send + Sync {
    fn confirm(&self, prompt: &str) -> bool;
}

/// Answers yes to everything (`--yes`)
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoConfirm;

impl Confirmation for AutoConfirm {
    fn confirm(&self, prompt: &str) -> bool {
        tracing::debug!("Auto-confirmed: {}", prompt);
        true
    }
}

/// Answers no to everything, for non-interactive sessions
#[derive(Debug, Clone, Copy, Default)]
pub struct Decline;

impl Confirmation for Decline {
    fn confirm(&self, prompt: &str) -> bool {
        tracing::debug!("Declined: {}", prompt);
        false
    }
}
