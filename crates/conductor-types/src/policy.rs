use serde::{Deserialize, Serialize};

/// A per-base-command policy record, matched by
/// `shlex_split(command)[0]`.
///
/// `resume_pattern` must have exactly one capture group; when absent,
/// the Session falls back to `/--resume\s+(\S+)/`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommandPolicyRecord {
    /// Canonical invocation, e.g. `"claude"`.
    pub command: String,
    /// Human-readable label for dashboards.
    pub label: String,
    #[serde(default)]
    pub resume_pattern: Option<String>,
    #[serde(default)]
    pub resume_flag: Option<String>,
    #[serde(default)]
    pub resume_command: Option<String>,
    /// Ordered literal byte strings written to induce a graceful
    /// agent-aware shutdown before falling back to signals.
    #[serde(default)]
    pub stop_sequence: Vec<String>,
}

impl CommandPolicyRecord {
    pub fn base_token(&self) -> &str {
        self.command
            .split_whitespace()
            .next()
            .unwrap_or(&self.command)
    }
}
