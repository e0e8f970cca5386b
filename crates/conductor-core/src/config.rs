//! Command policy: a read-mostly list of per-command records, loaded
//! from built-in defaults and merged with a user-editable
//! `config.yaml`.

use crate::error::{CoreError, Result};
use conductor_types::CommandPolicyRecord;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

/// What gets (de)serialized to `config.yaml`. Only the policy list is
/// user-editable today; the envelope exists so we can add sibling
/// sections later without breaking the file shape.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub commands: Vec<CommandPolicyRecord>,
}

/// Built-in policy records, present even with no `config.yaml` at all.
fn builtin_defaults() -> Vec<CommandPolicyRecord> {
    vec![CommandPolicyRecord {
        command: "claude".to_string(),
        label: "Claude Code".to_string(),
        resume_pattern: None,
        resume_flag: Some("--resume".to_string()),
        resume_command: None,
        stop_sequence: vec!["\u{3}".to_string(), "/exit\r".to_string()],
    }]
}

/// Looks up policy by base command token, re-reading `config.yaml` on
/// every call so edits take effect without a daemon restart.
pub trait PolicyProvider: Send + Sync {
    fn get(&self, base_command: &str) -> Option<CommandPolicyRecord>;
    /// Bumped whenever the on-disk file is observed to have changed.
    fn version(&self) -> u64;
}

/// Merges `builtin_defaults()` with `config.yaml`, user records
/// overriding a built-in of the same `command`.
pub struct FilePolicyProvider {
    path: PathBuf,
    state: RwLock<CachedState>,
}

struct CachedState {
    mtime: Option<std::time::SystemTime>,
    records: Vec<CommandPolicyRecord>,
    version: u64,
}

impl FilePolicyProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let provider = Self {
            path: path.into(),
            state: RwLock::new(CachedState {
                mtime: None,
                records: builtin_defaults(),
                version: 0,
            }),
        };
        provider.reload_if_changed();
        provider
    }

    /// Writes a fresh `config.yaml` containing only the built-in
    /// defaults, without clobbering an existing file.
    pub fn ensure_default_file(&self) -> Result<()> {
        if self.path.exists() {
            return Ok(());
        }
        let contents = ConfigFile {
            commands: builtin_defaults(),
        };
        let yaml = serde_yaml::to_string(&contents)?;
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, yaml)?;
        Ok(())
    }

    fn current_mtime(&self) -> Option<std::time::SystemTime> {
        fs::metadata(&self.path).ok()?.modified().ok()
    }

    fn reload_if_changed(&self) {
        let disk_mtime = self.current_mtime();
        let needs_reload = {
            let state = self.state.read().expect("policy state lock poisoned");
            disk_mtime != state.mtime
        };
        if !needs_reload {
            return;
        }

        let merged = match self.load_merged() {
            Ok(records) => records,
            Err(_) => builtin_defaults(),
        };

        let mut state = self.state.write().expect("policy state lock poisoned");
        state.mtime = disk_mtime;
        state.records = merged;
        state.version += 1;
    }

    fn load_merged(&self) -> Result<Vec<CommandPolicyRecord>> {
        let mut records = builtin_defaults();
        if !self.path.exists() {
            return Ok(records);
        }
        let text = fs::read_to_string(&self.path)?;
        let file: ConfigFile = serde_yaml::from_str(&text)?;
        for override_record in file.commands {
            if let Some(existing) = records
                .iter_mut()
                .find(|r| r.command == override_record.command)
            {
                *existing = override_record;
            } else {
                records.push(override_record);
            }
        }
        Ok(records)
    }
}

impl PolicyProvider for FilePolicyProvider {
    fn get(&self, base_command: &str) -> Option<CommandPolicyRecord> {
        self.reload_if_changed();
        let state = self.state.read().expect("policy state lock poisoned");
        state
            .records
            .iter()
            .find(|r| r.base_token() == base_command)
            .cloned()
    }

    fn version(&self) -> u64 {
        let state = self.state.read().expect("policy state lock poisoned");
        state.version
    }
}

/// A fixed, in-memory provider with no backing file. Handy for tests
/// and for embedding conductor-core in a caller that manages its own
/// configuration surface.
pub struct StaticPolicyProvider {
    records: Vec<CommandPolicyRecord>,
}

impl StaticPolicyProvider {
    pub fn new(records: Vec<CommandPolicyRecord>) -> Self {
        Self { records }
    }

    pub fn with_defaults() -> Self {
        Self::new(builtin_defaults())
    }
}

impl PolicyProvider for StaticPolicyProvider {
    fn get(&self, base_command: &str) -> Option<CommandPolicyRecord> {
        self.records
            .iter()
            .find(|r| r.base_token() == base_command)
            .cloned()
    }

    fn version(&self) -> u64 {
        0
    }
}

/// Splits a command line the way a POSIX shell would, so policy
/// lookups can compare against `tokens[0]` regardless of quoting.
pub fn shlex_split(command: &str) -> Result<Vec<String>> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut chars = command.chars().peekable();
    let mut in_single = false;
    let mut in_double = false;
    let mut has_token = false;

    while let Some(c) = chars.next() {
        match c {
            '\'' if !in_double => {
                in_single = !in_single;
                has_token = true;
            }
            '"' if !in_single => {
                in_double = !in_double;
                has_token = true;
            }
            '\\' if !in_single => {
                if let Some(next) = chars.next() {
                    current.push(next);
                    has_token = true;
                }
            }
            c if c.is_whitespace() && !in_single && !in_double => {
                if has_token {
                    tokens.push(std::mem::take(&mut current));
                    has_token = false;
                }
            }
            c => {
                current.push(c);
                has_token = true;
            }
        }
    }

    if in_single || in_double {
        return Err(CoreError::Other(format!(
            "unterminated quote in command: {command}"
        )));
    }
    if has_token {
        tokens.push(current);
    }
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shlex_split_handles_quotes() {
        let tokens = shlex_split("claude --resume 'abc def' --flag").unwrap();
        assert_eq!(tokens, vec!["claude", "--resume", "abc def", "--flag"]);
    }

    #[test]
    fn static_provider_matches_base_token() {
        let provider = StaticPolicyProvider::with_defaults();
        let record = provider.get("claude").expect("claude policy present");
        assert_eq!(record.resume_flag.as_deref(), Some("--resume"));
        assert!(provider.get("bash").is_none());
    }

    #[test]
    fn file_provider_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        let contents = ConfigFile {
            commands: vec![CommandPolicyRecord {
                command: "claude".to_string(),
                label: "Overridden".to_string(),
                resume_pattern: None,
                resume_flag: Some("--continue".to_string()),
                resume_command: None,
                stop_sequence: vec![],
            }],
        };
        fs::write(&path, serde_yaml::to_string(&contents).unwrap()).unwrap();

        let provider = FilePolicyProvider::new(&path);
        let record = provider.get("claude").unwrap();
        assert_eq!(record.label, "Overridden");
        assert_eq!(record.resume_flag.as_deref(), Some("--continue"));
    }
}
