//! Shell command policy: refuses high-risk command patterns.

/// A command matched a blocked pattern.
#[derive(Debug, thiserror::Error)]
#[error("Command blocked by policy: matches '{pattern}'")]
pub struct CommandPolicyError {
    pub pattern: String,
}

/// Substring blocklist over normalized commands.
///
/// Commands are lowercased and runs of whitespace collapsed before matching,
/// so `RM  -RF` matches `rm -rf`.
#[derive(Debug, Clone, Default)]
pub struct CommandPolicy {
    blocked: Vec<String>,
}

impl CommandPolicy {
    pub fn new(blocked: &[String]) -> Self {
        Self {
            blocked: blocked.iter().map(|p| normalize(p)).collect(),
        }
    }

    pub fn check(&self, command: &str) -> Result<(), CommandPolicyError> {
        let normalized = normalize(command);
        match self.blocked.iter().find(|p| normalized.contains(p.as_str())) {
            Some(pattern) => {
                tracing::warn!(pattern = %pattern, "Blocked high-risk command");
                Err(CommandPolicyError {
                    pattern: pattern.clone(),
                })
            }
            None => Ok(()),
        }
    }
}

fn normalize(s: &str) -> String {
    s.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}
