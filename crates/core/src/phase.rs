//! Coarse status phase reported by remote controllers in `status.phase`.

use serde::{Deserialize, Serialize};

/// Serialized as the bare phase string, e.g. `"Running"` or `"Reconciling"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum Phase {
    Pending,
    Running,
    Failed,
    Unsupported,
    /// Any phase string this client does not know about.
    Other(String),
}

impl Phase {
    pub fn parse(s: &str) -> Self {
        match s {
            "Pending" => Phase::Pending,
            "Running" => Phase::Running,
            "Failed" => Phase::Failed,
            "Unsupported" => Phase::Unsupported,
            other => Phase::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Phase::Pending => "Pending",
            Phase::Running => "Running",
            Phase::Failed => "Failed",
            Phase::Unsupported => "Unsupported",
            Phase::Other(s) => s.as_str(),
        }
    }

    /// Phases that stop a `reaches_phase` wait early. They are not final:
    /// a later spec change can move the object out of them.
    pub fn is_terminal_error(&self) -> bool { matches!(self, Phase::Failed | Phase::Unsupported) }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { f.write_str(self.as_str()) }
}

impl From<String> for Phase {
    fn from(s: String) -> Self { Phase::parse(&s) }
}

impl From<Phase> for String {
    fn from(p: Phase) -> Self { p.as_str().to_string() }
}

impl std::str::FromStr for Phase {
    type Err = std::convert::Infallible;
    fn from_str(s: &str) -> Result<Self, Self::Err> { Ok(Phase::parse(s)) }
}
