use crate::error::CustodianError;
use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// StepStatus
// ---------------------------------------------------------------------------

/// Terminal and in-flight states of a workflow step.
///
/// Transitions: `(pending) → Running → Ok | Failed | Manual | Skipped`.
/// A step with no recorded result is pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepStatus {
    Running,
    Ok,
    Failed,
    Manual,
    Skipped,
}

impl StepStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            StepStatus::Running => "RUNNING",
            StepStatus::Ok => "OK",
            StepStatus::Failed => "FAILED",
            StepStatus::Manual => "MANUAL",
            StepStatus::Skipped => "SKIPPED",
        }
    }

    /// Whether a step in this state satisfies a `requires` edge.
    pub fn satisfies_requirement(self) -> bool {
        matches!(self, StepStatus::Ok | StepStatus::Manual | StepStatus::Skipped)
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// StepKind
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    #[default]
    Action,
    Manual,
}

// ---------------------------------------------------------------------------
// TriggerKind
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    Onboard,
    Offboard,
}

impl TriggerKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TriggerKind::Onboard => "onboarding",
            TriggerKind::Offboard => "offboarding",
        }
    }

    /// Short prefix used when deriving request ids from ticket numbers.
    pub fn request_prefix(self) -> &'static str {
        match self {
            TriggerKind::Onboard => "ONB",
            TriggerKind::Offboard => "OFF",
        }
    }
}

impl fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// ExecutionMode
// ---------------------------------------------------------------------------

/// How validated offboarding triggers are handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Only write pending rows; never execute.
    #[default]
    Staged,
    /// Execute when preflight is clean and the protected policy is non-empty.
    Auto,
    /// Always execute.
    Live,
}

impl ExecutionMode {
    pub fn as_str(self) -> &'static str {
        match self {
            ExecutionMode::Staged => "staged",
            ExecutionMode::Auto => "auto",
            ExecutionMode::Live => "live",
        }
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ExecutionMode {
    type Err = CustodianError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "staged" => Ok(ExecutionMode::Staged),
            "auto" => Ok(ExecutionMode::Auto),
            "live" => Ok(ExecutionMode::Live),
            other => Err(CustodianError::Configuration(format!(
                "unknown execution mode '{other}': must be staged, auto, or live"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// NotifyMode
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotifyMode {
    /// One start and one summary event per run.
    #[default]
    Summary,
    /// Summary plus an event per step start and result.
    Verbose,
}

impl std::str::FromStr for NotifyMode {
    type Err = CustodianError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "summary" => Ok(NotifyMode::Summary),
            "verbose" => Ok(NotifyMode::Verbose),
            other => Err(CustodianError::Configuration(format!(
                "unknown notify mode '{other}': must be summary or verbose"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// RequestStatus / PendingStatus
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestStatus {
    Hold,
    Ready,
    Error,
}

impl RequestStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RequestStatus::Hold => "HOLD",
            RequestStatus::Ready => "READY",
            RequestStatus::Error => "ERROR",
        }
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RequestStatus {
    type Err = CustodianError;

    /// Blank parses as `READY` so hand-edited rows without a status still run.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "" | "READY" => Ok(RequestStatus::Ready),
            "HOLD" => Ok(RequestStatus::Hold),
            "ERROR" => Ok(RequestStatus::Error),
            other => Err(CustodianError::Validation(format!(
                "unknown request status '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PendingStatus {
    Pending,
    Error,
}

impl PendingStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PendingStatus::Pending => "PENDING",
            PendingStatus::Error => "ERROR",
        }
    }
}

impl fmt::Display for PendingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requirement_satisfaction() {
        assert!(StepStatus::Ok.satisfies_requirement());
        assert!(StepStatus::Manual.satisfies_requirement());
        assert!(StepStatus::Skipped.satisfies_requirement());
        assert!(!StepStatus::Failed.satisfies_requirement());
        assert!(!StepStatus::Running.satisfies_requirement());
    }

    #[test]
    fn execution_mode_parse() {
        assert_eq!("LIVE".parse::<ExecutionMode>().unwrap(), ExecutionMode::Live);
        assert_eq!(" auto ".parse::<ExecutionMode>().unwrap(), ExecutionMode::Auto);
        assert!("yolo".parse::<ExecutionMode>().is_err());
    }

    #[test]
    fn blank_request_status_is_ready() {
        assert_eq!("".parse::<RequestStatus>().unwrap(), RequestStatus::Ready);
        assert_eq!("hold".parse::<RequestStatus>().unwrap(), RequestStatus::Hold);
    }

    #[test]
    fn step_status_serializes_uppercase() {
        let yaml = serde_yaml::to_string(&StepStatus::Skipped).unwrap();
        assert_eq!(yaml.trim(), "SKIPPED");
    }
}
