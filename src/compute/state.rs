//! Lifecycle states and actions reported and accepted by the provider.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Observable status of a compute instance.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum LifecycleState {
    /// The instance is being moved between hosts.
    Moving,
    /// The instance is being created.
    Provisioning,
    /// The instance is up.
    Running,
    /// The instance is booting.
    Starting,
    /// The instance is shutting down.
    Stopping,
    /// The instance is powered off.
    Stopped,
    /// A boot image is being captured from the instance.
    CreatingImage,
    /// The instance is being deleted.
    Terminating,
    /// The instance has been deleted.
    Terminated,
}

impl LifecycleState {
    /// Every state, for watches that fire on any transition.
    pub const ALL: [Self; 9] = [
        Self::Moving,
        Self::Provisioning,
        Self::Running,
        Self::Starting,
        Self::Stopping,
        Self::Stopped,
        Self::CreatingImage,
        Self::Terminating,
        Self::Terminated,
    ];

    /// Upper-snake name used in logs and configuration.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Moving => "MOVING",
            Self::Provisioning => "PROVISIONING",
            Self::Running => "RUNNING",
            Self::Starting => "STARTING",
            Self::Stopping => "STOPPING",
            Self::Stopped => "STOPPED",
            Self::CreatingImage => "CREATING_IMAGE",
            Self::Terminating => "TERMINATING",
            Self::Terminated => "TERMINATED",
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raised when a state or action name is not recognised.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("invalid {kind}: {value}")]
pub struct ParseNameError {
    /// What was being parsed (`lifecycle state`, `instance action`).
    pub kind: &'static str,
    /// The rejected input.
    pub value: String,
}

/// Lowercases and drops separators so `CREATING_IMAGE`, `CreatingImage` and
/// `creating-image` compare equal.
fn normalise(value: &str) -> String {
    value
        .trim()
        .chars()
        .filter(|ch| !matches!(ch, '_' | '-' | ' '))
        .flat_map(char::to_lowercase)
        .collect()
}

impl FromStr for LifecycleState {
    type Err = ParseNameError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let wanted = normalise(value);
        Self::ALL
            .into_iter()
            .find(|state| normalise(state.as_str()) == wanted)
            .ok_or_else(|| ParseNameError {
                kind: "lifecycle state",
                value: value.to_owned(),
            })
    }
}

/// Power actions accepted by the provider.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum InstanceAction {
    /// Power on.
    Start,
    /// Hard power off.
    Stop,
    /// Hard reboot.
    Reset,
    /// Graceful reboot through the guest OS.
    SoftReset,
    /// Graceful shutdown through the guest OS.
    SoftStop,
}

impl InstanceAction {
    const ALL: [Self; 5] = [
        Self::Start,
        Self::Stop,
        Self::Reset,
        Self::SoftReset,
        Self::SoftStop,
    ];

    /// Value sent to the provider API.
    #[must_use]
    pub const fn wire_value(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Reset => "reset",
            Self::SoftReset => "softreset",
            Self::SoftStop => "softstop",
        }
    }
}

impl fmt::Display for InstanceAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_value())
    }
}

impl FromStr for InstanceAction {
    type Err = ParseNameError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let wanted = normalise(value);
        Self::ALL
            .into_iter()
            .find(|action| action.wire_value() == wanted)
            .ok_or_else(|| ParseNameError {
                kind: "instance action",
                value: value.to_owned(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("RUNNING", LifecycleState::Running)]
    #[case("running", LifecycleState::Running)]
    #[case("CREATING_IMAGE", LifecycleState::CreatingImage)]
    #[case("CreatingImage", LifecycleState::CreatingImage)]
    #[case(" terminated ", LifecycleState::Terminated)]
    fn lifecycle_state_accepts_provider_spellings(
        #[case] input: &str,
        #[case] expected: LifecycleState,
    ) {
        assert_eq!(input.parse::<LifecycleState>(), Ok(expected));
    }

    #[test]
    fn lifecycle_state_rejects_unknown_names() {
        let err = "hibernating"
            .parse::<LifecycleState>()
            .expect_err("unknown state");
        assert_eq!(err.to_string(), "invalid lifecycle state: hibernating");
    }

    #[rstest]
    #[case("SOFT_STOP", InstanceAction::SoftStop)]
    #[case("softreset", InstanceAction::SoftReset)]
    #[case("Start", InstanceAction::Start)]
    fn instance_action_parses_wire_and_enum_names(
        #[case] input: &str,
        #[case] expected: InstanceAction,
    ) {
        assert_eq!(input.parse::<InstanceAction>(), Ok(expected));
    }
}
