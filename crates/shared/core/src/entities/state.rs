use serde::{Deserialize, Serialize};

/// Lifecycle state of a tracked position
///
/// Transitions happen only through the position state machine. `Exited` and
/// `EmergencyExited` are terminal; `Halted` is frozen pending manual
/// intervention (arithmetic fault isolation).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PositionState {
    /// Healthy, fully monitored
    #[default]
    Active,
    /// Profit-taking or early caution - partial exits in flight
    Trimming,
    /// Elevated urgency - larger exits in flight, stop tightened
    ExitPending,
    /// Fully exited through confirmed fills
    Exited,
    /// Fully exited via the emergency path (hysteresis and slippage limits
    /// bypassed)
    EmergencyExited,
    /// Frozen after an arithmetic fault; requires manual intervention
    Halted,
}

impl PositionState {
    /// Terminal states never transition again
    pub fn is_terminal(&self) -> bool {
        matches!(self, PositionState::Exited | PositionState::EmergencyExited)
    }

    /// States the scheduler evaluates each cycle
    pub fn is_evaluable(&self) -> bool {
        matches!(
            self,
            PositionState::Active | PositionState::Trimming | PositionState::ExitPending
        )
    }
}

impl std::fmt::Display for PositionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            PositionState::Active => "Active",
            PositionState::Trimming => "Trimming",
            PositionState::ExitPending => "ExitPending",
            PositionState::Exited => "Exited",
            PositionState::EmergencyExited => "EmergencyExited",
            PositionState::Halted => "Halted",
        };
        write!(f, "{}", name)
    }
}
