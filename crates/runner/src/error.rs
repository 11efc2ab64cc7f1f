use thiserror::Error;

use vigil_engine::EngineError;
use vigil_ports::StoreError;
use vigil_signal::SignalError;

/// Bootstrap and control-loop errors
///
/// Per-position faults never surface here: a position that cannot be
/// evaluated is skipped or halted in isolation while the loop keeps
/// serving the others.
#[derive(Error, Debug)]
pub enum RunnerError {
    #[error("Invalid runner configuration: {0}")]
    InvalidConfig(&'static str),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Signal(#[from] SignalError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type RunnerResult<T> = std::result::Result<T, RunnerError>;
