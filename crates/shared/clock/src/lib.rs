//! Vigil Clock Infrastructure
//!
//! Time sources behind the `Clock` port:
//! - `SystemClock` for production (real wall-clock time)
//! - `ManualClock` for deterministic tests (set/advance explicitly)

mod manual;
mod system;

pub use manual::ManualClock;
pub use system::SystemClock;

// Re-export the Clock trait for convenience
pub use vigil_ports::Clock;
