//! Screen Gateway: per-pane capture, the cursor-based full/delta protocol,
//! the dangerous-command guard, and keystroke injection payloads.

pub mod delta;
pub mod gateway;
pub mod guard;
pub mod keystrokes;
pub mod types;

pub use delta::{apply_deltas, build_deltas, should_send_full};
pub use gateway::ScreenGateway;
pub use guard::DangerousCommandGuard;
pub use keystrokes::{KeystrokeRequest, SymbolicKey};
pub use types::{Cursor, ScreenDelta, ScreenMode, ScreenResponse};
