//! Pane control: the multiplexer adapter abstraction and its wezterm-backed
//! implementation.

pub mod multiplexer;

pub use multiplexer::{MultiplexerAdapter, PaneInfo, WeztermMultiplexer};
