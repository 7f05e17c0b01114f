//! Screen Gateway DTOs: capture modes, full/delta responses, and cursors.

use serde::{Deserialize, Serialize};
use typeshare::typeshare;

/// Capture mode for a screen stream.
#[typeshare]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScreenMode {
    /// Plain-text line capture.
    Text,
    /// Rendered-image capture.
    Image,
}

/// One delta hunk: replace `deleteCount` lines starting at `start` with `insertLines`.
#[typeshare]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScreenDelta {
    /// Index of the first line to replace, in the evolving local array, after
    /// accounting for the net line-count shift of all prior deltas in the batch.
    pub start: usize,
    /// Number of lines to remove starting at `start`.
    pub delete_count: usize,
    /// Replacement lines.
    pub insert_lines: Vec<String>,
}

/// An opaque cursor letting a client request the delta since its last fetch.
#[typeshare]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor(pub String);

/// Either a full snapshot or a sequence of deltas, returned by `getScreen`.
#[typeshare]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(untagged)]
pub enum ScreenResponse {
    /// A full re-render: the client replaces its whole local line array.
    Full {
        /// All lines.
        screen: Vec<String>,
        /// New cursor covering this snapshot.
        cursor: Cursor,
    },
    /// An incremental update the client applies to its local line array.
    Delta {
        /// Hunks to apply in order.
        deltas: Vec<ScreenDelta>,
        /// New cursor covering this update.
        cursor: Cursor,
    },
}
