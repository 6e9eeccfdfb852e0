//! Board coordinates, layers, and block identifiers.

use serde::{Deserialize, Serialize};

/// Which of the two tile layers a block lives on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Layer {
    Foreground,
    Background,
}

impl Layer {
    /// Returns `true` for [`Layer::Foreground`]; this is the wire encoding.
    pub fn is_foreground(self) -> bool {
        matches!(self, Layer::Foreground)
    }

    /// Inverse of [`Layer::is_foreground`].
    pub fn from_foreground(foreground: bool) -> Self {
        if foreground {
            Layer::Foreground
        } else {
            Layer::Background
        }
    }
}

/// Server-assigned numeric id of a block type (dirt, stone, ...).
///
/// The mapping from id to block definition is built by the server at startup
/// once plugins are loaded, so the client treats the id as opaque.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlockTypeId(pub u16);

/// A tile coordinate on the board.  Boards are bounded under 65536 tiles per axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TilePosition {
    pub x: u16,
    pub y: u16,
}

impl TilePosition {
    pub fn new(x: u16, y: u16) -> Self {
        Self { x, y }
    }
}
