use std::fmt;

use crate::types::TileKey;

/// Pipeline stage a shader belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

impl fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShaderStage::Vertex => f.write_str("vertex"),
            ShaderStage::Fragment => f.write_str("fragment"),
        }
    }
}

/// Construction-time failures. The engine instance is unusable afterwards.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("{stage} shader failed to compile: {diagnostic}")]
    ShaderCompile {
        stage: ShaderStage,
        diagnostic: String,
    },
    #[error("shader program failed to link: {diagnostic}")]
    ProgramLink { diagnostic: String },
    #[error("default value for uniform '{name}' must be a number or an array of numbers, got {found}")]
    UniformType { name: String, found: String },
    #[error("default value for uniform '{name}' has {len} elements; uniforms take 1 to 4")]
    UniformSize { name: String, len: usize },
}

impl EngineError {
    /// GPU-reported diagnostic text, when the failure came from the driver.
    pub fn diagnostic(&self) -> Option<&str> {
        match self {
            EngineError::ShaderCompile { diagnostic, .. }
            | EngineError::ProgramLink { diagnostic } => Some(diagnostic),
            _ => None,
        }
    }
}

/// Failure reported by a texture source for one channel.
#[derive(Debug, Clone, thiserror::Error)]
pub enum FetchError {
    #[error("request for {url} failed: {reason}")]
    Request { url: String, reason: String },
    #[error("failed to decode image from {url}: {reason}")]
    Decode { url: String, reason: String },
    #[error("source cannot serve tile {tile}: {reason}")]
    Unavailable { tile: String, reason: String },
    #[error("fetch was dropped before it completed")]
    Canceled,
}

/// The first channel failure of a tile fetch.
#[derive(Debug, Clone, thiserror::Error)]
#[error("channel {index} ('{channel}') failed: {source}")]
pub struct TileFetchError {
    pub channel: String,
    pub index: usize,
    #[source]
    pub source: FetchError,
}

/// GPU failure while drawing or reading back a tile.
#[derive(Debug, Clone, thiserror::Error)]
#[error("GPU operation failed: {0}")]
pub struct GpuError(pub String);

/// Per-tile failure handed to the host's tile-error path.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TileError {
    #[error("tile {tile}: {source}")]
    Fetch {
        tile: TileKey,
        #[source]
        source: TileFetchError,
    },
    #[error("tile {tile}: {source}")]
    Render {
        tile: TileKey,
        #[source]
        source: GpuError,
    },
}

impl TileError {
    pub fn tile(&self) -> TileKey {
        match self {
            TileError::Fetch { tile, .. } | TileError::Render { tile, .. } => *tile,
        }
    }
}
