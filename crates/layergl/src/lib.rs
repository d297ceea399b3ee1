//! Tile-shader layer engine.
//!
//! Each map tile's imagery is fetched from up to eight texture channels and
//! run through one user-supplied shader program. The output is a tile image
//! the host map composites into its grid. The overall flow is:
//!
//! ```text
//!   host adapter
//!        │ produce_tile_output(coords)
//!        ▼
//!   request_tile ──▶ fetch_tile (try_join_all over channels)
//!        │ FetchedTileTextures
//!        ▼
//!   finish_tile ──▶ ChannelBinder ──▶ render_tile ──▶ TileSurface
//!        │                                  ▲
//!        └─▶ TileCache (re-renderable) ─────┘ re_render / animation ticks
//! ```
//!
//! All GPU work goes through an explicit [`GpuContext`]: [`WgpuContext`] in
//! production, a recording mock in tests. Shader sources are written in the
//! WebGL dialect (`attribute`, `varying`, `texture2D`, `gl_FragColor`) and
//! rewritten into Vulkan GLSL before they reach the `wgpu` backend.
//!
//! Declaring a `u_Now` uniform, or configuring any uniform, makes the engine
//! keep each tile's textures so [`TileShaderEngine::re_render`] can redraw
//! without fetching again.

mod animation;
mod cache;
mod compile;
mod engine;
mod error;
mod fetch;
pub mod gpu;
mod host;
mod layer;
mod render;
mod surface;
mod types;

pub use animation::{BoxedTimeSource, CancelToken, FixedTimeSource, SystemTimeSource, TimeSource};
pub use engine::TileShaderEngine;
pub use error::{EngineError, FetchError, GpuError, ShaderStage, TileError, TileFetchError};
pub use fetch::{
    ChannelRequest, ImageFetcher, RemoteChannel, StaticSource, TextureSource, TileUrlBuilder,
};
pub use gpu::{GpuContext, WgpuContext, WgpuOptions};
pub use host::{ResidentTile, TileHost};
pub use layer::TileLayer;
pub use surface::TileSurface;
pub use types::{
    ChannelSpec, FetchedTileTextures, FloatArray, GeoBounds, LatLng, ParseTileKeyError, Point,
    ProgramConfig, TexturePayload, TileCoords, TileKey, UniformValue, DEFAULT_FRAME_INTERVAL,
    DEFAULT_TILE_SIZE, MAX_CHANNELS,
};
