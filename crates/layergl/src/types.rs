use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use image::RgbaImage;

use crate::fetch::TextureSource;

/// Shaders may sample from at most eight channels (`TEXTURE0`-`TEXTURE7`).
pub const MAX_CHANNELS: usize = 8;

/// Default edge length of a square tile in pixels.
pub const DEFAULT_TILE_SIZE: u32 = 256;

/// One display refresh at 60Hz.
pub const DEFAULT_FRAME_INTERVAL: Duration = Duration::from_micros(16_667);

/// Integer tile address in the host's grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileCoords {
    pub x: i64,
    pub y: i64,
    pub z: u8,
}

impl TileCoords {
    pub fn new(x: i64, y: i64, z: u8) -> Self {
        Self { x, y, z }
    }

    pub fn key(self) -> TileKey {
        TileKey(self)
    }
}

impl fmt::Display for TileCoords {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.z, self.x, self.y)
    }
}

/// Cache identity of a tile, rendered as `x:y:z`.
///
/// Keys are derived from coordinates exactly as given; callers that want the
/// antimeridian-wrapped identity wrap the coordinates first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileKey(TileCoords);

impl TileKey {
    pub fn coords(&self) -> TileCoords {
        self.0
    }
}

impl From<TileCoords> for TileKey {
    fn from(coords: TileCoords) -> Self {
        TileKey(coords)
    }
}

impl fmt::Display for TileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.0.x, self.0.y, self.0.z)
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("invalid tile key '{0}', expected x:y:z")]
pub struct ParseTileKeyError(String);

impl FromStr for TileKey {
    type Err = ParseTileKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ParseTileKeyError(s.to_string());
        let mut parts = s.split(':');
        let x = parts.next().and_then(|p| p.parse().ok()).ok_or_else(invalid)?;
        let y = parts.next().and_then(|p| p.parse().ok()).ok_or_else(invalid)?;
        let z = parts.next().and_then(|p| p.parse().ok()).ok_or_else(invalid)?;
        if parts.next().is_some() {
            return Err(invalid());
        }
        Ok(TileKey(TileCoords::new(x, y, z)))
    }
}

/// Geographic point in degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

impl LatLng {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }
}

/// Point in the host's projected (CRS) plane.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Geographic extent of a tile in degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoBounds {
    pub west: f64,
    pub east: f64,
    pub north: f64,
    pub south: f64,
}

impl GeoBounds {
    pub fn south_west(&self) -> LatLng {
        LatLng::new(self.south, self.west)
    }

    pub fn north_east(&self) -> LatLng {
        LatLng::new(self.north, self.east)
    }
}

/// Single-precision numeric texture data, one `width * height` plane per layer.
#[derive(Debug, Clone, PartialEq)]
pub struct FloatArray {
    pub width: u32,
    pub height: u32,
    pub layers: Vec<Vec<f32>>,
}

impl FloatArray {
    pub fn new(width: u32, height: u32, layers: Vec<Vec<f32>>) -> Self {
        Self {
            width,
            height,
            layers,
        }
    }

    pub fn layer_len(&self) -> usize {
        self.width as usize * self.height as usize
    }
}

/// Resolved content for one texture channel of one tile.
#[derive(Debug, Clone)]
pub enum TexturePayload {
    /// 8-bit RGBA imagery, uploaded as a mipmapped 2D texture.
    Image(Arc<RgbaImage>),
    /// Synthetic numeric data, uploaded as an `R32F` 2D-array texture.
    FloatArray(Arc<FloatArray>),
}

impl TexturePayload {
    pub fn dimensions(&self) -> (u32, u32) {
        match self {
            TexturePayload::Image(image) => image.dimensions(),
            TexturePayload::FloatArray(array) => (array.width, array.height),
        }
    }
}

impl From<RgbaImage> for TexturePayload {
    fn from(image: RgbaImage) -> Self {
        TexturePayload::Image(Arc::new(image))
    }
}

impl From<FloatArray> for TexturePayload {
    fn from(array: FloatArray) -> Self {
        TexturePayload::FloatArray(Arc::new(array))
    }
}

/// Every channel's payload for one tile, in channel order.
pub type FetchedTileTextures = Vec<TexturePayload>;

/// Runtime value handed to [`crate::TileShaderEngine::set_uniform`].
#[derive(Debug, Clone, PartialEq)]
pub enum UniformValue {
    Scalar(f32),
    Vector(Vec<f32>),
}

impl UniformValue {
    pub fn components(&self) -> &[f32] {
        match self {
            UniformValue::Scalar(value) => std::slice::from_ref(value),
            UniformValue::Vector(values) => values,
        }
    }
}

impl From<f32> for UniformValue {
    fn from(value: f32) -> Self {
        UniformValue::Scalar(value)
    }
}

impl From<Vec<f32>> for UniformValue {
    fn from(values: Vec<f32>) -> Self {
        UniformValue::Vector(values)
    }
}

impl<const N: usize> From<[f32; N]> for UniformValue {
    fn from(values: [f32; N]) -> Self {
        UniformValue::Vector(values.to_vec())
    }
}

/// A named texture channel and the source that produces its tile images.
///
/// The name is the sampler uniform the fragment shader reads from.
#[derive(Clone)]
pub struct ChannelSpec {
    pub name: String,
    pub source: Arc<dyn TextureSource>,
}

impl fmt::Debug for ChannelSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelSpec")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Immutable configuration handed to the engine at construction.
#[derive(Clone, Debug)]
pub struct ProgramConfig {
    /// Vertex stage source in the WebGL dialect.
    pub vertex_shader: String,
    /// Fragment stage source in the WebGL dialect.
    pub fragment_shader: String,
    /// Uniform defaults: a number or an array of 1-4 numbers.
    pub uniforms: BTreeMap<String, serde_json::Value>,
    /// Texture channels in texture-unit order.
    pub channels: Vec<ChannelSpec>,
    /// Optional GPU extensions, requested best-effort.
    pub extensions: Vec<String>,
    /// Edge length of the square output tile in pixels.
    pub tile_size: u32,
    /// Delay between animation frames when the shader reads `u_Now`.
    pub frame_interval: Duration,
}

impl ProgramConfig {
    pub fn new(vertex_shader: impl Into<String>, fragment_shader: impl Into<String>) -> Self {
        Self {
            vertex_shader: vertex_shader.into(),
            fragment_shader: fragment_shader.into(),
            uniforms: BTreeMap::new(),
            channels: Vec::new(),
            extensions: Vec::new(),
            tile_size: DEFAULT_TILE_SIZE,
            frame_interval: DEFAULT_FRAME_INTERVAL,
        }
    }

    pub fn with_uniform(mut self, name: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.uniforms.insert(name.into(), value.into());
        self
    }

    pub fn with_channel(mut self, name: impl Into<String>, source: Arc<dyn TextureSource>) -> Self {
        self.channels.push(ChannelSpec {
            name: name.into(),
            source,
        });
        self
    }

    pub fn with_extension(mut self, name: impl Into<String>) -> Self {
        self.extensions.push(name.into());
        self
    }

    pub fn with_tile_size(mut self, tile_size: u32) -> Self {
        self.tile_size = tile_size;
        self
    }

    pub fn with_frame_interval(mut self, interval: Duration) -> Self {
        self.frame_interval = interval;
        self
    }
}
