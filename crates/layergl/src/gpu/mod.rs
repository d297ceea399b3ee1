//! GPU-facing half of the engine.
//!
//! Every rendering step talks to the GPU through an explicit [`GpuContext`]
//! value instead of ambient "current program / buffer / texture unit" state:
//! - `context` is the headless `wgpu` implementation used in production.
//! - `program` compiles and links the two shader stages and resolves the
//!   fixed attribute names.
//! - `uniforms` infers uniform arity from defaults and dispatches uploads.
//! - `geometry` owns the four quad buffers shared by every tile.
//! - `channels` binds fetched images or float arrays to texture units 0-7.
//!
//! The trait is deliberately shaped like the WebGL calls the engine needs so
//! a recording mock can stand in for the GPU in tests.

mod channels;
mod context;
mod geometry;
mod program;
mod uniforms;

#[cfg(test)]
pub(crate) mod mock;

pub(crate) use channels::ChannelBinder;
pub use channels::{ARRAY_TEXTURE_PARAMS, IMAGE_TEXTURE_PARAMS};
pub use context::{WgpuContext, WgpuOptions};
pub(crate) use geometry::GeometryBuffers;
pub use geometry::{crs_quad, lat_lng_quad, TEXTURE_QUAD, VERTEX_QUAD};
pub use program::{
    compile_and_link, AttributeLocations, CompiledProgram, ATTR_CRS_COORDS, ATTR_LAT_LNG_COORDS,
    ATTR_TEXTURE_COORDS, ATTR_VERTEX_COORDS, CLOCK_UNIFORM,
};
pub use uniforms::{UniformArity, UniformRegistry, UniformSpec};

use image::RgbaImage;

use crate::error::{GpuError, ShaderStage};
use crate::types::FloatArray;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShaderId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProgramId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UniformLocation(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Filter {
    Nearest,
    Linear,
}

/// Sampling state applied to a texture when its contents are uploaded.
/// Coordinates always clamp to the edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureParams {
    pub min_filter: Filter,
    pub mag_filter: Filter,
    /// Filter between mip levels; `None` samples the base level only.
    pub mipmap_filter: Option<Filter>,
    pub generate_mipmaps: bool,
}

/// Pixel data for [`GpuContext::upload_texture`].
#[derive(Debug, Clone, Copy)]
pub enum TextureUpload<'a> {
    /// 8-bit RGBA, bound as a 2D texture.
    Rgba8(&'a RgbaImage),
    /// Single-channel 32-bit floats, bound as a 2D-array texture.
    FloatArray(&'a FloatArray),
}

/// Explicit GPU state the engine renders through.
///
/// Implementations own every GPU object; the engine only holds handles.
/// Nothing here is reentrant: a draw must be read back before the next tile's
/// geometry is uploaded.
pub trait GpuContext {
    /// Requests an optional extension; returns whether it is available.
    fn request_extension(&mut self, name: &str) -> bool;

    /// Compiles one stage, returning the driver diagnostic on failure.
    fn compile_shader(&mut self, stage: ShaderStage, source: &str) -> Result<ShaderId, String>;

    /// Links two compiled stages into a program, returning the link log on failure.
    fn link_program(&mut self, vertex: ShaderId, fragment: ShaderId) -> Result<ProgramId, String>;

    fn delete_shader(&mut self, shader: ShaderId);

    fn delete_program(&mut self, program: ProgramId);

    fn use_program(&mut self, program: ProgramId);

    /// Location of a vertex attribute, or `None` when the stage does not declare it.
    fn attribute_location(&self, program: ProgramId, name: &str) -> Option<u32>;

    /// Location of a uniform, or `None` when no stage declares it.
    fn uniform_location(&self, program: ProgramId, name: &str) -> Option<UniformLocation>;

    /// Scalar float upload (`uniform1f`).
    fn uniform_1f(&mut self, location: UniformLocation, value: f32);

    /// Vector upload of `components` floats (`uniform{1,2,3,4}fv`).
    fn uniform_fv(&mut self, location: UniformLocation, components: usize, values: &[f32]);

    /// Points a sampler uniform at a texture unit (`uniform1i`).
    fn uniform_sampler(&mut self, location: UniformLocation, unit: u32);

    fn create_buffer(&mut self) -> BufferId;

    /// Replaces the whole contents of a vertex buffer.
    fn buffer_data(&mut self, buffer: BufferId, data: &[f32]);

    /// Feeds an attribute from a buffer of tightly packed `components`-wide floats.
    fn bind_attribute(&mut self, location: u32, buffer: BufferId, components: u32);

    fn create_texture(&mut self) -> TextureId;

    /// Uploads `data` into `texture` and binds it to texture unit `unit`.
    fn upload_texture(
        &mut self,
        unit: u32,
        texture: TextureId,
        data: TextureUpload<'_>,
        params: &TextureParams,
    );

    /// Sizes the render target, failing when the device cannot hold it.
    fn viewport(&mut self, width: u32, height: u32) -> Result<(), GpuError>;

    fn enable_blend(&mut self);

    /// Draws `vertex_count` vertices as a triangle strip with the current program.
    fn draw_triangle_strip(&mut self, vertex_count: u32) -> Result<(), GpuError>;

    /// Reads back the top-left `width` x `height` pixels of the render target.
    fn read_pixels(&mut self, width: u32, height: u32) -> Result<RgbaImage, GpuError>;

    /// Clears the color buffer to transparent black.
    fn clear(&mut self);
}
