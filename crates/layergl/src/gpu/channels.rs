use crate::types::TexturePayload;

use super::{CompiledProgram, Filter, GpuContext, TextureId, TextureParams, TextureUpload};

/// Imagery: linear filtering within the nearest mip level.
pub const IMAGE_TEXTURE_PARAMS: TextureParams = TextureParams {
    min_filter: Filter::Linear,
    mag_filter: Filter::Linear,
    mipmap_filter: Some(Filter::Nearest),
    generate_mipmaps: true,
};

/// Numeric data is sampled exactly.
pub const ARRAY_TEXTURE_PARAMS: TextureParams = TextureParams {
    min_filter: Filter::Nearest,
    mag_filter: Filter::Nearest,
    mipmap_filter: None,
    generate_mipmaps: false,
};

/// One texture object per channel, bound to the unit matching its index.
#[derive(Debug, Clone)]
pub(crate) struct ChannelBinder {
    textures: Vec<TextureId>,
}

impl ChannelBinder {
    /// Allocates the channel textures and points each sampler uniform at its unit.
    pub fn new(ctx: &mut dyn GpuContext, program: &CompiledProgram, names: &[String]) -> Self {
        let mut textures = Vec::with_capacity(names.len());
        for (unit, name) in names.iter().enumerate() {
            textures.push(ctx.create_texture());
            match ctx.uniform_location(program.id, name) {
                Some(location) => ctx.uniform_sampler(location, unit as u32),
                None => tracing::debug!(
                    channel = unit,
                    name = name.as_str(),
                    "shader does not declare a sampler for this channel"
                ),
            }
        }
        Self { textures }
    }

    pub fn len(&self) -> usize {
        self.textures.len()
    }

    /// Overwrites the channel textures with one tile's payloads, in channel order.
    pub fn bind(&self, ctx: &mut dyn GpuContext, payloads: &[TexturePayload]) {
        for (unit, (texture, payload)) in self.textures.iter().zip(payloads).enumerate() {
            let unit = unit as u32;
            match payload {
                TexturePayload::Image(image) => ctx.upload_texture(
                    unit,
                    *texture,
                    TextureUpload::Rgba8(image),
                    &IMAGE_TEXTURE_PARAMS,
                ),
                TexturePayload::FloatArray(array) => ctx.upload_texture(
                    unit,
                    *texture,
                    TextureUpload::FloatArray(array),
                    &ARRAY_TEXTURE_PARAMS,
                ),
            }
        }
    }
}
