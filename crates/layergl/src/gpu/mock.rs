//! Recording [`GpuContext`] with a CPU rasteriser for tests.
//!
//! Shader sources are parsed for their declarations only; what a "fragment
//! shader" computes is supplied as a Rust closure. Draws interpolate every
//! bound attribute across the quad (corners NE, NW, SE, SW with pixel row 0 at
//! the north edge) and evaluate the closure once per pixel.

use std::collections::HashMap;

use image::{imageops, Rgba, RgbaImage};

use crate::compile::{self, ProgramLayout, StageInterface};
use crate::error::{GpuError, ShaderStage};
use crate::types::FloatArray;

use super::{
    BufferId, GpuContext, ProgramId, ShaderId, TextureId, TextureParams, TextureUpload,
    UniformLocation,
};

pub(crate) const STANDARD_VERTEX: &str = r"
attribute vec2 a_VertexCoords;
attribute vec2 a_TextureCoords;
attribute vec2 a_CRSCoords;
attribute vec2 a_LatLngCoords;
varying vec2 v_TextureCoords;
varying vec2 v_CRSCoords;
varying vec2 v_LatLngCoords;
void main() {
    v_TextureCoords = a_TextureCoords;
    v_CRSCoords = a_CRSCoords;
    v_LatLngCoords = a_LatLngCoords;
    gl_Position = vec4(a_VertexCoords, 1.0, 1.0);
}
";

pub(crate) const PASS_THROUGH_FRAGMENT: &str = r"
precision highp float;
uniform sampler2D u_texture0;
varying vec2 v_TextureCoords;
void main() {
    gl_FragColor = texture2D(u_texture0, v_TextureCoords);
}
";

/// Same as wgpu's default `max_texture_dimension_2d`.
const MAX_TARGET_DIMENSION: u32 = 8192;

type FragmentFn = Box<dyn Fn(&FragmentInputs<'_>) -> [f32; 4]>;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum MockCall {
    RequestExtension(String),
    CompileShader(ShaderStage),
    LinkProgram(ProgramId),
    DeleteShader(ShaderId),
    DeleteProgram(ProgramId),
    UseProgram(ProgramId),
    Uniform1f {
        name: String,
        value: f32,
    },
    UniformFv {
        name: String,
        components: usize,
        values: Vec<f32>,
    },
    UniformSampler {
        name: String,
        unit: u32,
    },
    CreateBuffer(BufferId),
    BufferData {
        buffer: BufferId,
        data: Vec<f32>,
    },
    BindAttribute {
        location: u32,
        buffer: BufferId,
        components: u32,
    },
    CreateTexture(TextureId),
    UploadTexture {
        unit: u32,
        texture: TextureId,
        params: TextureParams,
        width: u32,
        height: u32,
    },
    Viewport(u32, u32),
    EnableBlend,
    Draw(u32),
    ReadPixels(u32, u32),
    Clear,
}

enum MockTexture {
    Image(RgbaImage),
    FloatArray(FloatArray),
}

struct MockProgram {
    vertex: StageInterface,
    layout: ProgramLayout,
}

/// Values visible to the per-pixel closure.
pub(crate) struct FragmentInputs<'a> {
    attributes: &'a HashMap<String, Vec<f32>>,
    mock: &'a MockContext,
}

impl FragmentInputs<'_> {
    /// Interpolated value of a vertex attribute, zero when unbound.
    pub fn attribute(&self, name: &str) -> [f32; 2] {
        match self.attributes.get(name) {
            Some(values) => [
                values.first().copied().unwrap_or(0.0),
                values.get(1).copied().unwrap_or(0.0),
            ],
            None => [0.0, 0.0],
        }
    }

    /// First component of a uniform's current value, zero when never uploaded.
    pub fn uniform(&self, name: &str) -> f32 {
        self.uniform_vec(name).first().copied().unwrap_or(0.0)
    }

    pub fn uniform_vec(&self, name: &str) -> &[f32] {
        self.mock
            .uniform_values
            .get(name)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Nearest-texel lookup through the unit a sampler uniform points at.
    pub fn sample(&self, sampler: &str, uv: [f32; 2]) -> [f32; 4] {
        let unit = self.mock.sampler_units.get(sampler).copied().unwrap_or(0);
        let texture = self
            .mock
            .units
            .get(&unit)
            .and_then(|id| self.mock.textures.get(id.0 as usize))
            .and_then(Option::as_ref);
        match texture {
            Some(MockTexture::Image(image)) => {
                let x = texel_index(uv[0], image.width());
                let y = texel_index(uv[1], image.height());
                let Rgba(pixel) = *image.get_pixel(x, y);
                pixel.map(|channel| f32::from(channel) / 255.0)
            }
            Some(MockTexture::FloatArray(array)) => {
                let x = texel_index(uv[0], array.width);
                let y = texel_index(uv[1], array.height);
                let value = array
                    .layers
                    .first()
                    .and_then(|layer| layer.get((y * array.width + x) as usize))
                    .copied()
                    .unwrap_or(0.0);
                [value, 0.0, 0.0, 1.0]
            }
            None => [1.0, 1.0, 1.0, 1.0],
        }
    }
}

fn texel_index(coord: f32, size: u32) -> u32 {
    let max = size.saturating_sub(1) as f32;
    (coord * size as f32).floor().clamp(0.0, max) as u32
}

fn to_rgba8(color: [f32; 4]) -> Rgba<u8> {
    Rgba(color.map(|channel| (channel.clamp(0.0, 1.0) * 255.0).round() as u8))
}

pub(crate) struct MockContext {
    calls: Vec<MockCall>,
    next_id: u32,
    shaders: HashMap<u32, (ShaderStage, StageInterface)>,
    programs: HashMap<u32, MockProgram>,
    locations: Vec<(ProgramId, String)>,
    current_program: Option<ProgramId>,
    uniform_values: HashMap<String, Vec<f32>>,
    sampler_units: HashMap<String, u32>,
    buffers: Vec<Vec<f32>>,
    attribute_bindings: HashMap<u32, (BufferId, u32)>,
    textures: Vec<Option<MockTexture>>,
    units: HashMap<u32, TextureId>,
    framebuffer: RgbaImage,
    supported_extensions: Vec<String>,
    fragment: FragmentFn,
    draw_failure: Option<String>,
    max_target: u32,
}

impl MockContext {
    /// A context whose fragment closure passes `u_texture0` through unchanged.
    pub fn new() -> Self {
        Self::with_fragment(|inputs| {
            inputs.sample("u_texture0", inputs.attribute("a_TextureCoords"))
        })
    }

    pub fn with_fragment(fragment: impl Fn(&FragmentInputs<'_>) -> [f32; 4] + 'static) -> Self {
        Self {
            calls: Vec::new(),
            next_id: 1,
            shaders: HashMap::new(),
            programs: HashMap::new(),
            locations: Vec::new(),
            current_program: None,
            uniform_values: HashMap::new(),
            sampler_units: HashMap::new(),
            buffers: Vec::new(),
            attribute_bindings: HashMap::new(),
            textures: Vec::new(),
            units: HashMap::new(),
            framebuffer: RgbaImage::new(0, 0),
            supported_extensions: vec![
                "OES_texture_float".to_string(),
                "OES_texture_float_linear".to_string(),
            ],
            fragment: Box::new(fragment),
            draw_failure: None,
            max_target: MAX_TARGET_DIMENSION,
        }
    }

    /// Makes the next draw report `reason` instead of rasterising.
    pub fn fail_next_draw(&mut self, reason: &str) {
        self.draw_failure = Some(reason.to_string());
    }

    /// Rejects render targets wider or taller than `max` texels.
    pub fn limit_target_size(&mut self, max: u32) {
        self.max_target = max;
    }

    pub fn calls(&self) -> &[MockCall] {
        &self.calls
    }

    pub fn count(&self, predicate: impl Fn(&MockCall) -> bool) -> usize {
        self.calls.iter().filter(|call| predicate(call)).count()
    }

    pub fn clear_calls(&mut self) {
        self.calls.clear();
    }

    pub fn sampler_unit(&self, name: &str) -> Option<u32> {
        self.sampler_units.get(name).copied()
    }

    pub fn uniform_value(&self, name: &str) -> Option<&[f32]> {
        self.uniform_values.get(name).map(Vec::as_slice)
    }

    fn allocate_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn location_name(&self, location: UniformLocation) -> Option<String> {
        self.locations
            .get(location.0 as usize)
            .map(|(_, name)| name.clone())
    }

    fn interpolated_quads(&self, program: &MockProgram) -> Result<Vec<(String, usize, Vec<f32>)>, GpuError> {
        let mut quads = Vec::new();
        for decl in &program.vertex.attributes {
            let Some(location) = compile::attribute_location(&program.vertex, &decl.name) else {
                continue;
            };
            let (buffer, components) = self.attribute_bindings.get(&location).copied().ok_or_else(
                || GpuError(format!("attribute location {location} has no buffer bound")),
            )?;
            let data = self
                .buffers
                .get(buffer.0 as usize)
                .cloned()
                .ok_or_else(|| GpuError(format!("buffer {} has no data", buffer.0)))?;
            let components = components as usize;
            if data.len() < components * 4 {
                return Err(GpuError(format!(
                    "buffer {} holds {} floats, the quad needs {}",
                    buffer.0,
                    data.len(),
                    components * 4
                )));
            }
            quads.push((decl.name.clone(), components, data));
        }
        Ok(quads)
    }
}

impl GpuContext for MockContext {
    fn request_extension(&mut self, name: &str) -> bool {
        self.calls.push(MockCall::RequestExtension(name.to_string()));
        self.supported_extensions.iter().any(|supported| supported == name)
    }

    fn compile_shader(&mut self, stage: ShaderStage, source: &str) -> Result<ShaderId, String> {
        self.calls.push(MockCall::CompileShader(stage));
        if let Some(line) = source.lines().find(|line| line.trim_start().starts_with("#error")) {
            return Err(line.trim_start().trim_start_matches("#error").trim().to_string());
        }
        let interface = compile::parse_stage(stage, source)?;
        let id = self.allocate_id();
        self.shaders.insert(id, (stage, interface));
        Ok(ShaderId(id))
    }

    fn link_program(&mut self, vertex: ShaderId, fragment: ShaderId) -> Result<ProgramId, String> {
        let (_, vertex_interface) = self
            .shaders
            .get(&vertex.0)
            .cloned()
            .ok_or_else(|| format!("unknown shader {}", vertex.0))?;
        let (_, fragment_interface) = self
            .shaders
            .get(&fragment.0)
            .cloned()
            .ok_or_else(|| format!("unknown shader {}", fragment.0))?;
        let layout = compile::link_interfaces(&vertex_interface, &fragment_interface)?;

        let id = ProgramId(self.allocate_id());
        for decl in layout.uniforms.iter().chain(&layout.samplers) {
            self.locations.push((id, decl.name.clone()));
        }
        self.programs.insert(
            id.0,
            MockProgram {
                vertex: vertex_interface,
                layout,
            },
        );
        self.calls.push(MockCall::LinkProgram(id));
        Ok(id)
    }

    fn delete_shader(&mut self, shader: ShaderId) {
        self.calls.push(MockCall::DeleteShader(shader));
        self.shaders.remove(&shader.0);
    }

    fn delete_program(&mut self, program: ProgramId) {
        self.calls.push(MockCall::DeleteProgram(program));
        self.programs.remove(&program.0);
    }

    fn use_program(&mut self, program: ProgramId) {
        self.calls.push(MockCall::UseProgram(program));
        self.current_program = Some(program);
    }

    fn attribute_location(&self, program: ProgramId, name: &str) -> Option<u32> {
        let program = self.programs.get(&program.0)?;
        compile::attribute_location(&program.vertex, name)
    }

    fn uniform_location(&self, program: ProgramId, name: &str) -> Option<UniformLocation> {
        let linked = self.programs.get(&program.0)?;
        if linked.layout.uniform_slot(name).is_none() && linked.layout.sampler_slot(name).is_none()
        {
            return None;
        }
        self.locations
            .iter()
            .position(|(owner, declared)| *owner == program && declared == name)
            .map(|index| UniformLocation(index as u32))
    }

    fn uniform_1f(&mut self, location: UniformLocation, value: f32) {
        if let Some(name) = self.location_name(location) {
            self.calls.push(MockCall::Uniform1f {
                name: name.clone(),
                value,
            });
            self.uniform_values.insert(name, vec![value]);
        }
    }

    fn uniform_fv(&mut self, location: UniformLocation, components: usize, values: &[f32]) {
        if let Some(name) = self.location_name(location) {
            let values: Vec<f32> = values.iter().copied().take(components).collect();
            self.calls.push(MockCall::UniformFv {
                name: name.clone(),
                components,
                values: values.clone(),
            });
            self.uniform_values.insert(name, values);
        }
    }

    fn uniform_sampler(&mut self, location: UniformLocation, unit: u32) {
        if let Some(name) = self.location_name(location) {
            self.calls.push(MockCall::UniformSampler {
                name: name.clone(),
                unit,
            });
            self.sampler_units.insert(name, unit);
        }
    }

    fn create_buffer(&mut self) -> BufferId {
        self.buffers.push(Vec::new());
        let id = BufferId(self.buffers.len() as u32 - 1);
        self.calls.push(MockCall::CreateBuffer(id));
        id
    }

    fn buffer_data(&mut self, buffer: BufferId, data: &[f32]) {
        self.calls.push(MockCall::BufferData {
            buffer,
            data: data.to_vec(),
        });
        if let Some(slot) = self.buffers.get_mut(buffer.0 as usize) {
            *slot = data.to_vec();
        }
    }

    fn bind_attribute(&mut self, location: u32, buffer: BufferId, components: u32) {
        self.calls.push(MockCall::BindAttribute {
            location,
            buffer,
            components,
        });
        self.attribute_bindings.insert(location, (buffer, components));
    }

    fn create_texture(&mut self) -> TextureId {
        self.textures.push(None);
        let id = TextureId(self.textures.len() as u32 - 1);
        self.calls.push(MockCall::CreateTexture(id));
        id
    }

    fn upload_texture(
        &mut self,
        unit: u32,
        texture: TextureId,
        data: TextureUpload<'_>,
        params: &TextureParams,
    ) {
        let (stored, (width, height)) = match data {
            TextureUpload::Rgba8(image) => (MockTexture::Image(image.clone()), image.dimensions()),
            TextureUpload::FloatArray(array) => (
                MockTexture::FloatArray(array.clone()),
                (array.width, array.height),
            ),
        };
        self.calls.push(MockCall::UploadTexture {
            unit,
            texture,
            params: *params,
            width,
            height,
        });
        if let Some(slot) = self.textures.get_mut(texture.0 as usize) {
            *slot = Some(stored);
        }
        self.units.insert(unit, texture);
    }

    fn viewport(&mut self, width: u32, height: u32) -> Result<(), GpuError> {
        self.calls.push(MockCall::Viewport(width, height));
        if width.max(height) > self.max_target {
            return Err(GpuError(format!(
                "render target {width}x{height} exceeds the {} texel limit",
                self.max_target
            )));
        }
        if self.framebuffer.dimensions() != (width, height) {
            self.framebuffer = RgbaImage::new(width, height);
        }
        Ok(())
    }

    fn enable_blend(&mut self) {
        self.calls.push(MockCall::EnableBlend);
    }

    fn draw_triangle_strip(&mut self, vertex_count: u32) -> Result<(), GpuError> {
        self.calls.push(MockCall::Draw(vertex_count));
        if let Some(reason) = self.draw_failure.take() {
            return Err(GpuError(reason));
        }
        let program = self
            .current_program
            .and_then(|id| self.programs.get(&id.0))
            .ok_or_else(|| GpuError("draw issued without a program in use".to_string()))?;
        let quads = self.interpolated_quads(program)?;

        let (width, height) = self.framebuffer.dimensions();
        let mut pixels = Vec::with_capacity((width * height) as usize);
        let mut attributes = HashMap::new();
        for py in 0..height {
            let v = (py as f32 + 0.5) / height as f32;
            for px in 0..width {
                let u = (px as f32 + 0.5) / width as f32;
                for (name, components, data) in &quads {
                    let corner = |index: usize, k: usize| data[index * components + k];
                    let value: Vec<f32> = (0..*components)
                        .map(|k| {
                            let north = lerp(corner(1, k), corner(0, k), u);
                            let south = lerp(corner(3, k), corner(2, k), u);
                            lerp(north, south, v)
                        })
                        .collect();
                    attributes.insert(name.clone(), value);
                }
                let inputs = FragmentInputs {
                    attributes: &attributes,
                    mock: self,
                };
                pixels.push(to_rgba8((self.fragment)(&inputs)));
            }
        }

        for (index, pixel) in pixels.into_iter().enumerate() {
            let index = index as u32;
            self.framebuffer.put_pixel(index % width, index / width, pixel);
        }
        Ok(())
    }

    fn read_pixels(&mut self, width: u32, height: u32) -> Result<RgbaImage, GpuError> {
        self.calls.push(MockCall::ReadPixels(width, height));
        let (fb_width, fb_height) = self.framebuffer.dimensions();
        if width > fb_width || height > fb_height {
            return Err(GpuError(format!(
                "readback of {width}x{height} exceeds the {fb_width}x{fb_height} target"
            )));
        }
        Ok(imageops::crop_imm(&self.framebuffer, 0, 0, width, height).to_image())
    }

    fn clear(&mut self) {
        self.calls.push(MockCall::Clear);
        for pixel in self.framebuffer.pixels_mut() {
            *pixel = Rgba([0, 0, 0, 0]);
        }
    }
}

fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t
}
