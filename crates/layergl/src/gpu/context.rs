use std::borrow::Cow;
use std::collections::HashMap;

use anyhow::{Context as AnyhowContext, Result};
use image::imageops::{self, FilterType};
use image::RgbaImage;
use wgpu::util::DeviceExt;

use crate::compile::{self, ProgramLayout, SamplerKind, StageInterface};
use crate::error::{GpuError, ShaderStage};
use crate::types::FloatArray;

use super::{
    BufferId, Filter, GpuContext, ProgramId, ShaderId, TextureId, TextureParams, TextureUpload,
    UniformLocation,
};

const TARGET_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;
const FLOAT_TEXTURE_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::R32Float;

/// Float arrays always carry a spare zeroed layer. The GL backend treats a
/// single-layer texture as plain 2D and samples zeros through an array view.
const MIN_ARRAY_LAYERS: u32 = 2;

/// Adapter selection for [`WgpuContext::new`].
#[derive(Debug, Clone, Copy, Default)]
pub struct WgpuOptions {
    pub high_performance: bool,
    /// Prefer a software adapter (useful on machines without a GPU).
    pub force_fallback_adapter: bool,
}

/// Headless [`GpuContext`] backed by `wgpu`.
///
/// Draws go to an offscreen `Rgba8Unorm` target sized by [`GpuContext::viewport`]
/// and are read back through a mapped staging buffer.
pub struct WgpuContext {
    device: wgpu::Device,
    queue: wgpu::Queue,
    features: wgpu::Features,
    uniform_layout: wgpu::BindGroupLayout,
    placeholder_image: TextureBinding,
    placeholder_array: TextureBinding,
    shaders: HashMap<u32, CompiledStage>,
    programs: HashMap<u32, LinkedProgram>,
    locations: Vec<LocationTarget>,
    buffers: Vec<Option<VertexBuffer>>,
    attribute_bindings: HashMap<u32, (BufferId, u32)>,
    textures: Vec<Option<GpuTexture>>,
    units: HashMap<u32, TextureId>,
    target: Option<RenderTarget>,
    current_program: Option<ProgramId>,
    next_id: u32,
}

struct CompiledStage {
    stage: ShaderStage,
    interface: StageInterface,
}

struct LinkedProgram {
    pipeline: wgpu::RenderPipeline,
    sampler_layout: wgpu::BindGroupLayout,
    uniform_buffer: wgpu::Buffer,
    uniform_bind_group: wgpu::BindGroup,
    slot_values: Vec<[f32; 4]>,
    dirty: bool,
    layout: ProgramLayout,
    vertex_interface: StageInterface,
    /// Attributes in pipeline vertex-buffer order: (location, components).
    attributes: Vec<(u32, u32)>,
    sampler_units: Vec<u32>,
    uniform_locations: HashMap<String, UniformLocation>,
}

#[derive(Debug, Clone, Copy)]
enum LocationTarget {
    Slot { program: u32, slot: usize },
    Sampler { program: u32, slot: usize },
}

struct VertexBuffer {
    buffer: wgpu::Buffer,
    size: u64,
}

struct TextureBinding {
    view: wgpu::TextureView,
    sampler: wgpu::Sampler,
}

struct GpuTexture {
    texture: wgpu::Texture,
    binding: TextureBinding,
    kind: SamplerKind,
    extent: wgpu::Extent3d,
    mip_level_count: u32,
    params: TextureParams,
}

struct RenderTarget {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    width: u32,
    height: u32,
}

impl WgpuContext {
    /// Brings up a headless adapter and device.
    pub fn new(options: WgpuOptions) -> Result<Self> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            flags: wgpu::InstanceFlags::default(),
            memory_budget_thresholds: wgpu::MemoryBudgetThresholds::default(),
            backend_options: wgpu::BackendOptions::default(),
        });

        let power_preference = if options.high_performance {
            wgpu::PowerPreference::HighPerformance
        } else {
            wgpu::PowerPreference::LowPower
        };
        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference,
            compatible_surface: None,
            force_fallback_adapter: options.force_fallback_adapter,
        }))
        .context("failed to find a suitable GPU adapter")?;

        let info = adapter.get_info();
        tracing::debug!(
            name = %info.name,
            backend = ?info.backend,
            device_type = ?info.device_type,
            "selected GPU adapter"
        );

        let required_features = adapter.features() & wgpu::Features::FLOAT32_FILTERABLE;
        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("layergl device"),
            required_features,
            required_limits: adapter.limits(),
            memory_hints: wgpu::MemoryHints::MemoryUsage,
            trace: wgpu::Trace::default(),
        }))
        .context("failed to create GPU device")?;

        let uniform_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("layer uniform layout"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            }],
        });

        let placeholder_image = create_placeholder(&device, &queue, SamplerKind::Image);
        let placeholder_array = create_placeholder(&device, &queue, SamplerKind::FloatArray);

        Ok(Self {
            device,
            queue,
            features: required_features,
            uniform_layout,
            placeholder_image,
            placeholder_array,
            shaders: HashMap::new(),
            programs: HashMap::new(),
            locations: Vec::new(),
            buffers: Vec::new(),
            attribute_bindings: HashMap::new(),
            textures: Vec::new(),
            units: HashMap::new(),
            target: None,
            current_program: None,
            next_id: 1,
        })
    }

    fn allocate_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn build_program(
        &self,
        vertex: &CompiledStage,
        fragment: &CompiledStage,
    ) -> Result<LinkedProgram, String> {
        let layout = compile::link_interfaces(&vertex.interface, &fragment.interface)?;
        let vertex_source = compile::emit_stage(ShaderStage::Vertex, &vertex.interface, &layout);
        let fragment_source =
            compile::emit_stage(ShaderStage::Fragment, &fragment.interface, &layout);

        self.device.push_error_scope(wgpu::ErrorFilter::Validation);

        let vertex_module = self.device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("layer vertex"),
            source: wgpu::ShaderSource::Glsl {
                shader: Cow::Owned(vertex_source),
                stage: wgpu::naga::ShaderStage::Vertex,
                defines: &[],
            },
        });
        let fragment_module = self.device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("layer fragment"),
            source: wgpu::ShaderSource::Glsl {
                shader: Cow::Owned(fragment_source),
                stage: wgpu::naga::ShaderStage::Fragment,
                defines: &[],
            },
        });

        let sampler_layout = self
            .device
            .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("layer channel layout"),
                entries: &sampler_layout_entries(&layout),
            });
        let pipeline_layout = self
            .device
            .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("layer pipeline layout"),
                bind_group_layouts: &[&self.uniform_layout, &sampler_layout],
                push_constant_ranges: &[],
            });

        let mut attributes = Vec::with_capacity(vertex.interface.attributes.len());
        for decl in &vertex.interface.attributes {
            if let Some(location) = compile::attribute_location(&vertex.interface, &decl.name) {
                attributes.push((location, decl.components()));
            }
        }
        let vertex_attributes: Vec<[wgpu::VertexAttribute; 1]> = attributes
            .iter()
            .map(|&(location, components)| {
                [wgpu::VertexAttribute {
                    format: vertex_format(components),
                    offset: 0,
                    shader_location: location,
                }]
            })
            .collect();
        let vertex_buffers: Vec<wgpu::VertexBufferLayout<'_>> = attributes
            .iter()
            .zip(&vertex_attributes)
            .map(|(&(_, components), attribute)| wgpu::VertexBufferLayout {
                array_stride: u64::from(components) * 4,
                step_mode: wgpu::VertexStepMode::Vertex,
                attributes: attribute,
            })
            .collect();

        let pipeline = self
            .device
            .create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some("layer pipeline"),
                layout: Some(&pipeline_layout),
                vertex: wgpu::VertexState {
                    module: &vertex_module,
                    entry_point: Some("main"),
                    buffers: &vertex_buffers,
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                },
                primitive: wgpu::PrimitiveState {
                    topology: wgpu::PrimitiveTopology::TriangleStrip,
                    strip_index_format: None,
                    front_face: wgpu::FrontFace::Ccw,
                    cull_mode: None,
                    polygon_mode: wgpu::PolygonMode::Fill,
                    unclipped_depth: false,
                    conservative: false,
                },
                depth_stencil: None,
                multisample: wgpu::MultisampleState::default(),
                fragment: Some(wgpu::FragmentState {
                    module: &fragment_module,
                    entry_point: Some("main"),
                    targets: &[Some(wgpu::ColorTargetState {
                        format: TARGET_FORMAT,
                        blend: Some(wgpu::BlendState::REPLACE),
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                }),
                multiview: None,
                cache: None,
            });

        if let Some(error) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(error.to_string());
        }

        let slot_values = vec![[0.0f32; 4]; layout.uniforms.len().max(1)];
        let uniform_buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("layer uniforms"),
                contents: bytemuck::cast_slice(&slot_values),
                usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            });
        let uniform_bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("layer uniform bind group"),
            layout: &self.uniform_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: uniform_buffer.as_entire_binding(),
            }],
        });

        Ok(LinkedProgram {
            pipeline,
            sampler_layout,
            uniform_buffer,
            uniform_bind_group,
            slot_values,
            dirty: false,
            sampler_units: vec![0; layout.samplers.len()],
            layout,
            vertex_interface: vertex.interface.clone(),
            attributes,
            uniform_locations: HashMap::new(),
        })
    }

    fn write_slot(&mut self, location: UniformLocation, values: &[f32]) {
        let Some(LocationTarget::Slot { program, slot }) =
            self.locations.get(location.0 as usize).copied()
        else {
            tracing::debug!(location = location.0, "value upload to a non-value location ignored");
            return;
        };
        if let Some(linked) = self.programs.get_mut(&program) {
            let mut padded = [0.0f32; 4];
            for (dst, src) in padded.iter_mut().zip(values) {
                *dst = *src;
            }
            linked.slot_values[slot] = padded;
            linked.dirty = true;
        }
    }

    fn texture_binding(&self, unit: u32, kind: SamplerKind) -> &TextureBinding {
        let bound = self
            .units
            .get(&unit)
            .and_then(|id| self.textures.get(id.0 as usize))
            .and_then(Option::as_ref)
            .filter(|texture| texture.kind == kind);
        match (bound, kind) {
            (Some(texture), _) => &texture.binding,
            (None, SamplerKind::Image) => &self.placeholder_image,
            (None, SamplerKind::FloatArray) => &self.placeholder_array,
        }
    }

    fn ensure_texture(
        &mut self,
        texture: TextureId,
        kind: SamplerKind,
        extent: wgpu::Extent3d,
        mip_level_count: u32,
        params: &TextureParams,
    ) {
        let reusable = self
            .textures
            .get(texture.0 as usize)
            .and_then(Option::as_ref)
            .is_some_and(|existing| {
                existing.kind == kind
                    && existing.extent == extent
                    && existing.mip_level_count == mip_level_count
                    && existing.params == *params
            });
        if reusable {
            return;
        }

        let (format, view_dimension) = match kind {
            SamplerKind::Image => (TARGET_FORMAT, wgpu::TextureViewDimension::D2),
            SamplerKind::FloatArray => (FLOAT_TEXTURE_FORMAT, wgpu::TextureViewDimension::D2Array),
        };
        let gpu_texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(&format!("layer channel texture #{}", texture.0)),
            size: extent,
            mip_level_count,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        let view = gpu_texture.create_view(&wgpu::TextureViewDescriptor {
            dimension: Some(view_dimension),
            ..Default::default()
        });
        let sampler = create_sampler(&self.device, params);

        let index = texture.0 as usize;
        if self.textures.len() <= index {
            self.textures.resize_with(index + 1, || None);
        }
        self.textures[index] = Some(GpuTexture {
            texture: gpu_texture,
            binding: TextureBinding { view, sampler },
            kind,
            extent,
            mip_level_count,
            params: *params,
        });
    }

    fn write_level(
        &self,
        texture: &wgpu::Texture,
        level: u32,
        data: &[u8],
        extent: wgpu::Extent3d,
        bytes_per_texel: u32,
    ) {
        self.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture,
                mip_level: level,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            data,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(extent.width * bytes_per_texel),
                rows_per_image: Some(extent.height),
            },
            extent,
        );
    }

    fn ensure_target(&mut self, width: u32, height: u32) -> Result<(), GpuError> {
        if self
            .target
            .as_ref()
            .is_some_and(|target| target.width == width && target.height == height)
        {
            return Ok(());
        }
        self.target = None;
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("layer render target"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: TARGET_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        if let Some(error) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(GpuError(format!(
                "cannot create a {width}x{height} render target: {error}"
            )));
        }
        self.target = Some(RenderTarget {
            texture,
            view,
            width,
            height,
        });
        Ok(())
    }
}

impl GpuContext for WgpuContext {
    fn request_extension(&mut self, name: &str) -> bool {
        match name {
            "OES_texture_float" => true,
            "OES_texture_float_linear" => {
                self.features.contains(wgpu::Features::FLOAT32_FILTERABLE)
            }
            other => {
                tracing::debug!(extension = other, "unknown extension requested; ignoring");
                false
            }
        }
    }

    fn compile_shader(&mut self, stage: ShaderStage, source: &str) -> Result<ShaderId, String> {
        let interface = compile::parse_stage(stage, source)?;
        let wrapped = compile::emit_stage(stage, &interface, &ProgramLayout::for_stage(&interface));

        let naga_stage = match stage {
            ShaderStage::Vertex => wgpu::naga::ShaderStage::Vertex,
            ShaderStage::Fragment => wgpu::naga::ShaderStage::Fragment,
        };
        let mut frontend = wgpu::naga::front::glsl::Frontend::default();
        frontend
            .parse(&wgpu::naga::front::glsl::Options::from(naga_stage), &wrapped)
            .map_err(|errors| errors.emit_to_string(&wrapped))?;

        let id = self.allocate_id();
        self.shaders.insert(id, CompiledStage { stage, interface });
        Ok(ShaderId(id))
    }

    fn link_program(&mut self, vertex: ShaderId, fragment: ShaderId) -> Result<ProgramId, String> {
        let vertex_stage = self
            .shaders
            .remove(&vertex.0)
            .ok_or_else(|| format!("unknown vertex shader {}", vertex.0))?;
        let fragment_stage = match self.shaders.remove(&fragment.0) {
            Some(stage) => stage,
            None => {
                self.shaders.insert(vertex.0, vertex_stage);
                return Err(format!("unknown fragment shader {}", fragment.0));
            }
        };
        let result = if vertex_stage.stage == ShaderStage::Vertex
            && fragment_stage.stage == ShaderStage::Fragment
        {
            self.build_program(&vertex_stage, &fragment_stage)
        } else {
            Err("shader stages passed in the wrong order".to_string())
        };
        self.shaders.insert(vertex.0, vertex_stage);
        self.shaders.insert(fragment.0, fragment_stage);
        let mut program = result?;

        let id = self.allocate_id();
        for (slot, decl) in program.layout.uniforms.iter().enumerate() {
            let location = UniformLocation(self.locations.len() as u32);
            self.locations.push(LocationTarget::Slot { program: id, slot });
            program.uniform_locations.insert(decl.name.clone(), location);
        }
        for (slot, decl) in program.layout.samplers.iter().enumerate() {
            let location = UniformLocation(self.locations.len() as u32);
            self.locations.push(LocationTarget::Sampler { program: id, slot });
            program.uniform_locations.insert(decl.name.clone(), location);
        }
        self.programs.insert(id, program);
        Ok(ProgramId(id))
    }

    fn delete_shader(&mut self, shader: ShaderId) {
        self.shaders.remove(&shader.0);
    }

    fn delete_program(&mut self, program: ProgramId) {
        self.programs.remove(&program.0);
        if self.current_program == Some(program) {
            self.current_program = None;
        }
    }

    fn use_program(&mut self, program: ProgramId) {
        self.current_program = Some(program);
    }

    fn attribute_location(&self, program: ProgramId, name: &str) -> Option<u32> {
        let linked = self.programs.get(&program.0)?;
        compile::attribute_location(&linked.vertex_interface, name)
    }

    fn uniform_location(&self, program: ProgramId, name: &str) -> Option<UniformLocation> {
        self.programs
            .get(&program.0)?
            .uniform_locations
            .get(name)
            .copied()
    }

    fn uniform_1f(&mut self, location: UniformLocation, value: f32) {
        self.write_slot(location, &[value]);
    }

    fn uniform_fv(&mut self, location: UniformLocation, components: usize, values: &[f32]) {
        let take = components.min(values.len()).min(4);
        self.write_slot(location, &values[..take]);
    }

    fn uniform_sampler(&mut self, location: UniformLocation, unit: u32) {
        if let Some(LocationTarget::Sampler { program, slot }) =
            self.locations.get(location.0 as usize).copied()
        {
            if let Some(linked) = self.programs.get_mut(&program) {
                linked.sampler_units[slot] = unit;
            }
        }
    }

    fn create_buffer(&mut self) -> BufferId {
        self.buffers.push(None);
        BufferId(self.buffers.len() as u32 - 1)
    }

    fn buffer_data(&mut self, buffer: BufferId, data: &[f32]) {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        let Some(slot) = self.buffers.get_mut(buffer.0 as usize) else {
            tracing::warn!(buffer = buffer.0, "upload to unknown buffer ignored");
            return;
        };
        match slot {
            Some(existing) if existing.size == bytes.len() as u64 => {
                self.queue.write_buffer(&existing.buffer, 0, bytes);
            }
            _ => {
                let created = self
                    .device
                    .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                        label: Some(&format!("layer vertex buffer #{}", buffer.0)),
                        contents: bytes,
                        usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
                    });
                *slot = Some(VertexBuffer {
                    buffer: created,
                    size: bytes.len() as u64,
                });
            }
        }
    }

    fn bind_attribute(&mut self, location: u32, buffer: BufferId, components: u32) {
        self.attribute_bindings.insert(location, (buffer, components));
    }

    fn create_texture(&mut self) -> TextureId {
        self.textures.push(None);
        TextureId(self.textures.len() as u32 - 1)
    }

    fn upload_texture(
        &mut self,
        unit: u32,
        texture: TextureId,
        data: TextureUpload<'_>,
        params: &TextureParams,
    ) {
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        match data {
            TextureUpload::Rgba8(image) => {
                let (width, height) = image.dimensions();
                let mip_level_count = if params.generate_mipmaps {
                    u32::BITS - width.max(height).max(1).leading_zeros()
                } else {
                    1
                };
                let extent = wgpu::Extent3d {
                    width: width.max(1),
                    height: height.max(1),
                    depth_or_array_layers: 1,
                };
                self.ensure_texture(texture, SamplerKind::Image, extent, mip_level_count, params);
                if let Some(Some(gpu)) = self.textures.get(texture.0 as usize) {
                    self.write_level(&gpu.texture, 0, image.as_raw(), extent, 4);
                    let mut level_image = (*image).clone();
                    for level in 1..mip_level_count {
                        let next_width = (level_image.width() / 2).max(1);
                        let next_height = (level_image.height() / 2).max(1);
                        level_image = imageops::resize(
                            &level_image,
                            next_width,
                            next_height,
                            FilterType::Triangle,
                        );
                        let level_extent = wgpu::Extent3d {
                            width: next_width,
                            height: next_height,
                            depth_or_array_layers: 1,
                        };
                        self.write_level(&gpu.texture, level, level_image.as_raw(), level_extent, 4);
                    }
                }
            }
            TextureUpload::FloatArray(array) => {
                let extent = float_array_extent(array);
                self.ensure_texture(texture, SamplerKind::FloatArray, extent, 1, params);
                let texels = float_array_texels(array, extent);
                if let Some(Some(gpu)) = self.textures.get(texture.0 as usize) {
                    self.write_level(&gpu.texture, 0, bytemuck::cast_slice(&texels), extent, 4);
                }
            }
        }
        if let Some(error) = pollster::block_on(self.device.pop_error_scope()) {
            tracing::warn!(texture = texture.0, %error, "texture upload failed");
        }
        self.units.insert(unit, texture);
    }

    fn viewport(&mut self, width: u32, height: u32) -> Result<(), GpuError> {
        self.ensure_target(width.max(1), height.max(1))
    }

    // Pipelines are built with the (ONE, ZERO) blend GL starts out with, so
    // enabling blending leaves the output unchanged.
    fn enable_blend(&mut self) {}

    fn draw_triangle_strip(&mut self, vertex_count: u32) -> Result<(), GpuError> {
        let program_id = self
            .current_program
            .ok_or_else(|| GpuError("draw issued without a program in use".to_string()))?;
        let Some(linked) = self.programs.get_mut(&program_id.0) else {
            return Err(GpuError(format!("program {} no longer exists", program_id.0)));
        };
        if linked.dirty {
            self.queue.write_buffer(
                &linked.uniform_buffer,
                0,
                bytemuck::cast_slice(&linked.slot_values),
            );
            linked.dirty = false;
        }

        let linked = &self.programs[&program_id.0];
        let target = self
            .target
            .as_ref()
            .ok_or_else(|| GpuError("draw issued before a viewport was set".to_string()))?;

        let bindings: Vec<&TextureBinding> = linked
            .layout
            .samplers
            .iter()
            .zip(&linked.sampler_units)
            .map(|(decl, unit)| self.texture_binding(*unit, decl.sampler_kind()))
            .collect();
        let mut entries = Vec::with_capacity(bindings.len() * 2);
        for (index, binding) in bindings.iter().enumerate() {
            entries.push(wgpu::BindGroupEntry {
                binding: (index as u32) * 2,
                resource: wgpu::BindingResource::TextureView(&binding.view),
            });
            entries.push(wgpu::BindGroupEntry {
                binding: (index as u32) * 2 + 1,
                resource: wgpu::BindingResource::Sampler(&binding.sampler),
            });
        }

        let mut vertex_buffers = Vec::with_capacity(linked.attributes.len());
        for &(location, components) in &linked.attributes {
            let (buffer, bound_components) =
                self.attribute_bindings.get(&location).copied().ok_or_else(|| {
                    GpuError(format!("attribute location {location} has no buffer bound"))
                })?;
            if bound_components != components {
                return Err(GpuError(format!(
                    "attribute location {location} expects {components} components, buffer provides {bound_components}"
                )));
            }
            let buffer = self
                .buffers
                .get(buffer.0 as usize)
                .and_then(Option::as_ref)
                .ok_or_else(|| GpuError(format!("buffer {} has no data", buffer.0)))?;
            vertex_buffers.push(&buffer.buffer);
        }

        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let channel_bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("layer channel bind group"),
            layout: &linked.sampler_layout,
            entries: &entries,
        });
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("layer draw encoder"),
            });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("layer draw pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &target.view,
                    depth_slice: None,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Load,
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            pass.set_viewport(0.0, 0.0, target.width as f32, target.height as f32, 0.0, 1.0);
            pass.set_pipeline(&linked.pipeline);
            pass.set_bind_group(0, &linked.uniform_bind_group, &[]);
            pass.set_bind_group(1, &channel_bind_group, &[]);
            for (slot, buffer) in vertex_buffers.iter().enumerate() {
                pass.set_vertex_buffer(slot as u32, buffer.slice(..));
            }
            pass.draw(0..vertex_count, 0..1);
        }
        self.queue.submit(std::iter::once(encoder.finish()));
        match pollster::block_on(self.device.pop_error_scope()) {
            Some(error) => Err(GpuError(error.to_string())),
            None => Ok(()),
        }
    }

    fn read_pixels(&mut self, width: u32, height: u32) -> Result<RgbaImage, GpuError> {
        let target = self
            .target
            .as_ref()
            .ok_or_else(|| GpuError("readback issued before a viewport was set".to_string()))?;
        if width > target.width || height > target.height {
            return Err(GpuError(format!(
                "readback of {width}x{height} exceeds the {}x{} target",
                target.width, target.height
            )));
        }

        let unpadded_bytes_per_row = width * 4;
        let bytes_per_row = unpadded_bytes_per_row.div_ceil(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT)
            * wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("layer readback buffer"),
            size: u64::from(bytes_per_row) * u64::from(height),
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("layer readback encoder"),
            });
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: &target.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &staging,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(bytes_per_row),
                    rows_per_image: Some(height),
                },
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        self.queue.submit(std::iter::once(encoder.finish()));

        let slice = staging.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        self.device
            .poll(wgpu::PollType::Wait)
            .map_err(|err| GpuError(format!("device poll failed: {err}")))?;
        rx.recv()
            .map_err(|_| GpuError("readback callback never fired".to_string()))?
            .map_err(|err| GpuError(format!("failed to map readback buffer: {err}")))?;

        let data = slice.get_mapped_range();
        let mut pixels = Vec::with_capacity((unpadded_bytes_per_row * height) as usize);
        for row in 0..height {
            let start = (row * bytes_per_row) as usize;
            let end = start + unpadded_bytes_per_row as usize;
            pixels.extend_from_slice(&data[start..end]);
        }
        drop(data);
        staging.unmap();

        RgbaImage::from_raw(width, height, pixels)
            .ok_or_else(|| GpuError("readback produced a short pixel buffer".to_string()))
    }

    fn clear(&mut self) {
        let Some(target) = self.target.as_ref() else {
            return;
        };
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("layer clear encoder"),
            });
        let pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("layer clear pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: &target.view,
                depth_slice: None,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        drop(pass);
        self.queue.submit(std::iter::once(encoder.finish()));
    }
}

fn vertex_format(components: u32) -> wgpu::VertexFormat {
    match components {
        2 => wgpu::VertexFormat::Float32x2,
        3 => wgpu::VertexFormat::Float32x3,
        4 => wgpu::VertexFormat::Float32x4,
        _ => wgpu::VertexFormat::Float32,
    }
}

fn sampler_layout_entries(layout: &ProgramLayout) -> Vec<wgpu::BindGroupLayoutEntry> {
    let mut entries = Vec::with_capacity(layout.samplers.len() * 2);
    for (index, decl) in layout.samplers.iter().enumerate() {
        let (sample_type, view_dimension, sampler_type) = match decl.sampler_kind() {
            SamplerKind::Image => (
                wgpu::TextureSampleType::Float { filterable: true },
                wgpu::TextureViewDimension::D2,
                wgpu::SamplerBindingType::Filtering,
            ),
            SamplerKind::FloatArray => (
                wgpu::TextureSampleType::Float { filterable: false },
                wgpu::TextureViewDimension::D2Array,
                wgpu::SamplerBindingType::NonFiltering,
            ),
        };
        entries.push(wgpu::BindGroupLayoutEntry {
            binding: (index as u32) * 2,
            visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
            ty: wgpu::BindingType::Texture {
                sample_type,
                view_dimension,
                multisampled: false,
            },
            count: None,
        });
        entries.push(wgpu::BindGroupLayoutEntry {
            binding: (index as u32) * 2 + 1,
            visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
            ty: wgpu::BindingType::Sampler(sampler_type),
            count: None,
        });
    }
    entries
}

fn filter_mode(filter: Filter) -> wgpu::FilterMode {
    match filter {
        Filter::Nearest => wgpu::FilterMode::Nearest,
        Filter::Linear => wgpu::FilterMode::Linear,
    }
}

fn create_sampler(device: &wgpu::Device, params: &TextureParams) -> wgpu::Sampler {
    device.create_sampler(&wgpu::SamplerDescriptor {
        address_mode_u: wgpu::AddressMode::ClampToEdge,
        address_mode_v: wgpu::AddressMode::ClampToEdge,
        address_mode_w: wgpu::AddressMode::ClampToEdge,
        mag_filter: filter_mode(params.mag_filter),
        min_filter: filter_mode(params.min_filter),
        mipmap_filter: params
            .mipmap_filter
            .map(filter_mode)
            .unwrap_or(wgpu::FilterMode::Nearest),
        ..Default::default()
    })
}

fn float_array_extent(array: &FloatArray) -> wgpu::Extent3d {
    wgpu::Extent3d {
        width: array.width.max(1),
        height: array.height.max(1),
        depth_or_array_layers: (array.layers.len() as u32).max(MIN_ARRAY_LAYERS),
    }
}

/// Layer-major texels filling `extent`. Short layers and the spare layers
/// are zero.
fn float_array_texels(array: &FloatArray, extent: wgpu::Extent3d) -> Vec<f32> {
    let plane = (extent.width * extent.height) as usize;
    let mut texels = vec![0.0; plane * extent.depth_or_array_layers as usize];
    for (layer, values) in array.layers.iter().enumerate() {
        let len = values.len().min(plane);
        let start = layer * plane;
        texels[start..start + len].copy_from_slice(&values[..len]);
    }
    texels
}

/// Stands in for a channel whose unit has nothing bound yet.
fn create_placeholder(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    kind: SamplerKind,
) -> TextureBinding {
    let (format, view_dimension, layers, fill, filter) = match kind {
        SamplerKind::Image => (
            TARGET_FORMAT,
            wgpu::TextureViewDimension::D2,
            1,
            255u8,
            wgpu::FilterMode::Linear,
        ),
        SamplerKind::FloatArray => (
            FLOAT_TEXTURE_FORMAT,
            wgpu::TextureViewDimension::D2Array,
            MIN_ARRAY_LAYERS,
            0u8,
            wgpu::FilterMode::Nearest,
        ),
    };
    // Both formats are four bytes per texel.
    let data = vec![fill; 4 * layers as usize];
    let texture = device.create_texture_with_data(
        queue,
        &wgpu::TextureDescriptor {
            label: Some("placeholder channel texture"),
            size: wgpu::Extent3d {
                width: 1,
                height: 1,
                depth_or_array_layers: layers,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        },
        wgpu::util::TextureDataOrder::LayerMajor,
        &data,
    );
    let view = texture.create_view(&wgpu::TextureViewDescriptor {
        dimension: Some(view_dimension),
        ..Default::default()
    });
    let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
        address_mode_u: wgpu::AddressMode::ClampToEdge,
        address_mode_v: wgpu::AddressMode::ClampToEdge,
        address_mode_w: wgpu::AddressMode::ClampToEdge,
        mag_filter: filter,
        min_filter: filter,
        mipmap_filter: wgpu::FilterMode::Nearest,
        ..Default::default()
    });
    TextureBinding { view, sampler }
}
