use futures::future::BoxFuture;

use crate::animation::{AnimationDriver, BoxedTimeSource, CancelToken, SystemTimeSource, TimeSource};
use crate::cache::{RenderMode, TileCache};
use crate::error::{EngineError, GpuError, TileError, TileFetchError};
use crate::fetch::{fetch_tile, ChannelRequest};
use crate::gpu::{
    compile_and_link, ChannelBinder, CompiledProgram, GeometryBuffers, GpuContext, UniformRegistry,
};
use crate::host::TileHost;
use crate::render::render_tile;
use crate::surface::TileSurface;
use crate::types::{
    ChannelSpec, FetchedTileTextures, ProgramConfig, TexturePayload, TileCoords, TileKey,
    UniformValue, MAX_CHANNELS,
};

/// Always requested so float arrays can be sampled with linear filtering
/// where the backend allows it.
const FLOAT_LINEAR_EXTENSION: &str = "OES_texture_float_linear";

/// Runs every tile of a map layer through one shader program.
///
/// Tile production is split in two so the fetch never borrows the engine:
/// [`request_tile`](Self::request_tile) returns an owned future for the
/// channel textures, and [`finish_tile`](Self::finish_tile) renders once it
/// resolves. [`TileLayer::produce_tile_output`](crate::TileLayer::produce_tile_output)
/// chains the two.
pub struct TileShaderEngine<C: GpuContext> {
    ctx: C,
    program: CompiledProgram,
    uniforms: UniformRegistry,
    geometry: GeometryBuffers,
    channels: ChannelBinder,
    channel_specs: Vec<ChannelSpec>,
    mode: RenderMode,
    tile_size: u32,
    frame_interval: std::time::Duration,
    time: BoxedTimeSource,
    animation: Option<AnimationDriver>,
    last_error: Option<String>,
}

impl<C: GpuContext> TileShaderEngine<C> {
    /// Builds the engine with a wall-clock time source.
    pub fn new(ctx: C, config: ProgramConfig) -> Result<Self, EngineError> {
        Self::with_time_source(ctx, config, SystemTimeSource::new())
    }

    pub fn with_time_source(
        mut ctx: C,
        config: ProgramConfig,
        time: impl TimeSource + 'static,
    ) -> Result<Self, EngineError> {
        let uniforms = UniformRegistry::register_defaults(&config.uniforms)?;

        let mut channel_specs = config.channels;
        if channel_specs.len() > MAX_CHANNELS {
            let ignored: Vec<&str> = channel_specs[MAX_CHANNELS..]
                .iter()
                .map(|channel| channel.name.as_str())
                .collect();
            tracing::warn!(
                configured = channel_specs.len(),
                ?ignored,
                "only the first {MAX_CHANNELS} texture channels are used"
            );
            channel_specs.truncate(MAX_CHANNELS);
        }

        let mut program = compile_and_link(&mut ctx, &config.vertex_shader, &config.fragment_shader)?;
        ctx.use_program(program.id);
        program.resolve_uniforms(&ctx, uniforms.names());
        for name in uniforms.names() {
            if program.uniform_location(name).is_none() {
                tracing::debug!(uniform = name, "configured uniform is not declared by the shaders");
            }
        }
        uniforms.upload_all(&mut ctx, &program);

        let geometry = GeometryBuffers::new(&mut ctx, &program.attributes);
        let names: Vec<String> = channel_specs.iter().map(|channel| channel.name.clone()).collect();
        let channels = ChannelBinder::new(&mut ctx, &program, &names);

        if !ctx.request_extension(FLOAT_LINEAR_EXTENSION) {
            tracing::debug!(extension = FLOAT_LINEAR_EXTENSION, "extension unavailable");
        }
        for extension in &config.extensions {
            if !ctx.request_extension(extension) {
                tracing::debug!(extension = extension.as_str(), "extension unavailable");
            }
        }

        let mode = if program.has_clock() || !uniforms.is_empty() {
            RenderMode::ReRenderable(TileCache::default())
        } else {
            RenderMode::Static
        };
        tracing::debug!(
            channels = channel_specs.len(),
            uniforms = uniforms.names().count(),
            clock = program.has_clock(),
            re_renderable = matches!(mode, RenderMode::ReRenderable(_)),
            "tile shader engine ready"
        );

        let mut engine = Self {
            ctx,
            program,
            uniforms,
            geometry,
            channels,
            channel_specs,
            mode,
            tile_size: config.tile_size.max(1),
            frame_interval: config.frame_interval,
            time: Box::new(time),
            animation: None,
            last_error: None,
        };
        engine.upload_clock();
        Ok(engine)
    }

    pub fn context(&self) -> &C {
        &self.ctx
    }

    pub fn context_mut(&mut self) -> &mut C {
        &mut self.ctx
    }

    pub fn program(&self) -> &CompiledProgram {
        &self.program
    }

    pub fn uniforms(&self) -> &UniformRegistry {
        &self.uniforms
    }

    pub fn tile_size(&self) -> u32 {
        self.tile_size
    }

    pub fn is_re_renderable(&self) -> bool {
        matches!(self.mode, RenderMode::ReRenderable(_))
    }

    /// Number of tiles whose textures are held for redraws.
    pub fn cached_tiles(&self) -> usize {
        self.mode.cache().map_or(0, TileCache::len)
    }

    /// The last GPU diagnostic recorded while rendering, if any.
    pub fn gl_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Describes a tile to the channel sources using the host's grid math.
    pub fn channel_request(&self, host: &dyn TileHost, coords: TileCoords) -> ChannelRequest {
        let bounds = host.tile_bounds(coords);
        ChannelRequest {
            coords,
            zoom: host.zoom(),
            bounds,
            crs_min: host.project(bounds.south_west()),
            crs_max: host.project(bounds.north_east()),
            tile_size: self.tile_size,
        }
    }

    /// Starts fetching every channel of a tile.
    pub fn request_tile(
        &self,
        host: &dyn TileHost,
        coords: TileCoords,
    ) -> BoxFuture<'static, Result<FetchedTileTextures, TileFetchError>> {
        let request = self.channel_request(host, coords);
        fetch_tile(&self.channel_specs, &request)
    }

    /// Renders a tile from its fetched textures.
    ///
    /// A failed fetch is returned as-is without touching the GPU.
    pub fn finish_tile(
        &mut self,
        host: &dyn TileHost,
        coords: TileCoords,
        fetched: Result<FetchedTileTextures, TileFetchError>,
    ) -> Result<TileSurface, TileError> {
        let key = coords.key();
        let textures = fetched.map_err(|source| {
            tracing::warn!(tile = %key, channel = source.index, error = %source, "tile fetch failed");
            TileError::Fetch { tile: key, source }
        })?;

        let surface = TileSurface::new(self.tile_size, self.tile_size);
        self.draw_into(host, coords, &textures, &surface)
            .map_err(|source| TileError::Render { tile: key, source })?;

        if let Some(cache) = self.mode.cache_mut() {
            cache.store(key, textures, surface.clone());
            tracing::debug!(tile = %key, cached = cache.len(), "cached tile for redraws");
        }
        Ok(surface)
    }

    /// Stores and uploads a new uniform value. Unknown names are ignored.
    pub fn set_uniform(&mut self, name: &str, value: impl Into<UniformValue>) -> bool {
        self.ctx.use_program(self.program.id);
        self.uniforms
            .set(&mut self.ctx, &self.program, name, &value.into())
    }

    /// Redraws every resident tile from its cached textures.
    ///
    /// Textures are looked up under the host-wrapped coordinates, the surface
    /// under the resident key. Tiles missing either entry are skipped. Returns
    /// the number of tiles drawn.
    pub fn re_render(&mut self, host: &dyn TileHost) -> usize {
        let Some(cache) = self.mode.cache() else {
            return 0;
        };
        let work: Vec<_> = host
            .resident_tiles()
            .into_iter()
            .filter(|tile| tile.current && tile.loaded)
            .filter_map(|tile| {
                let wrapped = TileKey::from(host.wrap_coords(tile.coords));
                match (cache.textures(&wrapped), cache.surface(&tile.key)) {
                    (Some(textures), Some(surface)) => {
                        Some((tile.coords, textures.clone(), surface.clone()))
                    }
                    _ => {
                        tracing::trace!(tile = %tile.key, "no cached textures, skipping redraw");
                        None
                    }
                }
            })
            .collect();

        self.upload_clock();
        let mut redrawn = 0;
        for (coords, textures, surface) in work {
            match self.draw_into(host, coords, &textures, &surface) {
                Ok(()) => redrawn += 1,
                Err(err) => tracing::warn!(tile = %coords.key(), error = %err, "redraw failed"),
            }
        }
        redrawn
    }

    /// Clears the render target without drawing. Tile surfaces keep their pixels.
    pub fn fast_clear(&mut self) {
        self.ctx.clear();
    }

    /// Drops the cached entries of a tile the host no longer holds.
    pub fn notify_tile_removed(&mut self, key: TileKey) {
        if let Some(cache) = self.mode.cache_mut() {
            if cache.evict(&key) {
                tracing::debug!(tile = %key, cached = cache.len(), "evicted tile");
            }
        }
    }

    /// Starts the animation loop when the shaders read the clock, replacing
    /// any loop still running.
    pub fn on_attach(&mut self) {
        if let Some(previous) = self.animation.take() {
            previous.cancel();
        }
        if self.program.has_clock() {
            self.animation = Some(AnimationDriver::start(self.frame_interval));
        }
    }

    pub fn on_detach(&mut self) {
        if let Some(driver) = self.animation.take() {
            driver.cancel();
        }
    }

    pub fn is_animating(&self) -> bool {
        self.animation
            .as_ref()
            .is_some_and(|driver| !driver.is_canceled())
    }

    /// Token that stops the running animation loop from another thread.
    pub fn animation_token(&self) -> Option<CancelToken> {
        self.animation.as_ref().map(AnimationDriver::token)
    }

    /// Redraws once if a frame came due since the last call, without blocking.
    pub fn pump_animation(&mut self, host: &dyn TileHost) -> usize {
        let due = self
            .animation
            .as_ref()
            .is_some_and(AnimationDriver::frame_due);
        if due {
            self.re_render(host)
        } else {
            0
        }
    }

    /// Redraws on every tick until the loop is canceled or `max_frames`
    /// frames were drawn. Returns the number of frames.
    pub fn run_animation(&mut self, host: &dyn TileHost, max_frames: Option<u64>) -> u64 {
        let mut frames = 0;
        while max_frames.map_or(true, |max| frames < max) {
            let Some(driver) = &self.animation else {
                break;
            };
            if !driver.wait_frame() {
                break;
            }
            self.re_render(host);
            frames += 1;
        }
        frames
    }

    fn upload_clock(&mut self) {
        if let Some(location) = self.program.clock_location() {
            let now = self.time.now_ms();
            self.ctx.use_program(self.program.id);
            self.ctx.uniform_1f(location, now as f32);
        }
    }

    fn draw_into(
        &mut self,
        host: &dyn TileHost,
        coords: TileCoords,
        textures: &[TexturePayload],
        surface: &TileSurface,
    ) -> Result<(), GpuError> {
        self.ctx.use_program(self.program.id);
        self.channels.bind(&mut self.ctx, textures);
        match render_tile(&mut self.ctx, &self.geometry, host, coords, self.tile_size) {
            Ok(frame) => {
                surface.draw(&frame);
                Ok(())
            }
            Err(err) => {
                self.last_error = Some(err.0.clone());
                Err(err)
            }
        }
    }
}

impl<C: GpuContext> Drop for TileShaderEngine<C> {
    fn drop(&mut self) {
        self.on_detach();
        self.ctx.delete_program(self.program.id);
    }
}
