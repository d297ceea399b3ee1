use futures::future::{FutureExt, LocalBoxFuture};

use crate::engine::TileShaderEngine;
use crate::error::{EngineError, TileError};
use crate::gpu::GpuContext;
use crate::host::TileHost;
use crate::surface::TileSurface;
use crate::types::{ProgramConfig, TileCoords, TileKey};

/// What a host map adapter drives: build once, produce tiles on demand,
/// report removals, and bracket the layer's time on the map.
pub trait TileLayer {
    type Context: GpuContext;

    fn initialize(context: Self::Context, config: ProgramConfig) -> Result<Self, EngineError>
    where
        Self: Sized;

    /// Fetches and renders one tile. Failures go to the host's tile-error path.
    fn produce_tile_output<'a>(
        &'a mut self,
        host: &'a dyn TileHost,
        coords: TileCoords,
    ) -> LocalBoxFuture<'a, Result<TileSurface, TileError>>;

    fn notify_tile_removed(&mut self, key: TileKey);

    fn on_attach(&mut self);

    fn on_detach(&mut self);
}

impl<C: GpuContext> TileLayer for TileShaderEngine<C> {
    type Context = C;

    fn initialize(context: C, config: ProgramConfig) -> Result<Self, EngineError> {
        TileShaderEngine::new(context, config)
    }

    fn produce_tile_output<'a>(
        &'a mut self,
        host: &'a dyn TileHost,
        coords: TileCoords,
    ) -> LocalBoxFuture<'a, Result<TileSurface, TileError>> {
        let fetch = self.request_tile(host, coords);
        async move {
            let fetched = fetch.await;
            self.finish_tile(host, coords, fetched)
        }
        .boxed_local()
    }

    fn notify_tile_removed(&mut self, key: TileKey) {
        TileShaderEngine::notify_tile_removed(self, key);
    }

    fn on_attach(&mut self) {
        TileShaderEngine::on_attach(self);
    }

    fn on_detach(&mut self) {
        TileShaderEngine::on_detach(self);
    }
}
