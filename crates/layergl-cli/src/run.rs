use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use layerconfig::LayerConfig;
use layergl::{
    FixedTimeSource, GpuContext, TileCoords, TileShaderEngine, TileSurface, WgpuContext,
    WgpuOptions,
};
use tracing_subscriber::EnvFilter;

use crate::bindings::program_config;
use crate::cli::Cli;
use crate::host::WebMercatorHost;

pub fn initialise_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

pub fn run(cli: Cli) -> Result<()> {
    let config = LayerConfig::load(&cli.config)
        .with_context(|| format!("loading layer config {}", cli.config.display()))?;
    let program = program_config(&config)?;

    let tiles = requested_tiles(&cli)?;
    let mut host = WebMercatorHost::new(cli.zoom, tiles.iter().copied());

    let ctx = WgpuContext::new(WgpuOptions {
        high_performance: cli.high_performance,
        ..WgpuOptions::default()
    })
    .context("initialising GPU")?;
    let built = match cli.fixed_time {
        Some(millis) => {
            TileShaderEngine::with_time_source(ctx, program, FixedTimeSource::new(millis))
        }
        None => TileShaderEngine::new(ctx, program),
    };
    let mut engine = built.context("building tile shader program")?;
    tracing::info!(
        tiles = tiles.len(),
        zoom = cli.zoom,
        tile_size = engine.tile_size(),
        re_renderable = engine.is_re_renderable(),
        "rendering tiles"
    );
    engine.on_attach();

    let surfaces = render_all(&mut engine, &host, &tiles);
    for (coords, _) in &surfaces {
        host.mark_loaded(*coords);
    }

    if !cli.set.is_empty() {
        for (name, value) in &cli.set {
            if !engine.set_uniform(name, value.clone()) {
                tracing::warn!(uniform = name.as_str(), "override not applied");
            }
        }
        let redrawn = engine.re_render(&host);
        tracing::info!(redrawn, "applied uniform overrides");
    }

    if cli.frames > 0 {
        if engine.is_animating() {
            let frames = engine.run_animation(&host, Some(cli.frames));
            tracing::info!(frames, "animation frames drawn");
        } else {
            tracing::warn!("--frames ignored: the shaders do not read u_Now");
        }
    }
    engine.on_detach();

    if let Some(diagnostic) = engine.gl_error() {
        tracing::warn!(diagnostic, "GPU reported an error while rendering");
    }
    write_tiles(&cli.out, &surfaces)?;
    tracing::info!(
        written = surfaces.len(),
        failed = tiles.len() - surfaces.len(),
        out = %cli.out.display(),
        "done"
    );
    Ok(())
}

fn requested_tiles(cli: &Cli) -> Result<Vec<TileCoords>> {
    let tiles: Vec<TileCoords> = match cli.center {
        Some(center) => WebMercatorHost::new(cli.zoom, []).tiles_around(center, cli.radius),
        None => cli
            .tiles
            .iter()
            .map(|&(x, y)| TileCoords::new(x, y, cli.zoom))
            .collect(),
    };
    if tiles.is_empty() {
        bail!("no tiles requested; pass --tile X,Y or --center LAT,LNG");
    }
    Ok(tiles)
}

/// Fetches every tile concurrently and renders each as its textures arrive.
/// Tiles that fail are logged and left out.
fn render_all<C: GpuContext>(
    engine: &mut TileShaderEngine<C>,
    host: &WebMercatorHost,
    tiles: &[TileCoords],
) -> Vec<(TileCoords, TileSurface)> {
    let mut pending: FuturesUnordered<_> = tiles
        .iter()
        .map(|&coords| {
            engine
                .request_tile(host, coords)
                .map(move |fetched| (coords, fetched))
        })
        .collect();

    let mut surfaces = Vec::with_capacity(tiles.len());
    pollster::block_on(async {
        while let Some((coords, fetched)) = pending.next().await {
            match engine.finish_tile(host, coords, fetched) {
                Ok(surface) => surfaces.push((coords, surface)),
                Err(err) => tracing::warn!(tile = %coords, error = %err, "tile skipped"),
            }
        }
    });
    surfaces
}

fn tile_path(out: &Path, coords: TileCoords) -> PathBuf {
    out.join(format!("{}_{}_{}.png", coords.z, coords.x, coords.y))
}

fn write_tiles(out: &Path, surfaces: &[(TileCoords, TileSurface)]) -> Result<()> {
    fs::create_dir_all(out).with_context(|| format!("creating {}", out.display()))?;
    for (coords, surface) in surfaces {
        let path = tile_path(out, *coords);
        surface
            .save(&path)
            .with_context(|| format!("writing {}", path.display()))?;
        tracing::debug!(path = %path.display(), revision = surface.revision(), "wrote tile");
    }
    Ok(())
}
