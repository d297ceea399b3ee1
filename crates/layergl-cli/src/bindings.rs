use std::sync::Arc;

use anyhow::{Context, Result};
use layerconfig::{ChannelConfig, LayerConfig, WmsChannel};
use layergl::{ImageFetcher, ProgramConfig, StaticSource, TextureSource};
use tilesource::{wms_channel, xyz_channel, HttpImageFetcher, WmsOptions};

/// Turns a loaded layer config into the engine's construction options.
pub fn program_config(config: &LayerConfig) -> Result<ProgramConfig> {
    let (vertex, fragment) = config.read_shaders()?;
    let mut program = ProgramConfig::new(vertex, fragment).with_tile_size(config.tile_size);
    if let Some(interval) = config.frame_interval {
        program = program.with_frame_interval(interval);
    }
    for (name, value) in &config.uniforms {
        program = program.with_uniform(name.as_str(), value.clone());
    }
    for extension in &config.extensions {
        program = program.with_extension(extension.as_str());
    }

    let mut fetcher: Option<Arc<dyn ImageFetcher>> = None;
    for (name, channel) in config.ordered_channels() {
        let source = channel_source(config, channel, &mut fetcher)
            .with_context(|| format!("configuring channel '{name}'"))?;
        tracing::debug!(channel = name, kind = channel_kind(channel), "configured texture channel");
        program = program.with_channel(name, source);
    }
    Ok(program)
}

fn channel_kind(channel: &ChannelConfig) -> &'static str {
    match channel {
        ChannelConfig::Xyz { .. } => "xyz",
        ChannelConfig::Wms(_) => "wms",
        ChannelConfig::Image { .. } => "image",
    }
}

fn channel_source(
    config: &LayerConfig,
    channel: &ChannelConfig,
    fetcher: &mut Option<Arc<dyn ImageFetcher>>,
) -> Result<Arc<dyn TextureSource>> {
    match channel {
        ChannelConfig::Xyz { url, subdomains } => {
            let fetcher = shared_fetcher(fetcher)?;
            Ok(xyz_channel(url, subdomains.clone(), fetcher)?)
        }
        ChannelConfig::Wms(wms) => {
            let fetcher = shared_fetcher(fetcher)?;
            Ok(wms_channel(&wms.url, wms_options(wms), fetcher)?)
        }
        ChannelConfig::Image { path } => {
            let path = config.resolve_path(path);
            let image = image::open(&path)
                .with_context(|| format!("opening {}", path.display()))?
                .to_rgba8();
            Ok(Arc::new(StaticSource::new(image)))
        }
    }
}

/// One HTTP client for every remote channel, built on first use.
fn shared_fetcher(slot: &mut Option<Arc<dyn ImageFetcher>>) -> Result<Arc<dyn ImageFetcher>> {
    if let Some(fetcher) = slot {
        return Ok(fetcher.clone());
    }
    let fetcher: Arc<dyn ImageFetcher> = Arc::new(HttpImageFetcher::new()?);
    *slot = Some(fetcher.clone());
    Ok(fetcher)
}

fn wms_options(wms: &WmsChannel) -> WmsOptions {
    WmsOptions {
        layers: wms.layers.clone(),
        styles: wms.styles.clone(),
        format: wms.format.clone(),
        transparent: wms.transparent,
        version: wms.version.clone(),
        srs: wms.srs.clone(),
        extra: wms.params.clone(),
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use image::{Rgba, RgbaImage};

    use super::*;

    const LAYER: &str = r#"
version = 1
tile_size = 64
vertex_shader = "layer.vert"
fragment_shader = "layer.frag"
frame_interval = "40ms"

[uniforms]
u_brightness = 1.5

[channels.u_texture1]
kind = "image"
path = "noise.png"

[channels.u_texture0]
kind = "xyz"
url = "https://{s}.tile.example.org/{z}/{x}/{y}.png"
subdomains = ["a"]
"#;

    #[test]
    fn builds_program_config_in_channel_order() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("layer.vert"), "void main() {}\n").unwrap();
        fs::write(dir.path().join("layer.frag"), "void main() {}\n").unwrap();
        RgbaImage::from_pixel(2, 2, Rgba([1, 2, 3, 255]))
            .save(dir.path().join("noise.png"))
            .unwrap();
        let path = dir.path().join("layer.toml");
        fs::write(&path, LAYER).unwrap();

        let config = LayerConfig::load(&path).unwrap();
        let program = program_config(&config).unwrap();

        assert_eq!(program.tile_size, 64);
        assert_eq!(program.frame_interval, std::time::Duration::from_millis(40));
        assert_eq!(program.uniforms["u_brightness"], serde_json::json!(1.5));
        let names: Vec<&str> = program.channels.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["u_texture0", "u_texture1"]);
    }

    #[test]
    fn missing_channel_image_names_the_channel() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("layer.vert"), "void main() {}\n").unwrap();
        fs::write(dir.path().join("layer.frag"), "void main() {}\n").unwrap();
        let path = dir.path().join("layer.toml");
        fs::write(&path, LAYER).unwrap();

        let config = LayerConfig::load(&path).unwrap();
        let err = program_config(&config).unwrap_err();
        assert!(format!("{err:#}").contains("channel 'u_texture1'"));
    }
}
