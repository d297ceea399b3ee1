//! Texture sources for `layergl` channels.
//!
//! [`XyzTemplate`] and [`WmsSource`] turn a tile request into a URL;
//! [`HttpImageFetcher`] downloads and decodes it. Pair them with
//! [`layergl::RemoteChannel`], or use [`xyz_channel`] / [`wms_channel`].

mod fetcher;
mod wms;
mod xyz;

use std::sync::Arc;

use layergl::{ImageFetcher, RemoteChannel, TextureSource};

pub use fetcher::{decode_image, HttpImageFetcher};
pub use wms::{WmsOptions, WmsSource};
pub use xyz::XyzTemplate;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TemplateError {
    #[error("unknown placeholder '{{{0}}}' in tile URL template")]
    UnknownPlaceholder(String),
    #[error("unterminated placeholder in tile URL template '{0}'")]
    Unterminated(String),
    #[error("template '{0}' uses {{s}} but no subdomains are configured")]
    MissingSubdomains(String),
    #[error("invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },
}

pub fn xyz_channel(
    template: &str,
    subdomains: Vec<String>,
    fetcher: Arc<dyn ImageFetcher>,
) -> Result<Arc<dyn TextureSource>, TemplateError> {
    let urls = XyzTemplate::new(template, subdomains)?;
    Ok(Arc::new(RemoteChannel::new(urls, fetcher)))
}

pub fn wms_channel(
    url: &str,
    options: WmsOptions,
    fetcher: Arc<dyn ImageFetcher>,
) -> Result<Arc<dyn TextureSource>, TemplateError> {
    let urls = WmsSource::new(url, options)?;
    Ok(Arc::new(RemoteChannel::new(urls, fetcher)))
}

#[cfg(test)]
mod tests {
    use image::{Rgba, RgbaImage};
    use layergl::{ChannelRequest, GeoBounds, Point, TexturePayload, TileCoords};
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn xyz_channel_reads_local_tile_pyramid() {
        let dir = tempdir().unwrap();
        let tile_dir = dir.path().join("2").join("3");
        std::fs::create_dir_all(&tile_dir).unwrap();
        RgbaImage::from_pixel(2, 2, Rgba([0, 255, 0, 255]))
            .save(tile_dir.join("1.png"))
            .unwrap();

        let template = format!("file://{}/{{z}}/{{x}}/{{y}}.png", dir.path().display());
        let fetcher: Arc<dyn ImageFetcher> = Arc::new(HttpImageFetcher::new().unwrap());
        let channel = xyz_channel(&template, Vec::new(), fetcher).unwrap();

        let request = ChannelRequest {
            coords: TileCoords::new(3, 1, 2),
            zoom: 2,
            bounds: GeoBounds {
                west: 90.0,
                east: 180.0,
                north: 66.5,
                south: 0.0,
            },
            crs_min: Point::new(0.0, 0.0),
            crs_max: Point::new(1.0, 1.0),
            tile_size: 2,
        };
        match futures::executor::block_on(channel.fetch(&request)).unwrap() {
            TexturePayload::Image(image) => assert_eq!(*image.get_pixel(0, 0), Rgba([0, 255, 0, 255])),
            other => panic!("unexpected payload: {other:?}"),
        }
    }
}
