//! Per-tile texture fetching.
//!
//! Every channel owns a [`TextureSource`]. A tile fetch issues one request per
//! channel up front and joins them with `try_join_all`, so the tile resolves
//! once every channel has and fails with the first channel error, dropping the
//! requests still in flight.

use std::sync::Arc;

use futures::future::{self, BoxFuture};
use futures::{FutureExt, TryFutureExt};
use image::RgbaImage;

use crate::error::{FetchError, TileFetchError};
use crate::types::{ChannelSpec, FetchedTileTextures, GeoBounds, Point, TexturePayload, TileCoords};

/// Everything a source may need to locate one tile's texture.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelRequest {
    pub coords: TileCoords,
    /// The host's current zoom level.
    pub zoom: u8,
    pub bounds: GeoBounds,
    /// Projection of the tile's south-west corner.
    pub crs_min: Point,
    /// Projection of the tile's north-east corner.
    pub crs_max: Point,
    pub tile_size: u32,
}

/// Produces one channel's texture for a tile.
///
/// The returned future must not borrow the source; it may be polled on any
/// executor after the call returns.
pub trait TextureSource: Send + Sync {
    fn fetch(&self, request: &ChannelRequest) -> BoxFuture<'static, Result<TexturePayload, FetchError>>;
}

/// "Fetch an image by URL" capability.
pub trait ImageFetcher: Send + Sync {
    fn fetch_image(&self, url: &str) -> BoxFuture<'static, Result<RgbaImage, FetchError>>;
}

/// Maps a tile request onto the URL of its image.
pub trait TileUrlBuilder: Send + Sync {
    fn tile_url(&self, request: &ChannelRequest) -> Result<String, FetchError>;
}

/// A URL-addressed channel: builds the tile URL, then fetches it.
pub struct RemoteChannel<U> {
    urls: U,
    fetcher: Arc<dyn ImageFetcher>,
}

impl<U: TileUrlBuilder> RemoteChannel<U> {
    pub fn new(urls: U, fetcher: Arc<dyn ImageFetcher>) -> Self {
        Self { urls, fetcher }
    }
}

impl<U: TileUrlBuilder> TextureSource for RemoteChannel<U> {
    fn fetch(&self, request: &ChannelRequest) -> BoxFuture<'static, Result<TexturePayload, FetchError>> {
        match self.urls.tile_url(request) {
            Ok(url) => {
                tracing::debug!(tile = %request.coords, url = url.as_str(), "requesting channel image");
                self.fetcher
                    .fetch_image(&url)
                    .map_ok(TexturePayload::from)
                    .boxed()
            }
            Err(err) => future::ready(Err(err)).boxed(),
        }
    }
}

/// Serves the same payload for every tile, e.g. synthetic numeric data.
#[derive(Debug, Clone)]
pub struct StaticSource {
    payload: TexturePayload,
}

impl StaticSource {
    pub fn new(payload: impl Into<TexturePayload>) -> Self {
        Self {
            payload: payload.into(),
        }
    }
}

impl TextureSource for StaticSource {
    fn fetch(&self, _request: &ChannelRequest) -> BoxFuture<'static, Result<TexturePayload, FetchError>> {
        future::ready(Ok(self.payload.clone())).boxed()
    }
}

/// Issues one request per channel and joins them, failing on the first error.
pub(crate) fn fetch_tile(
    channels: &[ChannelSpec],
    request: &ChannelRequest,
) -> BoxFuture<'static, Result<FetchedTileTextures, TileFetchError>> {
    let fetches: Vec<_> = channels
        .iter()
        .enumerate()
        .map(|(index, channel)| {
            let name = channel.name.clone();
            channel
                .source
                .fetch(request)
                .map_err(move |source| TileFetchError {
                    channel: name,
                    index,
                    source,
                })
        })
        .collect();
    future::try_join_all(fetches).boxed()
}
