use std::fs;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use futures::channel::oneshot;
use futures::future::{self, BoxFuture, FutureExt};
use image::RgbaImage;
use layergl::{FetchError, ImageFetcher};
use reqwest::blocking::Client;
use tracing::debug;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Fetches tile images over HTTP(S), or from disk for `file://` URLs.
///
/// Each request runs a blocking `reqwest` call on its own worker thread and
/// hands the decoded image back through a oneshot channel, so the returned
/// future can be driven by any executor.
#[derive(Debug, Clone)]
pub struct HttpImageFetcher {
    http: Client,
}

impl HttpImageFetcher {
    pub fn new() -> Result<Self> {
        let http = Client::builder()
            .user_agent(concat!("layergl/", env!("CARGO_PKG_VERSION")))
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("building HTTP client")?;
        Ok(Self { http })
    }
}

impl ImageFetcher for HttpImageFetcher {
    fn fetch_image(&self, url: &str) -> BoxFuture<'static, Result<RgbaImage, FetchError>> {
        let (tx, rx) = oneshot::channel();
        let http = self.http.clone();
        let owned = url.to_string();
        let spawned = thread::Builder::new()
            .name("tile-fetch".to_string())
            .spawn(move || {
                let result = download(&http, &owned);
                // The receiver is gone when the tile fetch was dropped.
                let _ = tx.send(result);
            });
        if let Err(err) = spawned {
            return future::ready(Err(FetchError::Request {
                url: url.to_string(),
                reason: format!("spawning fetch thread: {err}"),
            }))
            .boxed();
        }
        rx.map(|result| result.unwrap_or(Err(FetchError::Canceled)))
            .boxed()
    }
}

fn download(http: &Client, url: &str) -> Result<RgbaImage, FetchError> {
    let request_error = |reason: String| FetchError::Request {
        url: url.to_string(),
        reason,
    };
    let bytes = match url.strip_prefix("file://") {
        Some(path) => {
            debug!(path, "reading tile image from disk");
            fs::read(path).map_err(|err| request_error(err.to_string()))?
        }
        None => {
            debug!(url, "downloading tile image");
            http.get(url)
                .send()
                .and_then(|response| response.error_for_status())
                .and_then(|response| response.bytes())
                .map_err(|err| request_error(err.to_string()))?
                .to_vec()
        }
    };
    decode_image(url, &bytes)
}

/// Decodes PNG/JPEG/BMP/GIF bytes into RGBA.
pub fn decode_image(url: &str, bytes: &[u8]) -> Result<RgbaImage, FetchError> {
    image::load_from_memory(bytes)
        .map(|decoded| decoded.to_rgba8())
        .map_err(|err| FetchError::Decode {
            url: url.to_string(),
            reason: err.to_string(),
        })
}
