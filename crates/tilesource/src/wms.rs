use std::collections::BTreeMap;

use layergl::{ChannelRequest, FetchError, TileUrlBuilder};
use reqwest::Url;

use crate::TemplateError;

/// GetMap parameters of a WMS layer.
#[derive(Debug, Clone, PartialEq)]
pub struct WmsOptions {
    pub layers: String,
    pub styles: String,
    pub format: String,
    pub transparent: bool,
    pub version: String,
    /// Spatial reference of the BBOX, sent as `srs` (or `crs` from 1.3 on).
    pub srs: String,
    /// Vendor parameters appended verbatim, e.g. `filter`.
    pub extra: BTreeMap<String, String>,
}

impl Default for WmsOptions {
    fn default() -> Self {
        Self {
            layers: String::new(),
            styles: String::new(),
            format: "image/jpeg".to_string(),
            transparent: false,
            version: "1.1.1".to_string(),
            srs: "EPSG:3857".to_string(),
            extra: BTreeMap::new(),
        }
    }
}

/// Builds one GetMap request per tile.
///
/// The BBOX comes from the tile's projected bounds, except for `EPSG:4326`
/// where the geographic bounds are used directly (latitude first from WMS 1.3).
#[derive(Debug, Clone)]
pub struct WmsSource {
    base: Url,
    options: WmsOptions,
}

impl WmsSource {
    pub fn new(url: &str, options: WmsOptions) -> Result<Self, TemplateError> {
        let base = Url::parse(url).map_err(|err| TemplateError::InvalidUrl {
            url: url.to_string(),
            reason: err.to_string(),
        })?;
        Ok(Self { base, options })
    }

    fn is_wms13(&self) -> bool {
        let mut parts = self.options.version.split('.').map(|part| part.parse::<u32>().unwrap_or(0));
        let major = parts.next().unwrap_or(0);
        let minor = parts.next().unwrap_or(0);
        (major, minor) >= (1, 3)
    }

    fn bbox(&self, request: &ChannelRequest) -> [f64; 4] {
        if self.options.srs.eq_ignore_ascii_case("EPSG:4326") {
            let b = request.bounds;
            if self.is_wms13() {
                [b.south, b.west, b.north, b.east]
            } else {
                [b.west, b.south, b.east, b.north]
            }
        } else {
            let (min, max) = (request.crs_min, request.crs_max);
            [min.x, min.y, max.x, max.y]
        }
    }
}

impl TileUrlBuilder for WmsSource {
    fn tile_url(&self, request: &ChannelRequest) -> Result<String, FetchError> {
        let size = request.tile_size.to_string();
        let srs_key = if self.is_wms13() { "crs" } else { "srs" };
        let bbox = self
            .bbox(request)
            .iter()
            .map(f64::to_string)
            .collect::<Vec<_>>()
            .join(",");

        let mut url = self.base.clone();
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("service", "WMS")
                .append_pair("request", "GetMap")
                .append_pair("layers", &self.options.layers)
                .append_pair("styles", &self.options.styles)
                .append_pair("format", &self.options.format)
                .append_pair("transparent", if self.options.transparent { "true" } else { "false" })
                .append_pair("version", &self.options.version)
                .append_pair("width", &size)
                .append_pair("height", &size)
                .append_pair(srs_key, &self.options.srs);
            for (key, value) in &self.options.extra {
                query.append_pair(key, value);
            }
            query.append_pair("BBOX", &bbox);
        }
        Ok(url.into())
    }
}

#[cfg(test)]
mod tests {
    use layergl::{GeoBounds, Point, TileCoords};

    use super::*;

    fn request() -> ChannelRequest {
        ChannelRequest {
            coords: TileCoords::new(0, 0, 1),
            zoom: 1,
            bounds: GeoBounds {
                west: -180.0,
                east: 0.0,
                north: 85.0,
                south: 0.0,
            },
            crs_min: Point::new(-20037508.5, 0.0),
            crs_max: Point::new(0.0, 20037508.5),
            tile_size: 256,
        }
    }

    fn query(url: &str) -> BTreeMap<String, String> {
        Url::parse(url).unwrap().query_pairs().into_owned().collect()
    }

    #[test]
    fn builds_get_map_from_projected_bounds() {
        let mut options = WmsOptions {
            layers: "omar:raster_entry".into(),
            format: "image/png".into(),
            transparent: true,
            ..WmsOptions::default()
        };
        options.extra.insert("filter".into(), "image_id like 'x'".into());
        let source = WmsSource::new("https://example.org/wms", options).unwrap();

        let url = source.tile_url(&request()).unwrap();
        assert!(url.starts_with("https://example.org/wms?service=WMS&request=GetMap"));
        let params = query(&url);
        assert_eq!(params["layers"], "omar:raster_entry");
        assert_eq!(params["transparent"], "true");
        assert_eq!(params["width"], "256");
        assert_eq!(params["srs"], "EPSG:3857");
        assert_eq!(params["filter"], "image_id like 'x'");
        assert_eq!(params["BBOX"], "-20037508.5,0,0,20037508.5");
    }

    #[test]
    fn geographic_bbox_swaps_axes_from_wms_13() {
        let options = WmsOptions {
            srs: "EPSG:4326".into(),
            version: "1.3.0".into(),
            ..WmsOptions::default()
        };
        let source = WmsSource::new("https://example.org/wms", options).unwrap();
        let params = query(&source.tile_url(&request()).unwrap());
        assert_eq!(params["crs"], "EPSG:4326");
        assert_eq!(params["BBOX"], "0,-180,85,0");
        assert!(!params.contains_key("srs"));
    }

    #[test]
    fn rejects_unparseable_base_urls() {
        let err = WmsSource::new("not a url", WmsOptions::default()).unwrap_err();
        assert!(matches!(err, TemplateError::InvalidUrl { .. }));
    }
}
