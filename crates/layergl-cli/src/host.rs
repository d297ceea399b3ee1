use std::collections::BTreeMap;
use std::f64::consts::PI;

use layergl::{GeoBounds, LatLng, Point, ResidentTile, TileCoords, TileHost};

/// Spherical mercator radius used by EPSG:3857.
const EARTH_RADIUS: f64 = 6_378_137.0;
const MAX_LATITUDE: f64 = 85.051_128_779_806_59;

/// Slippy-map grid at a single zoom level, projected to EPSG:3857 meters.
#[derive(Debug, Clone)]
pub struct WebMercatorHost {
    zoom: u8,
    /// Resident tiles and whether each has been rendered.
    tiles: BTreeMap<TileCoords, bool>,
}

impl WebMercatorHost {
    pub fn new(zoom: u8, tiles: impl IntoIterator<Item = TileCoords>) -> Self {
        Self {
            zoom,
            tiles: tiles.into_iter().map(|coords| (coords, false)).collect(),
        }
    }

    fn grid_size(&self) -> i64 {
        1i64 << self.zoom.min(62)
    }

    pub fn mark_loaded(&mut self, coords: TileCoords) {
        if let Some(loaded) = self.tiles.get_mut(&coords) {
            *loaded = true;
        }
    }

    /// Tile containing `point` at this zoom level.
    pub fn tile_at(&self, point: LatLng) -> TileCoords {
        let n = self.grid_size() as f64;
        let lat = point.lat.clamp(-MAX_LATITUDE, MAX_LATITUDE).to_radians();
        let x = ((point.lng + 180.0) / 360.0 * n).floor() as i64;
        let y = ((1.0 - (lat.tan() + 1.0 / lat.cos()).ln() / PI) / 2.0 * n).floor() as i64;
        TileCoords::new(x, y.clamp(0, self.grid_size() - 1), self.zoom)
    }

    /// The square of tiles `radius` steps around `center`. Rows are clipped to
    /// the grid; columns are left unwrapped.
    pub fn tiles_around(&self, center: LatLng, radius: u32) -> Vec<TileCoords> {
        let middle = self.tile_at(center);
        let radius = i64::from(radius);
        let mut tiles = Vec::new();
        for y in (middle.y - radius)..=(middle.y + radius) {
            if !(0..self.grid_size()).contains(&y) {
                continue;
            }
            for x in (middle.x - radius)..=(middle.x + radius) {
                tiles.push(TileCoords::new(x, y, self.zoom));
            }
        }
        tiles
    }
}

fn tile_lng(x: i64, n: f64) -> f64 {
    x as f64 / n * 360.0 - 180.0
}

fn tile_lat(y: i64, n: f64) -> f64 {
    let mercator = PI * (1.0 - 2.0 * y as f64 / n);
    mercator.sinh().atan().to_degrees()
}

impl TileHost for WebMercatorHost {
    fn tile_bounds(&self, coords: TileCoords) -> GeoBounds {
        let n = (1i64 << coords.z.min(62)) as f64;
        GeoBounds {
            west: tile_lng(coords.x, n),
            east: tile_lng(coords.x + 1, n),
            north: tile_lat(coords.y, n),
            south: tile_lat(coords.y + 1, n),
        }
    }

    fn project(&self, point: LatLng) -> Point {
        let lat = point.lat.clamp(-MAX_LATITUDE, MAX_LATITUDE).to_radians();
        Point::new(
            EARTH_RADIUS * point.lng.to_radians(),
            EARTH_RADIUS * (PI / 4.0 + lat / 2.0).tan().ln(),
        )
    }

    fn resident_tiles(&self) -> Vec<ResidentTile> {
        self.tiles
            .iter()
            .map(|(coords, loaded)| ResidentTile {
                key: coords.key(),
                coords: *coords,
                current: coords.z == self.zoom,
                loaded: *loaded,
            })
            .collect()
    }

    fn wrap_coords(&self, coords: TileCoords) -> TileCoords {
        let n = 1i64 << coords.z.min(62);
        TileCoords::new(coords.x.rem_euclid(n), coords.y, coords.z)
    }

    fn zoom(&self) -> u8 {
        self.zoom
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-6
    }

    #[test]
    fn zoom_zero_covers_the_mercator_square() {
        let host = WebMercatorHost::new(0, []);
        let bounds = host.tile_bounds(TileCoords::new(0, 0, 0));
        assert!(close(bounds.west, -180.0));
        assert!(close(bounds.east, 180.0));
        assert!(close(bounds.north, MAX_LATITUDE));
        assert!(close(bounds.south, -MAX_LATITUDE));

        let max = host.project(bounds.north_east());
        assert!((max.x - 20_037_508.342_789_244).abs() < 1e-3);
        assert!((max.y - 20_037_508.342_789_244).abs() < 1e-3);
    }

    #[test]
    fn finds_the_tile_under_a_point() {
        let host = WebMercatorHost::new(2, []);
        assert_eq!(host.tile_at(LatLng::new(10.0, 10.0)), TileCoords::new(2, 1, 2));
        assert_eq!(host.tile_at(LatLng::new(-89.0, -180.0)), TileCoords::new(0, 3, 2));
    }

    #[test]
    fn neighbourhood_clips_rows_but_not_columns() {
        let host = WebMercatorHost::new(1, []);
        let tiles = host.tiles_around(LatLng::new(80.0, 170.0), 1);
        assert_eq!(tiles.len(), 6);
        assert!(tiles.contains(&TileCoords::new(2, 0, 1)));
        assert!(tiles.iter().all(|tile| tile.y >= 0));
        assert_eq!(host.wrap_coords(TileCoords::new(2, 0, 1)), TileCoords::new(0, 0, 1));
        assert_eq!(host.wrap_coords(TileCoords::new(-1, 0, 1)), TileCoords::new(1, 0, 1));
    }

    #[test]
    fn marks_tiles_loaded() {
        let coords = TileCoords::new(1, 1, 3);
        let mut host = WebMercatorHost::new(3, [coords]);
        assert!(!host.resident_tiles()[0].loaded);
        host.mark_loaded(coords);
        let tile = host.resident_tiles()[0];
        assert!(tile.loaded && tile.current);
        assert_eq!(tile.key, coords.key());
    }
}
