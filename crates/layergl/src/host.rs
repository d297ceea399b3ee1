use crate::types::{GeoBounds, LatLng, Point, TileCoords, TileKey};

/// A tile the host currently holds in its grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResidentTile {
    pub key: TileKey,
    pub coords: TileCoords,
    /// Still part of the visible grid at the current zoom.
    pub current: bool,
    /// Its output has been produced at least once.
    pub loaded: bool,
}

/// Map-side collaborator that owns tile-grid math and the resident tile set.
pub trait TileHost {
    /// Geographic extent of a tile.
    fn tile_bounds(&self, coords: TileCoords) -> GeoBounds;

    /// Projects a geographic point into the map's CRS plane.
    fn project(&self, point: LatLng) -> Point;

    fn resident_tiles(&self) -> Vec<ResidentTile>;

    /// Normalises coordinates that wrap around the antimeridian.
    fn wrap_coords(&self, coords: TileCoords) -> TileCoords {
        coords
    }

    fn zoom(&self) -> u8;
}
