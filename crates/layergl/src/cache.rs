use std::collections::HashMap;

use crate::surface::TileSurface;
use crate::types::{FetchedTileTextures, TileKey};

/// Whether rendered tiles keep what they need to be redrawn.
#[derive(Debug)]
pub(crate) enum RenderMode {
    /// Nothing can change after a tile is drawn; textures are dropped.
    Static,
    /// A clock or a user uniform may change, so tiles are cached for `re_render`.
    ReRenderable(TileCache),
}

impl RenderMode {
    pub fn cache(&self) -> Option<&TileCache> {
        match self {
            RenderMode::Static => None,
            RenderMode::ReRenderable(cache) => Some(cache),
        }
    }

    pub fn cache_mut(&mut self) -> Option<&mut TileCache> {
        match self {
            RenderMode::Static => None,
            RenderMode::ReRenderable(cache) => Some(cache),
        }
    }
}

/// Fetched textures and output surfaces of rendered tiles.
#[derive(Debug, Default)]
pub(crate) struct TileCache {
    textures: HashMap<TileKey, FetchedTileTextures>,
    surfaces: HashMap<TileKey, TileSurface>,
}

impl TileCache {
    pub fn store(&mut self, key: TileKey, textures: FetchedTileTextures, surface: TileSurface) {
        self.textures.insert(key, textures);
        self.surfaces.insert(key, surface);
    }

    pub fn textures(&self, key: &TileKey) -> Option<&FetchedTileTextures> {
        self.textures.get(key)
    }

    pub fn surface(&self, key: &TileKey) -> Option<&TileSurface> {
        self.surfaces.get(key)
    }

    /// Drops both entries for `key`. Returns whether anything was cached.
    pub fn evict(&mut self, key: &TileKey) -> bool {
        let textures = self.textures.remove(key).is_some();
        let surface = self.surfaces.remove(key).is_some();
        textures || surface
    }

    pub fn len(&self) -> usize {
        self.textures.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TileCoords;

    #[test]
    fn evict_removes_both_entries_once() {
        let mut cache = TileCache::default();
        let key = TileCoords::new(1, 1, 2).key();
        cache.store(key, Vec::new(), TileSurface::new(1, 1));
        assert_eq!(cache.len(), 1);
        assert!(cache.surface(&key).is_some());

        assert!(cache.evict(&key));
        assert!(cache.textures(&key).is_none());
        assert!(cache.surface(&key).is_none());
        assert!(!cache.evict(&key));
    }

    #[test]
    fn static_mode_has_no_cache() {
        let mut mode = RenderMode::Static;
        assert!(mode.cache().is_none());
        assert!(mode.cache_mut().is_none());
    }
}
