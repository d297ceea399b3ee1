use crate::types::{GeoBounds, Point};

use super::{AttributeLocations, BufferId, GpuContext};

/// Clip-space corners in strip order NE, NW, SE, SW.
pub const VERTEX_QUAD: [f32; 8] = [1.0, 1.0, -1.0, 1.0, 1.0, -1.0, -1.0, -1.0];

/// Texture coordinates for the same corners; `v = 0` is the top row of the image.
pub const TEXTURE_QUAD: [f32; 8] = [1.0, 0.0, 0.0, 0.0, 1.0, 1.0, 0.0, 1.0];

/// Tile corners as (longitude, latitude) pairs, NE, NW, SE, SW.
pub fn lat_lng_quad(bounds: &GeoBounds) -> [f32; 8] {
    [
        bounds.east as f32,
        bounds.north as f32,
        bounds.west as f32,
        bounds.north as f32,
        bounds.east as f32,
        bounds.south as f32,
        bounds.west as f32,
        bounds.south as f32,
    ]
}

/// Tile corners in projected space, NE, NW, SE, SW.
///
/// `min` is the projection of the south-west corner and `max` of the north-east one.
pub fn crs_quad(min: Point, max: Point) -> [f32; 8] {
    [
        max.x as f32,
        max.y as f32,
        min.x as f32,
        max.y as f32,
        max.x as f32,
        min.y as f32,
        min.x as f32,
        min.y as f32,
    ]
}

/// The four vertex buffers every tile is drawn from.
///
/// The vertex and texture quads never change; the CRS and lat/lng quads are
/// overwritten before each draw.
#[derive(Debug, Clone, Copy)]
pub(crate) struct GeometryBuffers {
    vertex: BufferId,
    texture: BufferId,
    crs: BufferId,
    lat_lng: BufferId,
}

impl GeometryBuffers {
    pub fn new(ctx: &mut dyn GpuContext, attributes: &AttributeLocations) -> Self {
        let buffers = Self {
            vertex: ctx.create_buffer(),
            texture: ctx.create_buffer(),
            crs: ctx.create_buffer(),
            lat_lng: ctx.create_buffer(),
        };
        ctx.buffer_data(buffers.vertex, &VERTEX_QUAD);
        ctx.buffer_data(buffers.texture, &TEXTURE_QUAD);
        ctx.buffer_data(buffers.crs, &[0.0; 8]);
        ctx.buffer_data(buffers.lat_lng, &[0.0; 8]);

        let bindings = [
            (attributes.vertex, buffers.vertex),
            (attributes.texture, buffers.texture),
            (attributes.crs, buffers.crs),
            (attributes.lat_lng, buffers.lat_lng),
        ];
        for (location, buffer) in bindings {
            if let Some(location) = location {
                ctx.bind_attribute(location, buffer, 2);
            }
        }
        buffers
    }

    pub fn update_tile_geometry(
        &self,
        ctx: &mut dyn GpuContext,
        bounds: &GeoBounds,
        crs_min: Point,
        crs_max: Point,
    ) {
        ctx.buffer_data(self.lat_lng, &lat_lng_quad(bounds));
        ctx.buffer_data(self.crs, &crs_quad(crs_min, crs_max));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quads_share_corner_order() {
        let bounds = GeoBounds {
            west: -10.0,
            east: 10.0,
            north: 50.0,
            south: 40.0,
        };
        let lat_lng = lat_lng_quad(&bounds);
        // Pair each corner's clip-space sign with its geographic coordinate.
        for corner in 0..4 {
            let (vx, vy) = (VERTEX_QUAD[corner * 2], VERTEX_QUAD[corner * 2 + 1]);
            let (lng, lat) = (lat_lng[corner * 2], lat_lng[corner * 2 + 1]);
            assert_eq!(lng, if vx > 0.0 { 10.0 } else { -10.0 });
            assert_eq!(lat, if vy > 0.0 { 50.0 } else { 40.0 });
            let (u, v) = (TEXTURE_QUAD[corner * 2], TEXTURE_QUAD[corner * 2 + 1]);
            assert_eq!(u, if vx > 0.0 { 1.0 } else { 0.0 });
            assert_eq!(v, if vy > 0.0 { 0.0 } else { 1.0 });
        }
    }

    #[test]
    fn crs_quad_orders_projected_corners() {
        let quad = crs_quad(Point::new(-5.0, -2.0), Point::new(5.0, 2.0));
        assert_eq!(quad, [5.0, 2.0, -5.0, 2.0, 5.0, -2.0, -5.0, -2.0]);
    }
}
