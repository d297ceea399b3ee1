use image::RgbaImage;

use crate::error::GpuError;
use crate::gpu::{GeometryBuffers, GpuContext};
use crate::host::TileHost;
use crate::types::TileCoords;

/// Draws one tile with whatever textures are currently bound and reads it back.
///
/// The quad covers the whole viewport, so the target is not cleared first.
pub(crate) fn render_tile(
    ctx: &mut dyn GpuContext,
    geometry: &GeometryBuffers,
    host: &dyn TileHost,
    coords: TileCoords,
    tile_size: u32,
) -> Result<RgbaImage, GpuError> {
    ctx.viewport(tile_size, tile_size)?;
    ctx.enable_blend();

    let bounds = host.tile_bounds(coords);
    let crs_min = host.project(bounds.south_west());
    let crs_max = host.project(bounds.north_east());
    geometry.update_tile_geometry(ctx, &bounds, crs_min, crs_max);

    ctx.draw_triangle_strip(4)?;
    ctx.read_pixels(tile_size, tile_size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::mock::{MockCall, MockContext, STANDARD_VERTEX};
    use crate::gpu::compile_and_link;
    use crate::host::ResidentTile;
    use crate::types::{GeoBounds, LatLng, Point};

    /// One-degree tiles on a plate carrée grid.
    struct DegreeGrid;

    impl TileHost for DegreeGrid {
        fn tile_bounds(&self, coords: TileCoords) -> GeoBounds {
            GeoBounds {
                west: coords.x as f64,
                east: coords.x as f64 + 1.0,
                north: coords.y as f64 + 1.0,
                south: coords.y as f64,
            }
        }

        fn project(&self, point: LatLng) -> Point {
            Point::new(point.lng * 10.0, point.lat * 10.0)
        }

        fn resident_tiles(&self) -> Vec<ResidentTile> {
            Vec::new()
        }

        fn zoom(&self) -> u8 {
            0
        }
    }

    const GEO_FRAGMENT: &str = r"
varying vec2 v_LatLngCoords;
void main() { gl_FragColor = vec4(fract(v_LatLngCoords / 16.0), 0.0, 1.0); }
";

    fn geo_context() -> MockContext {
        MockContext::with_fragment(|inputs| {
            let [lng, lat] = inputs.attribute("a_LatLngCoords");
            [(lng / 16.0).fract(), (lat / 16.0).fract(), 0.0, 1.0]
        })
    }

    fn setup() -> (MockContext, GeometryBuffers) {
        let mut ctx = geo_context();
        let program = compile_and_link(&mut ctx, STANDARD_VERTEX, GEO_FRAGMENT).unwrap();
        ctx.use_program(program.id);
        let geometry = GeometryBuffers::new(&mut ctx, &program.attributes);
        (ctx, geometry)
    }

    #[test]
    fn sequential_renders_do_not_leak_geometry() {
        let (mut ctx, geometry) = setup();
        let b = TileCoords::new(7, 3, 4);
        let alone = render_tile(&mut ctx, &geometry, &DegreeGrid, b, 8).unwrap();

        let (mut ctx, geometry) = setup();
        render_tile(&mut ctx, &geometry, &DegreeGrid, TileCoords::new(1, 1, 4), 8).unwrap();
        let after_a = render_tile(&mut ctx, &geometry, &DegreeGrid, b, 8).unwrap();

        assert_eq!(alone, after_a);
    }

    #[test]
    fn uploads_projected_corners_before_a_single_draw() {
        let (mut ctx, geometry) = setup();
        ctx.clear_calls();
        render_tile(&mut ctx, &geometry, &DegreeGrid, TileCoords::new(2, 5, 1), 4).unwrap();

        let uploads: Vec<Vec<f32>> = ctx
            .calls()
            .iter()
            .filter_map(|call| match call {
                MockCall::BufferData { data, .. } => Some(data.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(uploads[0], vec![3.0, 6.0, 2.0, 6.0, 3.0, 5.0, 2.0, 5.0]);
        assert_eq!(uploads[1], vec![30.0, 60.0, 20.0, 60.0, 30.0, 50.0, 20.0, 50.0]);
        assert_eq!(ctx.count(|call| matches!(call, MockCall::Draw(4))), 1);
        assert_eq!(ctx.count(|call| matches!(call, MockCall::Clear)), 0);
        assert!(ctx.calls().contains(&MockCall::Viewport(4, 4)));
        assert!(ctx.calls().contains(&MockCall::EnableBlend));
    }
}
