//! Volume light grid.
//!
//! The grid covers the world bounds at a worldspawn-chosen cell size. Each
//! sample holds ambient and directed color plus a dominant light direction
//! packed as latitude/longitude bytes. Samples inside solid geometry come
//! out of the compiler as all-zero; those are filled from their set
//! neighbors so dynamic objects never go pitch black crossing them.

use std::f32::consts::PI;

use log::warn;

use tremor_common::bspfile::DGridPoint;
use tremor_common::math::{Bounds, Vec3};

/// One unpacked grid sample, colors in linear [0,1].
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct GridPoint {
    pub ambient: Vec3,
    pub directed: Vec3,
    pub direction: Vec3,
}

#[derive(Clone, Debug)]
pub struct LightGrid {
    pub origin: Vec3,
    pub cell_size: Vec3,
    pub inverse_size: Vec3,
    pub counts: [usize; 3],
    pub points: Vec<GridPoint>,
}

impl LightGrid {
    pub fn num_points(&self) -> usize {
        self.counts[0] * self.counts[1] * self.counts[2]
    }

    pub fn index(&self, x: usize, y: usize, z: usize) -> usize {
        x + y * self.counts[0] + z * self.counts[0] * self.counts[1]
    }

    pub fn point(&self, x: usize, y: usize, z: usize) -> &GridPoint {
        &self.points[self.index(x, y, z)]
    }
}

/// Synthetic single-sample grid used when the lump doesn't match the
/// expected point count; keeps every consumer working on broken maps.
pub fn default_light_grid() -> LightGrid {
    LightGrid {
        origin: [0.0, 0.0, 0.0],
        cell_size: [64.0, 64.0, 128.0],
        inverse_size: [1.0 / 64.0, 1.0 / 64.0, 1.0 / 128.0],
        counts: [1, 1, 1],
        points: vec![GridPoint {
            ambient: [0.3, 0.3, 0.3],
            directed: [0.7, 0.7, 0.7],
            direction: [0.0, 0.0, 1.0],
        }],
    }
}

fn shift_grid_color(shift: u32, bytes: [u8; 3]) -> Vec3 {
    let mut c = [
        (bytes[0] as u32) << shift,
        (bytes[1] as u32) << shift,
        (bytes[2] as u32) << shift,
    ];
    if (c[0] | c[1] | c[2]) > 255 {
        let max = c[0].max(c[1]).max(c[2]);
        c = [c[0] * 255 / max, c[1] * 255 / max, c[2] * 255 / max];
    }
    [
        c[0] as f32 / 255.0,
        c[1] as f32 / 255.0,
        c[2] as f32 / 255.0,
    ]
}

fn decode_lat_long(lat_long: [u8; 2]) -> Vec3 {
    let lng = lat_long[0] as f32 * (PI / 128.0);
    let lat = lat_long[1] as f32 * (PI / 128.0);
    [
        lat.cos() * lng.sin(),
        lat.sin() * lng.sin(),
        lng.cos(),
    ]
}

/// Build the grid from the lump. A point-count mismatch degrades to the
/// default grid instead of failing the load.
pub fn load_light_grid(
    raw_points: &[DGridPoint],
    world_bounds: &Bounds,
    grid_size: Vec3,
    color_shift: u32,
) -> LightGrid {
    let mut origin = [0.0f32; 3];
    let mut counts = [0usize; 3];
    for i in 0..3 {
        origin[i] = grid_size[i] * (world_bounds[0][i] / grid_size[i]).ceil();
        let maxs = grid_size[i] * (world_bounds[1][i] / grid_size[i]).floor();
        counts[i] = ((maxs - origin[i]) / grid_size[i]) as usize + 1;
    }
    let expected = counts[0] * counts[1] * counts[2];

    if raw_points.len() != expected {
        warn!(
            "light grid mismatch: lump has {} points, expected {}",
            raw_points.len(),
            expected
        );
        return default_light_grid();
    }

    LightGrid {
        origin,
        cell_size: grid_size,
        inverse_size: [
            1.0 / grid_size[0],
            1.0 / grid_size[1],
            1.0 / grid_size[2],
        ],
        counts,
        points: raw_points
            .iter()
            .map(|p| GridPoint {
                ambient: shift_grid_color(color_shift, p.ambient),
                directed: shift_grid_color(color_shift, p.directed),
                direction: decode_lat_long(p.lat_long),
            })
            .collect(),
    }
}

fn is_unset(p: &GridPoint) -> bool {
    p.ambient == [0.0, 0.0, 0.0] && p.directed == [0.0, 0.0, 0.0]
}

/// Fill all-zero samples from their set neighbors with a separable
/// {0.25, 0.5, 0.25} kernel. Returns the number of samples filled.
pub fn fill_unset_points(grid: &mut LightGrid) -> usize {
    const WEIGHTS: [f32; 3] = [0.25, 0.5, 0.25];
    let counts = grid.counts;
    let source = grid.points.clone();
    let mut filled = 0;

    for z in 0..counts[2] {
        for y in 0..counts[1] {
            for x in 0..counts[0] {
                let index = grid.index(x, y, z);
                if !is_unset(&source[index]) {
                    continue;
                }

                let mut total = 0.0f32;
                let mut ambient = [0.0f32; 3];
                let mut directed = [0.0f32; 3];
                let mut direction = [0.0f32; 3];
                for dz in -1i32..=1 {
                    for dy in -1i32..=1 {
                        for dx in -1i32..=1 {
                            let (nx, ny, nz) =
                                (x as i32 + dx, y as i32 + dy, z as i32 + dz);
                            if nx < 0
                                || ny < 0
                                || nz < 0
                                || nx >= counts[0] as i32
                                || ny >= counts[1] as i32
                                || nz >= counts[2] as i32
                            {
                                continue;
                            }
                            let neighbor =
                                &source[grid.index(nx as usize, ny as usize, nz as usize)];
                            if is_unset(neighbor) {
                                continue;
                            }
                            let weight = WEIGHTS[(dx + 1) as usize]
                                * WEIGHTS[(dy + 1) as usize]
                                * WEIGHTS[(dz + 1) as usize];
                            total += weight;
                            for i in 0..3 {
                                ambient[i] += weight * neighbor.ambient[i];
                                directed[i] += weight * neighbor.directed[i];
                                direction[i] += weight * neighbor.direction[i];
                            }
                        }
                    }
                }

                if total > 0.0 {
                    let inv = 1.0 / total;
                    let p = &mut grid.points[index];
                    for i in 0..3 {
                        p.ambient[i] = ambient[i] * inv;
                        p.directed[i] = directed[i] * inv;
                        p.direction[i] = direction[i] * inv;
                    }
                    filled += 1;
                }
            }
        }
    }
    filled
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid_3x1x1(points: Vec<GridPoint>) -> LightGrid {
        LightGrid {
            origin: [0.0; 3],
            cell_size: [64.0, 64.0, 128.0],
            inverse_size: [1.0 / 64.0, 1.0 / 64.0, 1.0 / 128.0],
            counts: [3, 1, 1],
            points,
        }
    }

    fn lit(v: f32) -> GridPoint {
        GridPoint {
            ambient: [v, v, v],
            directed: [v, v, v],
            direction: [0.0, 0.0, 1.0],
        }
    }

    #[test]
    fn test_mismatched_lump_degrades_to_default() {
        let bounds = [[-128.0, -128.0, -128.0], [128.0, 128.0, 128.0]];
        let grid = load_light_grid(&[], &bounds, [64.0, 64.0, 128.0], 0);
        assert_eq!(grid.counts, [1, 1, 1]);
        assert!(!is_unset(&grid.points[0]));
    }

    #[test]
    fn test_unset_cell_fills_from_neighbors() {
        let mut grid = grid_3x1x1(vec![lit(0.4), GridPoint::default(), lit(0.8)]);
        assert_eq!(fill_unset_points(&mut grid), 1);
        let mid = grid.point(1, 0, 0);
        // equal weights on both sides: plain average
        assert!((mid.ambient[0] - 0.6).abs() < 1e-5);
        assert!((mid.directed[0] - 0.6).abs() < 1e-5);
    }

    #[test]
    fn test_fully_unlit_region_stays_black() {
        let mut grid = grid_3x1x1(vec![
            GridPoint::default(),
            GridPoint::default(),
            GridPoint::default(),
        ]);
        assert_eq!(fill_unset_points(&mut grid), 0);
        assert!(grid.points.iter().all(is_unset));
    }

    #[test]
    fn test_fill_is_deterministic() {
        let mut a = grid_3x1x1(vec![lit(0.4), GridPoint::default(), lit(0.8)]);
        let mut b = a.clone();
        fill_unset_points(&mut a);
        fill_unset_points(&mut b);
        assert_eq!(a.points, b.points);
        // a second pass changes nothing further
        let snapshot = a.points.clone();
        fill_unset_points(&mut a);
        assert_eq!(a.points, snapshot);
    }

    #[test]
    fn test_direction_decode_poles() {
        let d = decode_lat_long([0, 0]);
        assert!((d[2] - 1.0).abs() < 1e-5);
        let d = decode_lat_long([128, 0]);
        assert!((d[2] + 1.0).abs() < 1e-5);
    }
}
