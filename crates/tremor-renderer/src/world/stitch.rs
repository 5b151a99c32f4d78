//! Patch LOD stitching.
//!
//! Neighboring patches in the same LOD group (identical LOD origin and
//! radius) must agree on subdivision along shared edges or cracks open
//! between them. Two passes run after all patches are subdivided: shared
//! edge vertices get identical LOD errors, then coarser edges receive the
//! midpoints their finer neighbors have, until no grid changes.

use tremor_common::math::Vec3;

use crate::world::curve::{grid_insert_column, grid_insert_row, MAX_GRID_SIZE};
use crate::world::{BspSurface, SurfaceData, SurfaceGrid};

const POINT_EPSILON: f32 = 0.1;
const DEGENERATE_EPSILON: f32 = 0.01;

fn points_close(a: &Vec3, b: &Vec3, epsilon: f32) -> bool {
    (a[0] - b[0]).abs() <= epsilon
        && (a[1] - b[1]).abs() <= epsilon
        && (a[2] - b[2]).abs() <= epsilon
}

fn grid_at(surfaces: &[BspSurface], i: usize) -> Option<&SurfaceGrid> {
    match &surfaces[i].data {
        SurfaceData::Grid(g) => Some(g),
        _ => None,
    }
}

fn grid_at_mut(surfaces: &mut [BspSurface], i: usize) -> Option<&mut SurfaceGrid> {
    match &mut surfaces[i].data {
        SurfaceData::Grid(g) => Some(g),
        _ => None,
    }
}

fn same_lod_group(a: &SurfaceGrid, b: &SurfaceGrid) -> bool {
    a.lod_radius == b.lod_radius && a.lod_origin == b.lod_origin
}

// =============================================================
//  Edges
// =============================================================

/// Which border of a grid an edge runs along.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum EdgeSide {
    Row(bool),    // false: row 0, true: last row
    Column(bool), // false: column 0, true: last column
}

const EDGE_SIDES: [EdgeSide; 4] = [
    EdgeSide::Row(false),
    EdgeSide::Row(true),
    EdgeSide::Column(false),
    EdgeSide::Column(true),
];

fn edge_points(grid: &SurfaceGrid, side: EdgeSide) -> Vec<Vec3> {
    match side {
        EdgeSide::Row(last) => {
            let row = if last { grid.height - 1 } else { 0 };
            (0..grid.width)
                .map(|j| grid.verts[row * grid.width + j].xyz)
                .collect()
        }
        EdgeSide::Column(last) => {
            let col = if last { grid.width - 1 } else { 0 };
            (0..grid.height)
                .map(|i| grid.verts[i * grid.width + col].xyz)
                .collect()
        }
    }
}

fn edge_lod_errors(grid: &SurfaceGrid, side: EdgeSide) -> Vec<f32> {
    match side {
        EdgeSide::Row(_) => grid.width_lod_error.clone(),
        EdgeSide::Column(_) => grid.height_lod_error.clone(),
    }
}

/// Degenerate edges (any two points merged) never drive stitching.
fn has_merged_points(points: &[Vec3]) -> bool {
    for i in 0..points.len() {
        for j in i + 1..points.len() {
            if points_close(&points[i], &points[j], POINT_EPSILON) {
                return true;
            }
        }
    }
    false
}

// =============================================================
//  Shared vertex LOD error propagation
// =============================================================

struct EdgeSnapshot {
    /// Interior edge points with their LOD errors.
    interior: Vec<(Vec3, f32)>,
}

fn snapshot_edges(grid: &SurfaceGrid) -> Vec<EdgeSnapshot> {
    EDGE_SIDES
        .iter()
        .filter_map(|&side| {
            let points = edge_points(grid, side);
            if has_merged_points(&points) {
                return None;
            }
            let errors = edge_lod_errors(grid, side);
            Some(EdgeSnapshot {
                interior: (1..points.len() - 1)
                    .map(|k| (points[k], errors[k]))
                    .collect(),
            })
        })
        .collect()
}

/// Copy LOD errors from `from` onto matching edge vertices of `grid`.
fn propagate_lod_errors(from: &[EdgeSnapshot], grid: &mut SurfaceGrid) -> bool {
    let mut touched = false;
    for snapshot in from {
        for &(point, error) in &snapshot.interior {
            for &side in &EDGE_SIDES {
                let points = edge_points(grid, side);
                if has_merged_points(&points) {
                    continue;
                }
                for l in 1..points.len() - 1 {
                    if !points_close(&point, &points[l], POINT_EPSILON) {
                        continue;
                    }
                    let slot = match side {
                        EdgeSide::Row(_) => &mut grid.width_lod_error[l],
                        EdgeSide::Column(_) => &mut grid.height_lod_error[l],
                    };
                    if *slot != error {
                        *slot = error;
                        touched = true;
                    }
                }
            }
        }
    }
    touched
}

/// Give every vertex shared between grids of one LOD group the same LOD
/// error, flood-filling through touching grids.
pub fn fix_shared_vertex_lod_errors(surfaces: &mut [BspSurface]) {
    for i in 0..surfaces.len() {
        let Some(grid) = grid_at(surfaces, i) else {
            continue;
        };
        if grid.lod_fixed {
            continue;
        }
        if let Some(grid) = grid_at_mut(surfaces, i) {
            grid.lod_fixed = true;
        }

        let mut worklist = vec![i];
        while let Some(current) = worklist.pop() {
            let Some(grid1) = grid_at(surfaces, current) else {
                continue;
            };
            let snapshot = snapshot_edges(grid1);
            let group = (grid1.lod_origin, grid1.lod_radius);

            for j in i + 1..surfaces.len() {
                let Some(grid2) = grid_at(surfaces, j) else {
                    continue;
                };
                if grid2.lod_fixed
                    || grid2.lod_origin != group.0
                    || grid2.lod_radius != group.1
                {
                    continue;
                }
                let Some(grid2) = grid_at_mut(surfaces, j) else {
                    continue;
                };
                if propagate_lod_errors(&snapshot, grid2) {
                    grid2.lod_fixed = true;
                    worklist.push(j);
                }
            }
        }
    }
}

// =============================================================
//  Crack stitching
// =============================================================

struct StitchCandidate {
    a: Vec3,
    mid: Vec3,
    b: Vec3,
    error: f32,
}

fn edge_candidates(grid: &SurfaceGrid) -> Vec<StitchCandidate> {
    let mut out = Vec::new();
    for &side in &EDGE_SIDES {
        let points = edge_points(grid, side);
        if has_merged_points(&points) {
            continue;
        }
        let errors = edge_lod_errors(grid, side);
        // forward and reversed runs, two steps at a time
        let mut k = 0;
        while k + 2 < points.len() {
            out.push(StitchCandidate {
                a: points[k],
                mid: points[k + 1],
                b: points[k + 2],
                error: errors[k + 1],
            });
            out.push(StitchCandidate {
                a: points[k + 2],
                mid: points[k + 1],
                b: points[k],
                error: errors[k + 1],
            });
            k += 2;
        }
    }
    out
}

/// Insert one missing edge midpoint of `grid1num` into `grid2num`.
/// Returns false when the edge runs already match.
fn stitch_pair(surfaces: &mut [BspSurface], grid1num: usize, grid2num: usize) -> bool {
    let Some(grid1) = grid_at(surfaces, grid1num) else {
        return false;
    };
    let candidates = edge_candidates(grid1);

    let Some(grid2) = grid_at_mut(surfaces, grid2num) else {
        return false;
    };
    for cand in &candidates {
        for &side in &EDGE_SIDES {
            match side {
                EdgeSide::Row(_) if grid2.width >= MAX_GRID_SIZE => continue,
                EdgeSide::Column(_) if grid2.height >= MAX_GRID_SIZE => continue,
                _ => {}
            }
            let points = edge_points(grid2, side);
            for l in 0..points.len() - 1 {
                if !points_close(&cand.a, &points[l], POINT_EPSILON)
                    || !points_close(&cand.b, &points[l + 1], POINT_EPSILON)
                {
                    continue;
                }
                // span already collapsed, nothing to split
                if points_close(&points[l], &points[l + 1], DEGENERATE_EPSILON) {
                    continue;
                }
                // grid2 already carries the midpoint
                if points_close(&cand.mid, &points[l], POINT_EPSILON)
                    || points_close(&cand.mid, &points[l + 1], POINT_EPSILON)
                {
                    continue;
                }
                let inserted = match side {
                    EdgeSide::Row(last) => {
                        let row = if last { grid2.height - 1 } else { 0 };
                        grid_insert_column(grid2, l + 1, row, cand.mid, cand.error)
                    }
                    EdgeSide::Column(last) => {
                        let col = if last { grid2.width - 1 } else { 0 };
                        grid_insert_row(grid2, l + 1, col, cand.mid, cand.error)
                    }
                };
                if inserted {
                    grid2.lod_stitched = false;
                    return true;
                }
            }
        }
    }
    false
}

fn try_stitching_patch(surfaces: &mut [BspSurface], grid1num: usize) -> usize {
    let mut stitches = 0;
    for j in 0..surfaces.len() {
        if j == grid1num {
            continue;
        }
        let (Some(grid1), Some(grid2)) = (grid_at(surfaces, grid1num), grid_at(surfaces, j))
        else {
            continue;
        };
        if !same_lod_group(grid1, grid2) {
            continue;
        }
        while stitch_pair(surfaces, grid1num, j) {
            stitches += 1;
        }
    }
    stitches
}

/// Keep stitching until every grid has seen its final neighbors.
/// Returns the total midpoint insertions.
pub fn stitch_all_patches(surfaces: &mut [BspSurface]) -> usize {
    let mut total = 0;
    loop {
        let mut stitched = false;
        for i in 0..surfaces.len() {
            let Some(grid) = grid_at(surfaces, i) else {
                continue;
            };
            if grid.lod_stitched {
                continue;
            }
            if let Some(grid) = grid_at_mut(surfaces, i) {
                grid.lod_stitched = true;
            }
            let n = try_stitching_patch(surfaces, i);
            total += n;
            stitched |= n != 0;
        }
        if !stitched {
            break;
        }
    }
    total
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::material::DEFAULT_MATERIAL;
    use crate::world::WorldVertex;
    use tremor_common::math::clear_bounds;

    fn vert(xyz: Vec3) -> WorldVertex {
        WorldVertex {
            xyz,
            ..WorldVertex::default()
        }
    }

    fn make_grid(width: usize, height: usize, points: Vec<Vec3>) -> SurfaceGrid {
        let mut bounds = clear_bounds();
        for p in &points {
            tremor_common::math::add_point_to_bounds(p, &mut bounds);
        }
        SurfaceGrid {
            width,
            height,
            verts: points.into_iter().map(vert).collect(),
            width_lod_error: vec![0.0; width],
            height_lod_error: vec![0.0; height],
            bounds,
            lod_origin: [0.0, 0.0, 0.0],
            lod_radius: 100.0,
            lod_fixed: false,
            lod_stitched: false,
            indexes: Vec::new(),
        }
    }

    fn surface(grid: SurfaceGrid) -> BspSurface {
        BspSurface {
            material: DEFAULT_MATERIAL,
            fog_index: -1,
            lightmap_num: -1,
            data: SurfaceData::Grid(grid),
            light_count: 0,
            view_count: 0,
        }
    }

    /// A fine grid whose bottom row has a raised midpoint, next to a coarse
    /// grid sharing that edge without the midpoint.
    fn cracked_pair() -> Vec<BspSurface> {
        let mut fine = make_grid(
            3,
            2,
            vec![
                [0.0, 0.0, 0.0],
                [16.0, 0.0, 8.0],
                [32.0, 0.0, 0.0],
                [0.0, 24.0, 0.0],
                [16.0, 24.0, 8.0],
                [32.0, 24.0, 0.0],
            ],
        );
        fine.width_lod_error = vec![0.0, 0.125, 0.0];

        let coarse = make_grid(
            2,
            2,
            vec![
                [0.0, -24.0, 0.0],
                [32.0, -24.0, 0.0],
                [0.0, 0.0, 0.0],
                [32.0, 0.0, 0.0],
            ],
        );
        vec![surface(fine), surface(coarse)]
    }

    #[test]
    fn test_stitch_inserts_missing_midpoint() {
        let mut surfaces = cracked_pair();
        let stitches = stitch_all_patches(&mut surfaces);
        assert!(stitches >= 1);

        let Some(SurfaceData::Grid(coarse)) = surfaces.get(1).map(|s| &s.data) else {
            panic!("expected a grid");
        };
        assert_eq!(coarse.width, 3);
        // the inserted column snapped to the fine grid's midpoint
        let shared_row = coarse.height - 1;
        let mid = coarse.verts[shared_row * coarse.width + 1].xyz;
        assert!(points_close(&mid, &[16.0, 0.0, 8.0], 0.001));
        assert_eq!(coarse.width_lod_error[1], 0.125);
    }

    #[test]
    fn test_stitching_is_idempotent() {
        let mut surfaces = cracked_pair();
        stitch_all_patches(&mut surfaces);
        // clear the stitched flags and run again: nothing more to insert
        for s in surfaces.iter_mut() {
            if let SurfaceData::Grid(g) = &mut s.data {
                g.lod_stitched = false;
            }
        }
        assert_eq!(stitch_all_patches(&mut surfaces), 0);
    }

    #[test]
    fn test_different_lod_groups_never_stitch() {
        let mut surfaces = cracked_pair();
        if let SurfaceData::Grid(g) = &mut surfaces[1].data {
            g.lod_radius = 50.0;
        }
        assert_eq!(stitch_all_patches(&mut surfaces), 0);
    }

    #[test]
    fn test_lod_error_propagation() {
        let mut surfaces = cracked_pair();
        // matching interior vertex on the shared edge of both grids
        if let SurfaceData::Grid(g) = &mut surfaces[1].data {
            grid_insert_column(g, 1, g.height - 1, [16.0, 0.0, 8.0], 0.0);
        }
        fix_shared_vertex_lod_errors(&mut surfaces);
        let Some(SurfaceData::Grid(coarse)) = surfaces.get(1).map(|s| &s.data) else {
            panic!("expected a grid");
        };
        assert_eq!(coarse.width_lod_error[1], 0.125);
    }
}
