//! Bicubic patch subdivision.
//!
//! Patches come in as biquadratic control grids and get subdivided into
//! rectangular meshes. Spans flatter than the subdivision threshold are
//! kept coarse; their midpoint deviation is recorded per row/column so
//! neighboring patches can be stitched to the same LOD later.

use tremor_common::math::{
    add_point_to_bounds, clear_bounds, cross_product, distance, dot_product, sphere_from_bounds,
    vector_ma, vector_normalize, vector_subtract, Vec3,
};

use crate::world::{SurfaceGrid, WorldVertex};

pub const MAX_GRID_SIZE: usize = 65;

/// Error value marking a colinear row/column for removal.
const COLINEAR: f32 = 999.0;

fn lerp_vert(a: &WorldVertex, b: &WorldVertex) -> WorldVertex {
    let mut out = WorldVertex::default();
    for i in 0..3 {
        out.xyz[i] = 0.5 * (a.xyz[i] + b.xyz[i]);
        out.normal[i] = 0.5 * (a.normal[i] + b.normal[i]);
    }
    for i in 0..2 {
        out.st[i] = 0.5 * (a.st[i] + b.st[i]);
        out.lightmap[i] = 0.5 * (a.lightmap[i] + b.lightmap[i]);
    }
    for i in 0..4 {
        out.color[i] = 0.5 * (a.color[i] + b.color[i]);
    }
    out
}

fn transpose(ctrl: &mut Vec<Vec<WorldVertex>>) {
    let rows = ctrl.len();
    let cols = ctrl[0].len();
    let mut out = vec![vec![WorldVertex::default(); rows]; cols];
    for (i, row) in ctrl.iter().enumerate() {
        for (j, v) in row.iter().enumerate() {
            out[j][i] = *v;
        }
    }
    *ctrl = out;
}

/// Deviation of the midpoint control from the chord through its neighbors,
/// ignoring the along-chord component.
fn span_deviation(a: &Vec3, peak: &Vec3, b: &Vec3) -> f32 {
    let mid = [
        0.25 * (a[0] + 2.0 * peak[0] + b[0]),
        0.25 * (a[1] + 2.0 * peak[1] + b[1]),
        0.25 * (a[2] + 2.0 * peak[2] + b[2]),
    ];
    let mut off = vector_subtract(&mid, a);
    let mut dir = vector_subtract(b, a);
    if vector_normalize(&mut dir) == 0.0 {
        return distance(&mid, a);
    }
    let d = dot_product(&off, &dir);
    off = vector_ma(&off, -d, &dir);
    dot_product(&off, &off).sqrt()
}

fn surface_normals(ctrl: &[Vec<WorldVertex>]) -> Vec<Vec<Vec3>> {
    let height = ctrl.len();
    let width = ctrl[0].len();
    let mut normals = vec![vec![[0.0f32; 3]; width]; height];
    for i in 0..height {
        for j in 0..width {
            let du = vector_subtract(
                &ctrl[i][(j + 1).min(width - 1)].xyz,
                &ctrl[i][j.saturating_sub(1)].xyz,
            );
            let dv = vector_subtract(
                &ctrl[(i + 1).min(height - 1)][j].xyz,
                &ctrl[i.saturating_sub(1)][j].xyz,
            );
            let mut n = cross_product(&dv, &du);
            if vector_normalize(&mut n) == 0.0 {
                n = ctrl[i][j].normal;
            }
            normals[i][j] = n;
        }
    }
    normals
}

/// Subdivide a control grid until every span deviates less than
/// `subdivisions` world units, then drop colinear rows/columns.
pub fn subdivide_patch_to_grid(
    patch_width: usize,
    patch_height: usize,
    points: &[WorldVertex],
    subdivisions: f32,
) -> SurfaceGrid {
    let mut ctrl: Vec<Vec<WorldVertex>> = (0..patch_height)
        .map(|i| points[i * patch_width..(i + 1) * patch_width].to_vec())
        .collect();

    let mut error_table = [[0.0f32; MAX_GRID_SIZE]; 2];
    let mut width = patch_width;
    let mut height = patch_height;

    for dir in 0..2 {
        let mut j = 0;
        while j + 2 < width {
            let mut max_len = 0.0f32;
            for row in ctrl.iter().take(height) {
                let len = span_deviation(&row[j].xyz, &row[j + 1].xyz, &row[j + 2].xyz);
                max_len = max_len.max(len);
            }

            if max_len < 0.1 {
                // all points on the chord, the whole column can go
                error_table[dir][j + 1] = COLINEAR;
                j += 2;
                continue;
            }
            if width + 2 > MAX_GRID_SIZE || max_len <= subdivisions {
                error_table[dir][j + 1] = 1.0 / max_len;
                j += 2;
                continue;
            }

            // replace the peak with three approximating columns, then
            // recheck the same span
            error_table[dir][j + 2] = 1.0 / max_len;
            width += 2;
            for row in ctrl.iter_mut().take(height) {
                let prev = lerp_vert(&row[j], &row[j + 1]);
                let next = lerp_vert(&row[j + 1], &row[j + 2]);
                let mid = lerp_vert(&prev, &next);
                row[j + 1] = prev;
                row.insert(j + 2, mid);
                row.insert(j + 3, next);
            }
        }

        transpose(&mut ctrl);
        std::mem::swap(&mut width, &mut height);
    }

    // cull colinear columns
    let mut i = 1;
    while i + 1 < width {
        if error_table[0][i] == COLINEAR {
            for row in ctrl.iter_mut().take(height) {
                row.remove(i);
            }
            for j in i..width - 1 {
                error_table[0][j] = error_table[0][j + 1];
            }
            width -= 1;
        } else {
            i += 1;
        }
    }
    // and colinear rows
    let mut i = 1;
    while i + 1 < height {
        if error_table[1][i] == COLINEAR {
            ctrl.remove(i);
            for j in i..height - 1 {
                error_table[1][j] = error_table[1][j + 1];
            }
            height -= 1;
        } else {
            i += 1;
        }
    }

    let normals = surface_normals(&ctrl);
    let mut bounds = clear_bounds();
    let mut verts = Vec::with_capacity(width * height);
    for i in 0..height {
        for j in 0..width {
            let mut v = ctrl[i][j];
            v.normal = normals[i][j];
            add_point_to_bounds(&v.xyz, &mut bounds);
            verts.push(v);
        }
    }
    let (lod_origin, lod_radius) = sphere_from_bounds(&bounds);

    SurfaceGrid {
        width,
        height,
        verts,
        width_lod_error: error_table[0][..width].to_vec(),
        height_lod_error: error_table[1][..height].to_vec(),
        bounds,
        lod_origin,
        lod_radius,
        lod_fixed: false,
        lod_stitched: false,
        indexes: Vec::new(),
    }
}

// =============================================================
//  Stitching support
// =============================================================

/// Insert a column after `column - 1`, averaging its horizontal neighbors;
/// the vertex at `row` snaps exactly to `point`. Returns false when the
/// grid is already at the size limit.
pub fn grid_insert_column(
    grid: &mut SurfaceGrid,
    column: usize,
    row: usize,
    point: Vec3,
    lod_error: f32,
) -> bool {
    if grid.width + 1 > MAX_GRID_SIZE {
        return false;
    }
    let old_width = grid.width;
    let mut verts = Vec::with_capacity((old_width + 1) * grid.height);
    for i in 0..grid.height {
        for j in 0..=old_width {
            if j == column {
                let mut v = lerp_vert(
                    &grid.verts[i * old_width + j - 1],
                    &grid.verts[i * old_width + j],
                );
                if i == row {
                    v.xyz = point;
                }
                verts.push(v);
            } else {
                let src = if j < column { j } else { j - 1 };
                verts.push(grid.verts[i * old_width + src]);
            }
        }
    }
    grid.verts = verts;
    grid.width += 1;
    grid.width_lod_error.insert(column, lod_error);
    refresh_bounds(grid);
    true
}

/// Row counterpart of [`grid_insert_column`].
pub fn grid_insert_row(
    grid: &mut SurfaceGrid,
    row: usize,
    column: usize,
    point: Vec3,
    lod_error: f32,
) -> bool {
    if grid.height + 1 > MAX_GRID_SIZE {
        return false;
    }
    let width = grid.width;
    let mut new_row = Vec::with_capacity(width);
    for j in 0..width {
        let mut v = lerp_vert(
            &grid.verts[(row - 1) * width + j],
            &grid.verts[row * width + j],
        );
        if j == column {
            v.xyz = point;
        }
        new_row.push(v);
    }
    let at = row * width;
    grid.verts.splice(at..at, new_row);
    grid.height += 1;
    grid.height_lod_error.insert(row, lod_error);
    refresh_bounds(grid);
    true
}

fn refresh_bounds(grid: &mut SurfaceGrid) {
    let mut bounds = clear_bounds();
    for v in &grid.verts {
        add_point_to_bounds(&v.xyz, &mut bounds);
    }
    grid.bounds = bounds;
}

/// Build the triangle list, two per cell. Runs once after stitching.
pub fn build_grid_indexes(grid: &mut SurfaceGrid) {
    let (w, h) = (grid.width, grid.height);
    let mut indexes = Vec::with_capacity((w - 1) * (h - 1) * 6);
    for i in 0..h - 1 {
        for j in 0..w - 1 {
            let v1 = (i * w + j) as u32;
            let v2 = v1 + 1;
            let v3 = v1 + w as u32;
            let v4 = v3 + 1;
            indexes.extend_from_slice(&[v1, v3, v2, v2, v3, v4]);
        }
    }
    grid.indexes = indexes;
}
