//! Draw-surface parsing: planar faces, triangle soups, foliage, flares.
//!
//! Texture coordinates come out of the compiler with arbitrary integer
//! offsets; each connected UV island is recentered toward the [0,1] square
//! so large maps keep texcoord precision. The recentering is idempotent:
//! running it on already-centered data changes nothing.

use tremor_common::bspfile::{DSurface, DrawVert};
use tremor_common::math::{add_point_to_bounds, clear_bounds, dot_product, Plane};

use crate::error::LoadError;
use crate::world::{SurfaceFlare, SurfaceTriangles, WorldVertex};

/// Scale a lighting byte vector up by `shift` bits, renormalizing instead
/// of clamping so an overflowing channel keeps its hue.
pub fn shift_lighting_bytes(shift: u32, color: [u8; 4]) -> [f32; 4] {
    let mut r = (color[0] as u32) << shift;
    let mut g = (color[1] as u32) << shift;
    let mut b = (color[2] as u32) << shift;

    if (r | g | b) > 255 {
        let max = r.max(g).max(b);
        r = r * 255 / max;
        g = g * 255 / max;
        b = b * 255 / max;
    }
    [
        r as f32 / 255.0,
        g as f32 / 255.0,
        b as f32 / 255.0,
        color[3] as f32 / 255.0,
    ]
}

pub(crate) fn convert_vert(dv: &DrawVert, color_shift: u32) -> WorldVertex {
    WorldVertex {
        xyz: dv.xyz,
        normal: dv.normal,
        st: dv.st,
        lightmap: dv.lightmap,
        color: shift_lighting_bytes(color_shift, dv.color),
    }
}

// =============================================================
//  UV island recentering
// =============================================================

/// Recenter every connected UV island of a triangle mesh.
///
/// Islands are found by propagating the minimum vertex index across
/// triangles until labels stabilize, then each island shifts by the integer
/// nearest to (mid - 0.5) per component. Islands already inside [0,1] get a
/// zero shift.
pub fn recenter_texcoords(verts: &mut [WorldVertex], indexes: &[u32]) {
    if verts.is_empty() {
        return;
    }

    let mut labels: Vec<usize> = (0..verts.len()).collect();
    loop {
        let mut changed = false;
        for tri in indexes.chunks_exact(3) {
            let (a, b, c) = (tri[0] as usize, tri[1] as usize, tri[2] as usize);
            let min = labels[a].min(labels[b]).min(labels[c]);
            for &v in &[a, b, c] {
                if labels[v] != min {
                    labels[v] = min;
                    changed = true;
                }
            }
        }
        if !changed {
            break;
        }
    }

    // st bounds per island, keyed by root label
    let mut bounds: Vec<Option<[f32; 4]>> = vec![None; verts.len()];
    for (i, v) in verts.iter().enumerate() {
        let entry = &mut bounds[labels[i]];
        match entry {
            Some(b) => {
                b[0] = b[0].min(v.st[0]);
                b[1] = b[1].min(v.st[1]);
                b[2] = b[2].max(v.st[0]);
                b[3] = b[3].max(v.st[1]);
            }
            None => *entry = Some([v.st[0], v.st[1], v.st[0], v.st[1]]),
        }
    }

    for (i, v) in verts.iter_mut().enumerate() {
        if let Some(b) = bounds[labels[i]] {
            let shift_s = (0.5 * (b[0] + b[2]) - 0.5).round_ties_even();
            let shift_t = (0.5 * (b[1] + b[3]) - 0.5).round_ties_even();
            v.st[0] -= shift_s;
            v.st[1] -= shift_t;
        }
    }
}

// =============================================================
//  Parsers
// =============================================================

fn gather_triangles(
    ds: &DSurface,
    drawverts: &[DrawVert],
    drawindexes: &[i32],
    color_shift: u32,
) -> Result<SurfaceTriangles, LoadError> {
    let first_vert = ds.first_vert as usize;
    let num_verts = ds.num_verts as usize;
    let first_index = ds.first_index as usize;
    let num_indexes = ds.num_indexes as usize;

    if first_vert + num_verts > drawverts.len() {
        return Err(LoadError::BadIndex {
            what: "draw vert",
            index: ds.first_vert + ds.num_verts,
            max: drawverts.len(),
        });
    }
    if first_index + num_indexes > drawindexes.len() {
        return Err(LoadError::BadIndex {
            what: "draw index",
            index: ds.first_index + ds.num_indexes,
            max: drawindexes.len(),
        });
    }

    let mut tri = SurfaceTriangles::default();
    tri.bounds = clear_bounds();
    tri.verts.reserve(num_verts);
    for dv in &drawverts[first_vert..first_vert + num_verts] {
        let v = convert_vert(dv, color_shift);
        add_point_to_bounds(&v.xyz, &mut tri.bounds);
        tri.verts.push(v);
    }

    tri.indexes.reserve(num_indexes);
    for &raw in &drawindexes[first_index..first_index + num_indexes] {
        if raw < 0 || raw as usize >= num_verts {
            return Err(LoadError::BadIndex {
                what: "surface triangle",
                index: raw,
                max: num_verts,
            });
        }
        tri.indexes.push(raw as u32);
    }
    Ok(tri)
}

/// Planar face: triangle payload plus the face plane from the compiler.
pub fn parse_face(
    ds: &DSurface,
    drawverts: &[DrawVert],
    drawindexes: &[i32],
    color_shift: u32,
) -> Result<SurfaceTriangles, LoadError> {
    let mut tri = gather_triangles(ds, drawverts, drawindexes, color_shift)?;
    recenter_texcoords(&mut tri.verts, &tri.indexes);

    let normal = ds.lightmap_vecs[2];
    let dist = tri
        .verts
        .first()
        .map(|v| dot_product(&v.xyz, &normal))
        .unwrap_or(0.0);
    tri.plane = Some(Plane::new(normal, dist));
    Ok(tri)
}

/// Triangle soup; foliage loads through the same path.
pub fn parse_triangle_soup(
    ds: &DSurface,
    drawverts: &[DrawVert],
    drawindexes: &[i32],
    color_shift: u32,
) -> Result<SurfaceTriangles, LoadError> {
    let mut tri = gather_triangles(ds, drawverts, drawindexes, color_shift)?;
    recenter_texcoords(&mut tri.verts, &tri.indexes);
    Ok(tri)
}

pub fn parse_flare(ds: &DSurface) -> SurfaceFlare {
    SurfaceFlare {
        origin: ds.lightmap_origin,
        normal: ds.lightmap_vecs[2],
        color: ds.lightmap_vecs[0],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quad(st_offset: [f32; 2]) -> (Vec<WorldVertex>, Vec<u32>) {
        let mut verts = Vec::new();
        for (x, y) in [(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 1.0)] {
            verts.push(WorldVertex {
                xyz: [x * 64.0, y * 64.0, 0.0],
                st: [x + st_offset[0], y + st_offset[1]],
                ..WorldVertex::default()
            });
        }
        (verts, vec![0, 1, 2, 0, 2, 3])
    }

    // ---------------------------------------------------------
    //  recentering
    // ---------------------------------------------------------

    #[test]
    fn test_unit_island_is_untouched() {
        let (mut verts, indexes) = quad([0.0, 0.0]);
        let before = verts.clone();
        recenter_texcoords(&mut verts, &indexes);
        assert_eq!(verts, before);
    }

    #[test]
    fn test_offset_island_recenters() {
        let (mut verts, indexes) = quad([7.0, -3.0]);
        recenter_texcoords(&mut verts, &indexes);
        for (v, (x, y)) in verts
            .iter()
            .zip([(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 1.0)])
        {
            assert!((v.st[0] - x).abs() < 1e-5);
            assert!((v.st[1] - y).abs() < 1e-5);
        }
    }

    #[test]
    fn test_recentering_is_idempotent() {
        let (mut verts, indexes) = quad([12.0, 5.0]);
        recenter_texcoords(&mut verts, &indexes);
        let once = verts.clone();
        recenter_texcoords(&mut verts, &indexes);
        assert_eq!(verts, once);
    }

    #[test]
    fn test_islands_shift_independently() {
        let (mut verts, mut indexes) = quad([9.0, 0.0]);
        let (other_verts, other_indexes) = quad([0.0, 0.0]);
        let base = verts.len() as u32;
        verts.extend(other_verts);
        indexes.extend(other_indexes.iter().map(|i| i + base));

        recenter_texcoords(&mut verts, &indexes);
        // first island shifted back, second untouched
        assert!((verts[0].st[0] - 0.0).abs() < 1e-5);
        assert!((verts[base as usize].st[0] - 0.0).abs() < 1e-5);
    }

    // ---------------------------------------------------------
    //  color shift
    // ---------------------------------------------------------

    #[test]
    fn test_shift_preserves_hue_on_overflow() {
        let c = shift_lighting_bytes(2, [200, 100, 50, 255]);
        assert!((c[0] - 1.0).abs() < 1e-5);
        assert!((c[1] - 0.5).abs() < 0.01);
        assert!((c[2] - 0.25).abs() < 0.01);
    }

    #[test]
    fn test_shift_zero_is_plain_normalize() {
        let c = shift_lighting_bytes(0, [255, 0, 0, 128]);
        assert_eq!(c[0], 1.0);
        assert_eq!(c[1], 0.0);
        assert!((c[3] - 128.0 / 255.0).abs() < 1e-5);
    }
}
