//! Static world geometry merge.
//!
//! All opaque world surfaces share one vertex buffer and one index buffer.
//! Surfaces that agree on material, lightmap and fog merge into a single
//! draw, ordered by leaf so a merged run stays roughly local in space.
//! Groups that end up with no triangles are dropped silently.

use log::debug;

use crate::material::{MaterialId, MaterialRegistry};
use crate::world::{NodeKind, World, WorldVertex};

/// Per-surface placement inside the shared buffers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VboRange {
    pub first_vert: usize,
    pub num_verts: usize,
    pub first_index: usize,
    pub num_indexes: usize,
}

/// One merged draw.
#[derive(Clone, Debug)]
pub struct MergedSurface {
    pub material: MaterialId,
    pub lightmap_num: i32,
    pub fog_index: i32,
    pub first_index: usize,
    pub num_indexes: usize,
    pub num_verts: usize,
}

/// 16-bit indexes when the vertex pool allows it.
#[derive(Clone, Debug)]
pub enum IndexBuffer {
    U16(Vec<u16>),
    U32(Vec<u32>),
}

impl IndexBuffer {
    pub fn len(&self) -> usize {
        match self {
            IndexBuffer::U16(v) => v.len(),
            IndexBuffer::U32(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Clone, Debug, Default)]
pub struct WorldVbo {
    pub vertexes: Vec<WorldVertex>,
    pub indexes: Option<IndexBuffer>,
    pub merged: Vec<MergedSurface>,
    /// Placement per world surface index; `None` for unmerged surfaces.
    pub ranges: Vec<Option<VboRange>>,
}

// =============================================================
//  Collection
// =============================================================

#[derive(Clone, Copy)]
struct SortRecord {
    surface: usize,
    material: MaterialId,
    lightmap_num: i32,
    fog_index: i32,
    leaf: usize,
    slot: usize,
}

/// Walk all leafs and claim each mergeable surface once, in leaf order.
fn collect_leaf_surfaces(world: &mut World, materials: &MaterialRegistry) -> Vec<SortRecord> {
    let mut records = Vec::new();
    let stamp = 1u32;
    for surface in world.surfaces.iter_mut() {
        surface.view_count = 0;
    }

    for (leaf, node) in world.nodes.iter().enumerate() {
        let NodeKind::Leaf {
            first_mark_surface,
            num_mark_surfaces,
            ..
        } = node.kind
        else {
            continue;
        };
        for slot in 0..num_mark_surfaces {
            let index = world.mark_surfaces[first_mark_surface + slot];
            let surface = &mut world.surfaces[index];
            if surface.view_count == stamp {
                continue;
            }
            surface.view_count = stamp;

            let material = materials.get(surface.material);
            if material.is_sky || material.is_portal {
                continue;
            }
            if surface.data.geometry().is_none() {
                continue;
            }
            records.push(SortRecord {
                surface: index,
                material: surface.material,
                lightmap_num: surface.lightmap_num,
                fog_index: surface.fog_index,
                leaf,
                slot,
            });
        }
    }

    records.sort_by_key(|r| (r.material, r.lightmap_num, r.fog_index, r.leaf, r.slot));
    records
}

// =============================================================
//  Merge
// =============================================================

fn merge_records(records: &[SortRecord], world: &World) -> WorldVbo {
    let mut vbo = WorldVbo {
        ranges: vec![None; world.surfaces.len()],
        ..WorldVbo::default()
    };
    let mut indexes: Vec<u32> = Vec::new();

    let mut run = 0;
    while run < records.len() {
        let head = records[run];
        let mut end = run + 1;
        while end < records.len() {
            let r = records[end];
            if r.material != head.material
                || r.lightmap_num != head.lightmap_num
                || r.fog_index != head.fog_index
            {
                break;
            }
            end += 1;
        }

        let first_index = indexes.len();
        let mut num_verts = 0;
        for record in &records[run..end] {
            let Some((verts, surf_indexes)) = world.surfaces[record.surface].data.geometry()
            else {
                continue;
            };
            let base = vbo.vertexes.len() as u32;
            vbo.ranges[record.surface] = Some(VboRange {
                first_vert: vbo.vertexes.len(),
                num_verts: verts.len(),
                first_index: indexes.len(),
                num_indexes: surf_indexes.len(),
            });
            vbo.vertexes.extend_from_slice(verts);
            indexes.extend(surf_indexes.iter().map(|i| i + base));
            num_verts += verts.len();
        }

        let num_indexes = indexes.len() - first_index;
        if num_indexes > 0 {
            vbo.merged.push(MergedSurface {
                material: head.material,
                lightmap_num: head.lightmap_num,
                fog_index: head.fog_index,
                first_index,
                num_indexes,
                num_verts,
            });
        }
        run = end;
    }

    vbo.indexes = if vbo.vertexes.len() <= u16::MAX as usize {
        Some(IndexBuffer::U16(
            indexes.iter().map(|&i| i as u16).collect(),
        ))
    } else {
        Some(IndexBuffer::U32(indexes))
    };
    vbo
}

/// Build the shared world buffers and merged draw list.
pub fn build_world_vbo(world: &mut World, materials: &MaterialRegistry) {
    let records = collect_leaf_surfaces(world, materials);
    let vbo = merge_records(&records, world);
    debug!(
        "...world VBO: {} vertexes, {} indexes, {} merged draws",
        vbo.vertexes.len(),
        vbo.indexes.as_ref().map_or(0, |i| i.len()),
        vbo.merged.len()
    );
    world.vbo = vbo;
}
