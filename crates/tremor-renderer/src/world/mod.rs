//! World model: BSP tree arena, surfaces, fogs, light grid, lights.
//!
//! Nodes and leafs live in one flat arena indexed by [`NodeId`]; children
//! and parents are indices, never pointers. Surface payloads are tagged
//! variants of [`SurfaceData`], so a surface's kind is always explicit.

pub mod curve;
pub mod entity;
pub mod interaction;
pub mod light;
pub mod lightgrid;
pub mod load;
pub mod stitch;
pub mod surface;
pub mod vbo;

use bytemuck::{Pod, Zeroable};

use tremor_common::math::{Bounds, Plane, Vec2, Vec3};

use crate::material::MaterialId;

pub use light::{LightKind, LightSpec, RefLight};
pub use load::load_world;

// =============================================================
//  Vertices and triangles
// =============================================================

/// One world vertex, already in the interleaved VBO layout.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct WorldVertex {
    pub xyz: Vec3,
    pub normal: Vec3,
    pub st: Vec2,
    pub lightmap: Vec2,
    pub color: [f32; 4],
}

// =============================================================
//  BSP tree arena
// =============================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct NodeId(pub usize);

#[derive(Clone, Debug)]
pub enum NodeKind {
    Decision {
        plane: usize,
        children: [NodeId; 2],
    },
    Leaf {
        cluster: i32,
        area: i32,
        first_mark_surface: usize,
        num_mark_surfaces: usize,
    },
}

#[derive(Clone, Debug)]
pub struct BspNode {
    /// Filled by a post-construction pass; `None` only at the root.
    pub parent: Option<NodeId>,
    pub mins: Vec3,
    pub maxs: Vec3,
    pub kind: NodeKind,
}

// =============================================================
//  Surfaces
// =============================================================

/// Triangle payload shared by planar faces and triangle soups.
#[derive(Clone, Debug, Default)]
pub struct SurfaceTriangles {
    /// Present for planar faces only.
    pub plane: Option<Plane>,
    pub bounds: Bounds,
    pub verts: Vec<WorldVertex>,
    pub indexes: Vec<u32>,
}

/// A subdivided patch mesh with its LOD bookkeeping.
#[derive(Clone, Debug)]
pub struct SurfaceGrid {
    pub width: usize,
    pub height: usize,
    /// Row-major grid points, `height` rows of `width`.
    pub verts: Vec<WorldVertex>,
    /// Per-column / per-row subdivision error, used by LOD stitching.
    pub width_lod_error: Vec<f32>,
    pub height_lod_error: Vec<f32>,
    pub bounds: Bounds,
    /// LOD group key: grids sharing origin and radius stitch together.
    pub lod_origin: Vec3,
    pub lod_radius: f32,
    pub lod_fixed: bool,
    pub lod_stitched: bool,
    /// Filled after stitching, two triangles per cell.
    pub indexes: Vec<u32>,
}

#[derive(Clone, Debug)]
pub struct SurfaceFlare {
    pub origin: Vec3,
    pub normal: Vec3,
    pub color: Vec3,
}

#[derive(Clone, Debug)]
pub enum SurfaceData {
    Face(SurfaceTriangles),
    Grid(SurfaceGrid),
    Triangles(SurfaceTriangles),
    Flare(SurfaceFlare),
    /// Parsed but not rendered (unsupported or empty payload).
    Skip,
}

impl SurfaceData {
    /// Renderable triangle geometry, if this variant carries any.
    pub fn geometry(&self) -> Option<(&[WorldVertex], &[u32])> {
        match self {
            SurfaceData::Face(t) | SurfaceData::Triangles(t) => Some((&t.verts, &t.indexes)),
            SurfaceData::Grid(g) => Some((&g.verts, &g.indexes)),
            _ => None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct BspSurface {
    pub material: MaterialId,
    /// Index into `World::fogs`, -1 for none.
    pub fog_index: i32,
    pub lightmap_num: i32,
    pub data: SurfaceData,
    /// Stamp of the last light that visited this surface during
    /// interaction precompute; avoids double-adding shared marksurfaces.
    pub light_count: u32,
    /// Stamp of the last world-VBO build that claimed this surface.
    pub view_count: u32,
}

impl BspSurface {
    pub fn bounds(&self) -> Option<Bounds> {
        match &self.data {
            SurfaceData::Face(t) | SurfaceData::Triangles(t) => Some(t.bounds),
            SurfaceData::Grid(g) => Some(g.bounds),
            _ => None,
        }
    }
}

// =============================================================
//  Fogs, submodels, visibility
// =============================================================

#[derive(Clone, Debug)]
pub struct Fog {
    pub material: MaterialId,
    /// -1 for global fog.
    pub original_brush_number: i32,
    pub bounds: Bounds,
    pub color: [f32; 4],
    pub depth_for_opaque: f32,
    pub tc_scale: f32,
    pub has_surface: bool,
    /// Plane equation of the visible side, [normal | dist].
    pub surface: [f32; 4],
}

#[derive(Clone, Debug)]
pub struct SubModel {
    pub bounds: Bounds,
    pub radius: f32,
    pub first_surface: usize,
    pub num_surfaces: usize,
}

#[derive(Clone, Debug, Default)]
pub struct Visibility {
    pub num_clusters: usize,
    pub cluster_bytes: usize,
    pub data: Vec<u8>,
}

impl Visibility {
    pub fn cluster_visible(&self, from: i32, to: i32) -> bool {
        if from < 0 || to < 0 {
            return false;
        }
        let (from, to) = (from as usize, to as usize);
        if self.data.is_empty() || from >= self.num_clusters || to >= self.num_clusters {
            // no vis data: everything sees everything
            return true;
        }
        let byte = self.data[from * self.cluster_bytes + (to >> 3)];
        byte & (1 << (to & 7)) != 0
    }
}

// =============================================================
//  World
// =============================================================

/// Settings the host passes into a world load.
#[derive(Clone, Copy, Debug)]
pub struct WorldSettings {
    pub light_scale: f32,
    pub precomputed_lighting: bool,
    pub shadows: bool,
    /// Debug aid: load every surface with the default material.
    pub single_shader: bool,
    pub map_overbright_bits: u32,
}

impl Default for WorldSettings {
    fn default() -> WorldSettings {
        WorldSettings {
            light_scale: 1.0,
            precomputed_lighting: true,
            shadows: true,
            single_shader: false,
            map_overbright_bits: 2,
        }
    }
}

/// Worldspawn-entity derived state.
#[derive(Clone, Debug)]
pub struct WorldSpawn {
    pub light_grid_size: Vec3,
    pub ambient_color: Vec3,
    pub deluxe_mapping: bool,
    pub hdr_rgbe: bool,
    pub map_overbright_bits: u32,
}

impl Default for WorldSpawn {
    fn default() -> WorldSpawn {
        WorldSpawn {
            light_grid_size: [64.0, 64.0, 128.0],
            ambient_color: [0.0, 0.0, 0.0],
            deluxe_mapping: false,
            hdr_rgbe: false,
            map_overbright_bits: 2,
        }
    }
}

/// A fully loaded world. Built as a whole by [`load_world`]; the engine
/// context swaps it in only after every pipeline stage succeeded.
#[derive(Debug)]
pub struct World {
    pub name: String,
    pub spawn: WorldSpawn,

    pub planes: Vec<Plane>,
    /// Decision nodes first, then leafs; see [`World::leaf_id`].
    pub nodes: Vec<BspNode>,
    pub num_decision_nodes: usize,
    pub mark_surfaces: Vec<usize>,

    pub surfaces: Vec<BspSurface>,
    pub models: Vec<SubModel>,
    pub fogs: Vec<Fog>,
    pub light_grid: lightgrid::LightGrid,
    pub visibility: Visibility,

    pub lights: Vec<RefLight>,
    pub vbo: vbo::WorldVbo,

    /// Monotonic stamp source for per-light surface visitation.
    pub light_visit_stamp: u32,
    /// Lightmap image paths referenced by this map, in lightmap order.
    pub lightmap_names: Vec<String>,
}

impl World {
    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    /// Arena id of the leaf at `leaf_index` in the leaf lump.
    pub fn leaf_id(&self, leaf_index: usize) -> NodeId {
        NodeId(self.num_decision_nodes + leaf_index)
    }

    /// Map an on-disk child reference to an arena id.
    pub fn child_id(&self, child: i32) -> NodeId {
        if child >= 0 {
            NodeId(child as usize)
        } else {
            self.leaf_id((-child - 1) as usize)
        }
    }

    pub fn node(&self, id: NodeId) -> &BspNode {
        &self.nodes[id.0]
    }

    pub fn world_bounds(&self) -> Bounds {
        // model 0 is the world
        self.models
            .first()
            .map(|m| m.bounds)
            .unwrap_or([[0.0; 3], [0.0; 3]])
    }
}

/// Fill in parent links by walking down from the root. Runs after the node
/// arena is fully built, so no backpatching during construction.
pub fn set_parent_links(nodes: &mut [BspNode], root: NodeId) {
    let mut stack = vec![(root, None::<NodeId>)];
    while let Some((id, parent)) = stack.pop() {
        nodes[id.0].parent = parent;
        if let NodeKind::Decision { children, .. } = nodes[id.0].kind {
            stack.push((children[0], Some(id)));
            stack.push((children[1], Some(id)));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_visibility_fallback_all_visible() {
        let vis = Visibility::default();
        assert!(vis.cluster_visible(0, 5));
        assert!(!vis.cluster_visible(-1, 0));
    }

    #[test]
    fn test_visibility_bit_lookup() {
        // two clusters, one byte per row: 0 sees only itself
        let vis = Visibility {
            num_clusters: 2,
            cluster_bytes: 1,
            data: vec![0b01, 0b11],
        };
        assert!(vis.cluster_visible(0, 0));
        assert!(!vis.cluster_visible(0, 1));
        assert!(vis.cluster_visible(1, 0));
    }

    #[test]
    fn test_set_parent_links() {
        let leaf = |cluster| BspNode {
            parent: None,
            mins: [0.0; 3],
            maxs: [0.0; 3],
            kind: NodeKind::Leaf {
                cluster,
                area: 0,
                first_mark_surface: 0,
                num_mark_surfaces: 0,
            },
        };
        let mut nodes = vec![
            BspNode {
                parent: None,
                mins: [0.0; 3],
                maxs: [0.0; 3],
                kind: NodeKind::Decision {
                    plane: 0,
                    children: [NodeId(1), NodeId(2)],
                },
            },
            leaf(0),
            leaf(1),
        ];
        set_parent_links(&mut nodes, NodeId(0));
        assert_eq!(nodes[0].parent, None);
        assert_eq!(nodes[1].parent, Some(NodeId(0)));
        assert_eq!(nodes[2].parent, Some(NodeId(0)));
    }
}
