//! Static light/surface interaction precomputation.
//!
//! For every world light the BSP tree is descended once, pruning with the
//! light's frustum planes; surfaces in reached leafs that pass material and
//! bounds checks become interactions. The whole computation resets before
//! it runs, so calling it twice yields identical results.

use log::debug;

use tremor_common::math::{bounds_intersect, box_on_plane_side, Plane};

use crate::material::{CullMode, Material, MaterialId, MaterialRegistry, SORT_OPAQUE};
use crate::world::light::{calc_cube_side_bits, LightKind, RefLight, CUBESIDE_CLIPALL};
use crate::world::{NodeKind, World, WorldSettings, WorldVertex};

/// One precached light/surface pair.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Interaction {
    pub surface: usize,
    /// Shadow cube faces this surface can affect; only meaningful for
    /// shadowing omni lights, `CUBESIDE_CLIPALL` otherwise.
    pub cube_side_bits: u8,
    /// How many of the surface's triangles face the light; batches only
    /// draw facing geometry.
    pub num_facing_triangles: usize,
}

/// Interactions of one light merged by material, in interaction order.
#[derive(Clone, Debug)]
pub struct LightBatch {
    pub material: MaterialId,
    pub surfaces: Vec<usize>,
    pub cube_side_bits: u8,
    pub num_triangles: usize,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct InteractionStats {
    pub interactions: usize,
    pub lighting_batches: usize,
    pub shadow_batches: usize,
}

// =============================================================
//  Triangle facing
// =============================================================

/// Whether each triangle faces the light. Degenerate triangles and
/// triangles fully outside the light volume never face.
pub fn facing_triangles(
    light: &RefLight,
    verts: &[WorldVertex],
    indexes: &[u32],
    cull: CullMode,
) -> Vec<bool> {
    let mut facing = Vec::with_capacity(indexes.len() / 3);
    for idx in indexes.chunks_exact(3) {
        let a = &verts[idx[0] as usize].xyz;
        let b = &verts[idx[1] as usize].xyz;
        let c = &verts[idx[2] as usize].xyz;

        let Some(plane) = Plane::from_points(a, b, c) else {
            facing.push(false);
            continue;
        };

        // outside the light volume: cannot contribute light or shadow
        let clipped = light.frustum.iter().any(|fp| {
            fp.distance_to(a) < 0.0 && fp.distance_to(b) < 0.0 && fp.distance_to(c) < 0.0
        });
        if clipped {
            facing.push(false);
            continue;
        }

        let d = match light.spec.kind {
            LightKind::Directional => {
                let dir = light.direction();
                dir[0] * plane.normal[0] + dir[1] * plane.normal[1] + dir[2] * plane.normal[2]
            }
            _ => plane.distance_to(&light.spec.origin),
        };
        facing.push(match cull {
            CullMode::TwoSided => true,
            CullMode::Front => d > 0.0,
            CullMode::Back => d < 0.0,
        });
    }
    facing
}

// =============================================================
//  Gathering
// =============================================================

/// Surfaces in leafs the light volume reaches, each reported once.
fn gather_lit_surfaces(world: &mut World, light: &RefLight, stamp: u32) -> Vec<usize> {
    let mut out = Vec::new();
    let mut stack = vec![world.root()];
    while let Some(id) = stack.pop() {
        let node = &world.nodes[id.0];
        match node.kind {
            NodeKind::Decision { plane, children } => {
                let side = box_on_plane_side(
                    &light.world_bounds[0],
                    &light.world_bounds[1],
                    &world.planes[plane],
                );
                if side & 1 != 0 {
                    stack.push(children[0]);
                }
                if side & 2 != 0 {
                    stack.push(children[1]);
                }
            }
            NodeKind::Leaf {
                first_mark_surface,
                num_mark_surfaces,
                ..
            } => {
                for i in first_mark_surface..first_mark_surface + num_mark_surfaces {
                    let surface = world.mark_surfaces[i];
                    if world.surfaces[surface].light_count == stamp {
                        continue;
                    }
                    world.surfaces[surface].light_count = stamp;
                    out.push(surface);
                }
            }
        }
    }
    out
}

/// Shadow-caster filter: opaque geometry only; translucents and portals
/// never go into the shadow volume.
fn casts_shadow(material: &Material) -> bool {
    !material.no_shadows && !material.is_portal && material.sort <= SORT_OPAQUE
}

fn batch_interactions<F>(
    world: &World,
    interactions: &[Interaction],
    mut include: F,
) -> Vec<LightBatch>
where
    F: FnMut(&Interaction) -> bool,
{
    let mut batches: Vec<LightBatch> = Vec::new();
    for ia in interactions {
        if ia.num_facing_triangles == 0 || !include(ia) {
            continue;
        }
        let surface = &world.surfaces[ia.surface];
        match batches.last_mut() {
            Some(batch) if batch.material == surface.material => {
                batch.surfaces.push(ia.surface);
                batch.cube_side_bits |= ia.cube_side_bits;
                batch.num_triangles += ia.num_facing_triangles;
            }
            _ => batches.push(LightBatch {
                material: surface.material,
                surfaces: vec![ia.surface],
                cube_side_bits: ia.cube_side_bits,
                num_triangles: ia.num_facing_triangles,
            }),
        }
    }
    batches
}

// =============================================================
//  Precompute driver
// =============================================================

/// Build every light's interaction list and batches from scratch.
pub fn precache_interactions(
    world: &mut World,
    materials: &MaterialRegistry,
    settings: &WorldSettings,
) -> InteractionStats {
    // full reset so a rebuild starts from nothing
    world.light_visit_stamp = 0;
    for surface in world.surfaces.iter_mut() {
        surface.light_count = 0;
    }
    let mut lights = std::mem::take(&mut world.lights);
    for light in lights.iter_mut() {
        light.interactions.clear();
        light.batches.clear();
        light.shadow_batches.clear();
        for face in light.cube_shadow_batches.iter_mut() {
            face.clear();
        }
    }

    let mut stats = InteractionStats::default();
    for light in lights.iter_mut() {
        world.light_visit_stamp += 1;
        let stamp = world.light_visit_stamp;

        let candidates = gather_lit_surfaces(world, light, stamp);
        for surface_index in candidates {
            let surface = &world.surfaces[surface_index];
            let material = materials.get(surface.material);

            if material.is_sky {
                continue;
            }
            if !material.interacts_light && material.no_shadows {
                continue;
            }
            let Some(bounds) = surface.bounds() else {
                continue;
            };
            if !bounds_intersect(&bounds, &light.world_bounds) {
                continue;
            }

            let shadowing = settings.shadows && light.casts_shadows() && !material.no_shadows;
            let cube_side_bits = if light.spec.kind == LightKind::Omni && shadowing {
                calc_cube_side_bits(&light.spec.origin, &bounds)
            } else {
                CUBESIDE_CLIPALL
            };

            let num_facing_triangles = match surface.data.geometry() {
                Some((verts, indexes)) => facing_triangles(light, verts, indexes, material.cull)
                    .into_iter()
                    .filter(|&f| f)
                    .count(),
                None => 0,
            };

            light.interactions.push(Interaction {
                surface: surface_index,
                cube_side_bits,
                num_facing_triangles,
            });
        }

        light.batches = batch_interactions(world, &light.interactions, |ia| {
            materials.get(world.surfaces[ia.surface].material).interacts_light
        });
        let shadowing = settings.shadows && light.casts_shadows();
        light.shadow_batches = if shadowing {
            batch_interactions(world, &light.interactions, |ia| {
                casts_shadow(materials.get(world.surfaces[ia.surface].material))
            })
        } else {
            Vec::new()
        };
        // one batch list per cube face, keyed off the per-interaction mask
        if shadowing && light.spec.kind == LightKind::Omni {
            for face in 0..6 {
                light.cube_shadow_batches[face] =
                    batch_interactions(world, &light.interactions, |ia| {
                        ia.cube_side_bits & (1 << face) != 0
                            && casts_shadow(materials.get(world.surfaces[ia.surface].material))
                    });
            }
        }

        stats.interactions += light.interactions.len();
        stats.lighting_batches += light.batches.len();
        stats.shadow_batches += light.shadow_batches.len();
    }
    world.lights = lights;

    debug!(
        "...{} interactions, {} light batches, {} shadow batches",
        stats.interactions, stats.lighting_batches, stats.shadow_batches
    );
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::material::DEFAULT_MATERIAL;
    use crate::world::light::{setup_light, LightSpec};
    use crate::world::vbo::WorldVbo;
    use crate::world::{
        BspNode, BspSurface, SurfaceData, SurfaceTriangles, Visibility, WorldSpawn,
    };
    use tremor_common::math::clear_bounds;

    fn floor_quad() -> SurfaceTriangles {
        let mut tri = SurfaceTriangles::default();
        tri.bounds = clear_bounds();
        for (x, y) in [(0.0, 0.0), (64.0, 0.0), (64.0, 64.0), (0.0, 64.0)] {
            let v = WorldVertex {
                xyz: [x, y, 0.0],
                normal: [0.0, 0.0, 1.0],
                ..WorldVertex::default()
            };
            tremor_common::math::add_point_to_bounds(&v.xyz, &mut tri.bounds);
            tri.verts.push(v);
        }
        // counter-clockwise seen from +z
        tri.indexes = vec![0, 1, 2, 0, 2, 3];
        tri
    }

    fn floor_surface() -> BspSurface {
        BspSurface {
            material: DEFAULT_MATERIAL,
            fog_index: -1,
            lightmap_num: 0,
            data: SurfaceData::Face(floor_quad()),
            light_count: 0,
            view_count: 0,
        }
    }

    fn one_leaf_world(surfaces: Vec<BspSurface>) -> World {
        let num = surfaces.len();
        World {
            name: String::new(),
            spawn: WorldSpawn::default(),
            planes: Vec::new(),
            nodes: vec![BspNode {
                parent: None,
                mins: [-4096.0; 3],
                maxs: [4096.0; 3],
                kind: NodeKind::Leaf {
                    cluster: 0,
                    area: 0,
                    first_mark_surface: 0,
                    num_mark_surfaces: num,
                },
            }],
            num_decision_nodes: 0,
            mark_surfaces: (0..num).collect(),
            surfaces,
            models: Vec::new(),
            fogs: Vec::new(),
            light_grid: crate::world::lightgrid::default_light_grid(),
            visibility: Visibility::default(),
            lights: Vec::new(),
            vbo: WorldVbo::default(),
            light_visit_stamp: 0,
            lightmap_names: Vec::new(),
        }
    }

    #[test]
    fn test_light_above_faces_floor() {
        let light = setup_light(LightSpec {
            origin: [32.0, 32.0, 100.0],
            radius: [200.0, 200.0, 200.0],
            ..LightSpec::default()
        });
        let tri = floor_quad();
        let facing = facing_triangles(&light, &tri.verts, &tri.indexes, CullMode::Front);
        assert_eq!(facing, vec![true, true]);
    }

    #[test]
    fn test_light_below_sees_back_side() {
        let light = setup_light(LightSpec {
            origin: [32.0, 32.0, -100.0],
            radius: [200.0, 200.0, 200.0],
            ..LightSpec::default()
        });
        let tri = floor_quad();
        assert_eq!(
            facing_triangles(&light, &tri.verts, &tri.indexes, CullMode::Front),
            vec![false, false]
        );
        assert_eq!(
            facing_triangles(&light, &tri.verts, &tri.indexes, CullMode::Back),
            vec![true, true]
        );
        assert_eq!(
            facing_triangles(&light, &tri.verts, &tri.indexes, CullMode::TwoSided),
            vec![true, true]
        );
    }

    #[test]
    fn test_triangles_outside_volume_never_face() {
        let light = setup_light(LightSpec {
            origin: [1000.0, 1000.0, 50.0],
            radius: [10.0, 10.0, 10.0],
            ..LightSpec::default()
        });
        let tri = floor_quad();
        assert_eq!(
            facing_triangles(&light, &tri.verts, &tri.indexes, CullMode::TwoSided),
            vec![false, false]
        );
    }

    #[test]
    fn test_degenerate_triangle_never_faces() {
        let mut tri = floor_quad();
        tri.indexes = vec![0, 0, 1];
        let light = setup_light(LightSpec {
            origin: [32.0, 32.0, 100.0],
            ..LightSpec::default()
        });
        assert_eq!(
            facing_triangles(&light, &tri.verts, &tri.indexes, CullMode::TwoSided),
            vec![false]
        );
    }

    // ---------------------------------------------------------
    //  precache
    // ---------------------------------------------------------

    #[test]
    fn test_back_facing_geometry_builds_no_batches() {
        // front-culled floor lit from below: it interacts, but no
        // triangle faces, so no batch may draw it
        let mut world = one_leaf_world(vec![floor_surface()]);
        world.lights.push(setup_light(LightSpec {
            origin: [32.0, 32.0, -64.0],
            radius: [100.0, 100.0, 100.0],
            ..LightSpec::default()
        }));
        let materials = MaterialRegistry::new();
        let stats = precache_interactions(&mut world, &materials, &WorldSettings::default());

        assert_eq!(stats.interactions, 1);
        let light = &world.lights[0];
        assert_eq!(light.interactions[0].num_facing_triangles, 0);
        assert!(light.batches.is_empty());
        assert!(light.shadow_batches.is_empty());
    }

    #[test]
    fn test_facing_triangles_bound_the_batch_counts() {
        let mut world = one_leaf_world(vec![floor_surface()]);
        world.lights.push(setup_light(LightSpec {
            origin: [32.0, 32.0, 64.0],
            radius: [200.0, 200.0, 200.0],
            ..LightSpec::default()
        }));
        let materials = MaterialRegistry::new();
        precache_interactions(&mut world, &materials, &WorldSettings::default());

        let light = &world.lights[0];
        assert_eq!(light.interactions[0].num_facing_triangles, 2);
        assert_eq!(light.batches.len(), 1);
        assert_eq!(light.batches[0].num_triangles, 2);
    }

    #[test]
    fn test_omni_shadow_batches_split_per_cube_face() {
        let mut world = one_leaf_world(vec![floor_surface()]);
        world.lights.push(setup_light(LightSpec {
            origin: [32.0, 32.0, 64.0],
            radius: [200.0, 200.0, 200.0],
            ..LightSpec::default()
        }));
        let materials = MaterialRegistry::new();
        precache_interactions(&mut world, &materials, &WorldSettings::default());

        let light = &world.lights[0];
        let bits = light.interactions[0].cube_side_bits;
        assert_ne!(bits & 0b100000, 0); // the -z face sees the floor below
        assert_eq!(bits & 0b010000, 0); // the +z face cannot
        assert!(!light.cube_shadow_batches[5].is_empty());
        assert!(light.cube_shadow_batches[4].is_empty());
    }
}
