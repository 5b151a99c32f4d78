//! World loading: the whole BSP pipeline, from raw file image to a ready
//! [`World`].
//!
//! The load is all-or-nothing. Every stage validates its input and returns
//! a [`LoadError`] on anything fatal; the caller only sees a `World` after
//! surfaces, stitching, the light grid, lights, the merged VBO and the
//! interaction caches have all been built. Recoverable oddities (mismatched
//! light grid, empty vis data) degrade with a warning instead.

use log::{debug, info, warn};

use bytemuck::AnyBitPattern;

use tremor_common::bspfile::{
    self, DBrush, DBrushSide, DFog, DGridPoint, DHeader, DLeaf, DModel, DNode, DPlane, DShader,
    DSurface, DrawVert, SurfaceFlags, BSP_IDENT, BSP_VERSION_ET, BSP_VERSION_Q3, LIGHTMAP_SIZE,
    LUMP_BRUSHES,
    LUMP_BRUSHSIDES, LUMP_DRAWINDEXES, LUMP_DRAWVERTS, LUMP_ENTITIES, LUMP_FOGS, LUMP_LEAFS,
    LUMP_LEAFSURFACES, LUMP_LIGHTGRID, LUMP_LIGHTMAPS, LUMP_MODELS, LUMP_NODES, LUMP_PLANES,
    LUMP_SHADERS, LUMP_SURFACES, LUMP_VISIBILITY, MST_BAD, MST_FLARE, MST_FOLIAGE, MST_PATCH,
    MST_PLANAR, MST_TRIANGLE_SOUP,
};
use tremor_common::math::{radius_from_bounds, Bounds, Plane};

use crate::error::{FsError, LoadError};
use crate::fs::FileSystem;
use crate::material::{Material, MaterialId, MaterialRegistry, DEFAULT_MATERIAL};
use crate::world::curve::{build_grid_indexes, subdivide_patch_to_grid, MAX_GRID_SIZE};
use crate::world::entity::parse_entities;
use crate::world::interaction::precache_interactions;
use crate::world::light::setup_light;
use crate::world::lightgrid::{fill_unset_points, load_light_grid};
use crate::world::stitch::{fix_shared_vertex_lod_errors, stitch_all_patches};
use crate::world::surface::{parse_face, parse_flare, parse_triangle_soup};
use crate::world::vbo::{build_world_vbo, WorldVbo};
use crate::world::{
    set_parent_links, BspNode, BspSurface, Fog, NodeId, NodeKind, SubModel, SurfaceData,
    Visibility, World, WorldSettings, WorldSpawn,
};

/// Maximum span deviation, in world units, left in a subdivided patch.
const PATCH_SUBDIVISIONS: f32 = 4.0;

// =============================================================
//  Header and lump access
// =============================================================

fn read_lump<T: AnyBitPattern>(
    image: &[u8],
    header: &DHeader,
    lump: usize,
    name: &str,
) -> Result<Vec<T>, LoadError> {
    bspfile::read_lump(image, &header.lumps[lump]).map_err(|_| LoadError::FunnyLumpSize {
        name: name.to_owned(),
        lump,
    })
}

fn lump_bytes<'a>(
    image: &'a [u8],
    header: &DHeader,
    lump: usize,
    name: &str,
) -> Result<&'a [u8], LoadError> {
    bspfile::lump_bytes(image, &header.lumps[lump]).map_err(|_| LoadError::FunnyLumpSize {
        name: name.to_owned(),
        lump,
    })
}

fn validate_header(name: &str, image: &[u8]) -> Result<DHeader, LoadError> {
    let Some(header) = bspfile::read_header(image) else {
        return Err(LoadError::TruncatedHeader(name.to_owned()));
    };
    let ident = bspfile::little_long(header.ident);
    if ident != BSP_IDENT {
        return Err(LoadError::WrongIdent {
            name: name.to_owned(),
            ident,
        });
    }
    let version = bspfile::little_long(header.version);
    if version != BSP_VERSION_Q3 && version != BSP_VERSION_ET {
        return Err(LoadError::WrongVersion {
            name: name.to_owned(),
            version,
        });
    }
    Ok(header)
}

// =============================================================
//  Lump loaders
// =============================================================

/// Names without a registered material get one synthesized from the lump's
/// surface flags, so skies and dlight opt-outs behave without a script.
fn load_shaders(shaders: &[DShader], materials: &mut MaterialRegistry) -> Vec<MaterialId> {
    shaders
        .iter()
        .map(|s| {
            if let Some(id) = materials.find(s.name()) {
                return id;
            }
            let flags = s.flags();
            if flags.contains(SurfaceFlags::SKY) {
                materials.register(Material::sky(s.name()))
            } else if flags.contains(SurfaceFlags::NO_DLIGHT) {
                materials.register(Material {
                    interacts_light: false,
                    ..Material::lit(s.name())
                })
            } else {
                materials.find_or_default(s.name())
            }
        })
        .collect()
}

fn load_planes(dplanes: &[DPlane]) -> Vec<Plane> {
    dplanes
        .iter()
        .map(|p| Plane::new(p.normal, p.dist))
        .collect()
}

fn load_surface(
    index: usize,
    ds: &DSurface,
    shader_map: &[MaterialId],
    num_fogs: usize,
    drawverts: &[DrawVert],
    drawindexes: &[i32],
    color_shift: u32,
) -> Result<BspSurface, LoadError> {
    if ds.shader_num < 0 || ds.shader_num as usize >= shader_map.len() {
        return Err(LoadError::BadIndex {
            what: "surface shader",
            index: ds.shader_num,
            max: shader_map.len(),
        });
    }
    let fog_index = if ds.fog_num >= 0 && (ds.fog_num as usize) < num_fogs {
        ds.fog_num
    } else {
        -1
    };

    let data = match ds.surface_type {
        MST_PLANAR => SurfaceData::Face(parse_face(ds, drawverts, drawindexes, color_shift)?),
        MST_TRIANGLE_SOUP | MST_FOLIAGE => {
            SurfaceData::Triangles(parse_triangle_soup(ds, drawverts, drawindexes, color_shift)?)
        }
        MST_PATCH => {
            let (w, h) = (ds.patch_width, ds.patch_height);
            if w < 3
                || h < 3
                || w as usize > MAX_GRID_SIZE
                || h as usize > MAX_GRID_SIZE
                || (w * h) != ds.num_verts
            {
                return Err(LoadError::BadPatchDimensions {
                    surface: index,
                    width: w,
                    height: h,
                });
            }
            let first = ds.first_vert as usize;
            let count = ds.num_verts as usize;
            if first + count > drawverts.len() {
                return Err(LoadError::BadIndex {
                    what: "patch control point",
                    index: ds.first_vert + ds.num_verts,
                    max: drawverts.len(),
                });
            }
            let points: Vec<_> = drawverts[first..first + count]
                .iter()
                .map(|dv| crate::world::surface::convert_vert(dv, color_shift))
                .collect();
            SurfaceData::Grid(subdivide_patch_to_grid(
                w as usize,
                h as usize,
                &points,
                PATCH_SUBDIVISIONS,
            ))
        }
        MST_FLARE => SurfaceData::Flare(parse_flare(ds)),
        MST_BAD => {
            warn!("surface {index} has type MST_BAD, skipping");
            SurfaceData::Skip
        }
        kind => {
            return Err(LoadError::BadSurfaceType {
                surface: index,
                kind,
            })
        }
    };

    Ok(BspSurface {
        material: shader_map[ds.shader_num as usize],
        fog_index,
        lightmap_num: ds.lightmap_num,
        data,
        light_count: 0,
        view_count: 0,
    })
}

fn load_mark_surfaces(raw: &[i32], num_surfaces: usize) -> Result<Vec<usize>, LoadError> {
    raw.iter()
        .map(|&s| {
            if s < 0 || s as usize >= num_surfaces {
                Err(LoadError::BadIndex {
                    what: "leaf surface",
                    index: s,
                    max: num_surfaces,
                })
            } else {
                Ok(s as usize)
            }
        })
        .collect()
}

/// Build the node arena: decision nodes first, leafs appended after.
fn load_nodes_and_leafs(
    dnodes: &[DNode],
    dleafs: &[DLeaf],
    num_planes: usize,
    num_mark_surfaces: usize,
) -> Result<(Vec<BspNode>, usize), LoadError> {
    let num_decision = dnodes.len();
    let mut nodes = Vec::with_capacity(num_decision + dleafs.len());

    for dn in dnodes {
        if dn.plane_num < 0 || dn.plane_num as usize >= num_planes {
            return Err(LoadError::BadIndex {
                what: "node plane",
                index: dn.plane_num,
                max: num_planes,
            });
        }
        let mut children = [NodeId(0); 2];
        for (slot, &child) in dn.children.iter().enumerate() {
            let id = if child >= 0 {
                if child as usize >= num_decision {
                    return Err(LoadError::BadIndex {
                        what: "node child",
                        index: child,
                        max: num_decision,
                    });
                }
                NodeId(child as usize)
            } else {
                let leaf = (-child - 1) as usize;
                if leaf >= dleafs.len() {
                    return Err(LoadError::BadIndex {
                        what: "leaf child",
                        index: child,
                        max: dleafs.len(),
                    });
                }
                NodeId(num_decision + leaf)
            };
            children[slot] = id;
        }
        nodes.push(BspNode {
            parent: None,
            mins: [dn.mins[0] as f32, dn.mins[1] as f32, dn.mins[2] as f32],
            maxs: [dn.maxs[0] as f32, dn.maxs[1] as f32, dn.maxs[2] as f32],
            kind: NodeKind::Decision {
                plane: dn.plane_num as usize,
                children,
            },
        });
    }

    for dl in dleafs {
        let first = dl.first_leaf_surface;
        let count = dl.num_leaf_surfaces;
        if first < 0 || count < 0 || (first + count) as usize > num_mark_surfaces {
            return Err(LoadError::BadIndex {
                what: "leaf mark surface",
                index: first + count,
                max: num_mark_surfaces,
            });
        }
        nodes.push(BspNode {
            parent: None,
            mins: [dl.mins[0] as f32, dl.mins[1] as f32, dl.mins[2] as f32],
            maxs: [dl.maxs[0] as f32, dl.maxs[1] as f32, dl.maxs[2] as f32],
            kind: NodeKind::Leaf {
                cluster: dl.cluster,
                area: dl.area,
                first_mark_surface: first as usize,
                num_mark_surfaces: count as usize,
            },
        });
    }

    Ok((nodes, num_decision))
}

fn load_models(dmodels: &[DModel], num_surfaces: usize) -> Result<Vec<SubModel>, LoadError> {
    dmodels
        .iter()
        .map(|dm| {
            let first = dm.first_surface;
            let count = dm.num_surfaces;
            if first < 0 || count < 0 || (first + count) as usize > num_surfaces {
                return Err(LoadError::BadIndex {
                    what: "model surface",
                    index: first + count,
                    max: num_surfaces,
                });
            }
            Ok(SubModel {
                bounds: [dm.mins, dm.maxs],
                radius: radius_from_bounds(&dm.mins, &dm.maxs),
                first_surface: first as usize,
                num_surfaces: count as usize,
            })
        })
        .collect()
}

/// Fog brushes are axial; the first six sides give the volume bounds in
/// -x +x -y +y -z +z order. Global fog (brush -1) covers the whole world.
fn load_fogs(
    dfogs: &[DFog],
    brushes: &[DBrush],
    sides: &[DBrushSide],
    planes: &[Plane],
    world_bounds: &Bounds,
    materials: &mut MaterialRegistry,
) -> Result<Vec<Fog>, LoadError> {
    let mut fogs = Vec::with_capacity(dfogs.len());
    for df in dfogs {
        let material = materials.find_or_default(df.name());
        let parms = materials.get(material).fog_parms.unwrap_or_else(|| {
            warn!("fog material {} has no fog parms", df.name());
            crate::material::FogParms {
                color: [0.5, 0.5, 0.5],
                depth_for_opaque: 2048.0,
            }
        });

        let mut bounds = *world_bounds;
        let mut has_surface = false;
        let mut surface = [0.0f32; 4];

        if df.brush_num >= 0 {
            let Some(brush) = brushes.get(df.brush_num as usize) else {
                return Err(LoadError::BadIndex {
                    what: "fog brush",
                    index: df.brush_num,
                    max: brushes.len(),
                });
            };
            let first = brush.first_side as usize;
            if brush.num_sides < 6 || first + 6 > sides.len() {
                return Err(LoadError::BadIndex {
                    what: "fog brush side",
                    index: brush.first_side + brush.num_sides,
                    max: sides.len(),
                });
            }
            for axis in 0..3 {
                let lo = side_plane(sides, planes, first + axis * 2)?;
                let hi = side_plane(sides, planes, first + axis * 2 + 1)?;
                bounds[0][axis] = -lo.dist;
                bounds[1][axis] = hi.dist;
            }
            if df.visible_side >= 0 && (df.visible_side as usize) < brush.num_sides as usize {
                let p = side_plane(sides, planes, first + df.visible_side as usize)?;
                has_surface = true;
                surface = [-p.normal[0], -p.normal[1], -p.normal[2], -p.dist];
            }
        }

        let depth = parms.depth_for_opaque.max(1.0);
        fogs.push(Fog {
            material,
            original_brush_number: df.brush_num,
            bounds,
            color: [parms.color[0], parms.color[1], parms.color[2], 1.0],
            depth_for_opaque: depth,
            tc_scale: 1.0 / (depth * 8.0),
            has_surface,
            surface,
        });
    }
    Ok(fogs)
}

fn side_plane<'a>(
    sides: &[DBrushSide],
    planes: &'a [Plane],
    side: usize,
) -> Result<&'a Plane, LoadError> {
    let plane_num = sides[side].plane_num;
    planes
        .get(plane_num.max(0) as usize)
        .filter(|_| plane_num >= 0)
        .ok_or(LoadError::BadIndex {
            what: "brush side plane",
            index: plane_num,
            max: planes.len(),
        })
}

fn load_visibility(bytes: &[u8]) -> Visibility {
    if bytes.len() < 8 {
        if !bytes.is_empty() {
            warn!("visibility lump too short, treating everything as visible");
        }
        return Visibility::default();
    }
    let num_clusters = i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]).max(0) as usize;
    let cluster_bytes = i32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]).max(0) as usize;
    if cluster_bytes < num_clusters.div_ceil(8) {
        warn!("visibility rows too narrow for {num_clusters} clusters, treating everything as visible");
        return Visibility::default();
    }
    let data = &bytes[8..];
    if data.len() < num_clusters * cluster_bytes {
        warn!("visibility data truncated, treating everything as visible");
        return Visibility::default();
    }
    Visibility {
        num_clusters,
        cluster_bytes,
        data: data[..num_clusters * cluster_bytes].to_vec(),
    }
}

/// External lightmap images take priority over the embedded lump. Under
/// deluxe mapping every second image is a direction map, so the external
/// count must come in pairs.
fn resolve_lightmaps(
    fs: &dyn FileSystem,
    map_name: &str,
    spawn: &mut WorldSpawn,
    embedded_bytes: usize,
) -> Vec<String> {
    let stem = map_name
        .rsplit('/')
        .next()
        .unwrap_or(map_name)
        .trim_end_matches(".bsp");

    let mut external = Vec::new();
    loop {
        let path = format!("maps/{stem}/lm_{:04}.tga", external.len());
        if !fs.exists(&path) {
            break;
        }
        external.push(path);
    }
    if !external.is_empty() {
        if spawn.deluxe_mapping && external.len() % 2 != 0 {
            warn!("odd external lightmap count, disabling deluxe mapping");
            spawn.deluxe_mapping = false;
        }
        debug!("...{} external lightmaps", external.len());
        return external;
    }

    if spawn.deluxe_mapping {
        warn!("deluxe mapping needs external lightmaps, disabling");
        spawn.deluxe_mapping = false;
    }
    let count = embedded_bytes / (LIGHTMAP_SIZE * LIGHTMAP_SIZE * 3);
    if count == 0 {
        warn!("{map_name} has no lightmaps, using vertex colors only");
    }
    (0..count)
        .map(|i| format!("maps/{stem}/lm_{i:04}"))
        .collect()
}

// =============================================================
//  Driver
// =============================================================

/// Load a map and precompute everything the renderer needs from it.
pub fn load_world(
    fs: &dyn FileSystem,
    name: &str,
    materials: &mut MaterialRegistry,
    settings: &WorldSettings,
) -> Result<World, LoadError> {
    info!("----- loading {name} -----");
    let image = match fs.read_file(name) {
        Ok(image) => image,
        Err(FsError::NotFound(_)) => return Err(LoadError::FileNotFound(name.to_owned())),
        Err(e) => return Err(e.into()),
    };
    let header = validate_header(name, &image)?;

    // entities come first so the color shift and grid size are known
    let entity_text = String::from_utf8_lossy(
        lump_bytes(&image, &header, LUMP_ENTITIES, name)?,
    )
    .into_owned();
    let entity_text = entity_text.trim_end_matches('\0');
    let (mut spawn, light_specs) = parse_entities(entity_text, settings.light_scale)?;
    let color_shift = spawn.map_overbright_bits;

    let dshaders: Vec<DShader> = read_lump(&image, &header, LUMP_SHADERS, name)?;
    let mut shader_map = load_shaders(&dshaders, materials);
    if settings.single_shader {
        for id in shader_map.iter_mut() {
            *id = DEFAULT_MATERIAL;
        }
    }

    let dplanes: Vec<DPlane> = read_lump(&image, &header, LUMP_PLANES, name)?;
    let planes = load_planes(&dplanes);

    let drawverts: Vec<DrawVert> = read_lump(&image, &header, LUMP_DRAWVERTS, name)?;
    let drawindexes: Vec<i32> = read_lump(&image, &header, LUMP_DRAWINDEXES, name)?;
    let dfogs: Vec<DFog> = read_lump(&image, &header, LUMP_FOGS, name)?;

    let dsurfaces: Vec<DSurface> = read_lump(&image, &header, LUMP_SURFACES, name)?;
    let mut surfaces = Vec::with_capacity(dsurfaces.len());
    for (i, ds) in dsurfaces.iter().enumerate() {
        surfaces.push(load_surface(
            i,
            ds,
            &shader_map,
            dfogs.len(),
            &drawverts,
            &drawindexes,
            color_shift,
        )?);
    }

    let raw_marks: Vec<i32> = read_lump(&image, &header, LUMP_LEAFSURFACES, name)?;
    let mark_surfaces = load_mark_surfaces(&raw_marks, surfaces.len())?;

    let dnodes: Vec<DNode> = read_lump(&image, &header, LUMP_NODES, name)?;
    let dleafs: Vec<DLeaf> = read_lump(&image, &header, LUMP_LEAFS, name)?;
    let (mut nodes, num_decision_nodes) =
        load_nodes_and_leafs(&dnodes, &dleafs, planes.len(), mark_surfaces.len())?;
    if !nodes.is_empty() && num_decision_nodes > 0 {
        set_parent_links(&mut nodes, NodeId(0));
    }

    let dmodels: Vec<DModel> = read_lump(&image, &header, LUMP_MODELS, name)?;
    let models = load_models(&dmodels, surfaces.len())?;
    let world_bounds = models
        .first()
        .map(|m| m.bounds)
        .unwrap_or([[0.0; 3], [0.0; 3]]);

    let brushes: Vec<DBrush> = read_lump(&image, &header, LUMP_BRUSHES, name)?;
    let brush_sides: Vec<DBrushSide> = read_lump(&image, &header, LUMP_BRUSHSIDES, name)?;
    let fogs = load_fogs(&dfogs, &brushes, &brush_sides, &planes, &world_bounds, materials)?;

    let grid_points: Vec<DGridPoint> = read_lump(&image, &header, LUMP_LIGHTGRID, name)?;
    let mut light_grid = load_light_grid(
        &grid_points,
        &world_bounds,
        spawn.light_grid_size,
        color_shift,
    );
    let filled = fill_unset_points(&mut light_grid);
    if filled > 0 {
        debug!("...filled {filled} dark light grid samples");
    }

    let visibility = load_visibility(lump_bytes(&image, &header, LUMP_VISIBILITY, name)?);
    let lightmap_names = resolve_lightmaps(
        fs,
        name,
        &mut spawn,
        header.lumps[LUMP_LIGHTMAPS].filelen.max(0) as usize,
    );

    // patch LOD: unify shared errors, stitch cracks, then triangulate
    fix_shared_vertex_lod_errors(&mut surfaces);
    let stitched = stitch_all_patches(&mut surfaces);
    if stitched > 0 {
        debug!("...stitched {stitched} patch edge points");
    }
    for surface in surfaces.iter_mut() {
        if let SurfaceData::Grid(grid) = &mut surface.data {
            build_grid_indexes(grid);
        }
    }

    let lights = light_specs.into_iter().map(setup_light).collect();

    let mut world = World {
        name: name.to_owned(),
        spawn,
        planes,
        nodes,
        num_decision_nodes,
        mark_surfaces,
        surfaces,
        models,
        fogs,
        light_grid,
        visibility,
        lights,
        vbo: WorldVbo::default(),
        light_visit_stamp: 0,
        lightmap_names,
    };

    build_world_vbo(&mut world, materials);
    if settings.precomputed_lighting {
        let stats = precache_interactions(&mut world, materials, settings);
        info!(
            "...{} lights, {} interactions",
            world.lights.len(),
            stats.interactions
        );
    }

    Ok(world)
}
