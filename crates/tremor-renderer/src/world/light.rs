//! Light sources and their derived per-light state.
//!
//! A light entity parses into a [`LightSpec`]; [`setup_light`] derives the
//! transforms, bounds and frustum in a fixed order so every later stage
//! (tree descent, triangle facing, cube-side masks) sees consistent state.

use tremor_common::math::{
    add_point_to_bounds, box_on_plane_side, clear_bounds, dot_product, matrix_affine_inverse,
    matrix_identity, matrix_setup_transform_from_quat, matrix_transform_point,
    quat_transform_point,
    vector_normalize, Bounds, Matrix, Plane, Quat, Vec3, MAX_WORLD_COORD, MIN_WORLD_COORD,
    QUAT_IDENTITY, SIDE_BACK,
};

use crate::world::interaction::{Interaction, LightBatch};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LightKind {
    /// Point light with an ellipsoid radius.
    Omni,
    /// Spot-style light projected at a target.
    Projective,
    /// Sun light, infinitely far away.
    Directional,
}

#[derive(Clone, Debug)]
pub struct LightSpec {
    pub kind: LightKind,
    pub origin: Vec3,
    /// Offset of the hot spot inside the volume.
    pub center: Vec3,
    pub color: Vec3,
    pub radius: Vec3,
    pub rotation: Quat,
    pub scale: f32,
    pub no_shadows: bool,
    pub no_radiosity: bool,
    // projective shape
    pub target: Vec3,
    pub right: Vec3,
    pub up: Vec3,
    pub start: Vec3,
    pub end: Vec3,
}

impl Default for LightSpec {
    fn default() -> LightSpec {
        LightSpec {
            kind: LightKind::Omni,
            origin: [0.0; 3],
            center: [0.0; 3],
            color: [1.0, 1.0, 1.0],
            radius: [300.0, 300.0, 300.0],
            rotation: QUAT_IDENTITY,
            scale: 1.0,
            no_shadows: false,
            no_radiosity: false,
            target: [0.0; 3],
            right: [0.0; 3],
            up: [0.0; 3],
            start: [0.0; 3],
            end: [0.0; 3],
        }
    }
}

/// A light with everything precomputed for interaction gathering.
#[derive(Clone, Debug)]
pub struct RefLight {
    pub spec: LightSpec,
    /// Light space to world space.
    pub transform: Matrix,
    /// World space to light space.
    pub view: Matrix,
    /// Maps light space onto the unit cube, for attenuation texgen.
    pub projection: Matrix,
    pub local_bounds: Bounds,
    pub world_bounds: Bounds,
    /// Planes bounding the lit volume, normals pointing inward.
    pub frustum: [Plane; 6],

    pub interactions: Vec<Interaction>,
    pub batches: Vec<LightBatch>,
    pub shadow_batches: Vec<LightBatch>,
    /// Shadow batches split per cube face, shadowing omni lights only.
    pub cube_shadow_batches: [Vec<LightBatch>; 6],
}

impl RefLight {
    pub fn casts_shadows(&self) -> bool {
        !self.spec.no_shadows
    }

    /// Emission direction; meaningful for directional lights.
    pub fn direction(&self) -> Vec3 {
        quat_transform_point(&self.spec.rotation, &[1.0, 0.0, 0.0])
    }
}

fn local_bounds(spec: &LightSpec) -> Bounds {
    match spec.kind {
        LightKind::Omni => [
            [-spec.radius[0], -spec.radius[1], -spec.radius[2]],
            [spec.radius[0], spec.radius[1], spec.radius[2]],
        ],
        LightKind::Projective => {
            // near point plus the four far corners
            let mut bounds = clear_bounds();
            add_point_to_bounds(&[0.0; 3], &mut bounds);
            for (sr, su) in [(1.0, 1.0), (1.0, -1.0), (-1.0, 1.0), (-1.0, -1.0)] {
                let corner = [
                    spec.target[0] + sr * spec.right[0] + su * spec.up[0],
                    spec.target[1] + sr * spec.right[1] + su * spec.up[1],
                    spec.target[2] + sr * spec.right[2] + su * spec.up[2],
                ];
                add_point_to_bounds(&corner, &mut bounds);
            }
            add_point_to_bounds(&spec.start, &mut bounds);
            add_point_to_bounds(&spec.end, &mut bounds);
            bounds
        }
        LightKind::Directional => [
            [MIN_WORLD_COORD; 3],
            [MAX_WORLD_COORD; 3],
        ],
    }
}

fn world_bounds(transform: &Matrix, local: &Bounds) -> Bounds {
    let mut bounds = clear_bounds();
    for corner in 0..8 {
        let p = [
            local[corner & 1][0],
            local[(corner >> 1) & 1][1],
            local[(corner >> 2) & 1][2],
        ];
        add_point_to_bounds(&matrix_transform_point(transform, &p), &mut bounds);
    }
    bounds
}

/// Scale/translate matrix taking `bounds` onto [0,1] per axis.
fn unit_cube_projection(bounds: &Bounds) -> Matrix {
    let mut m = matrix_identity();
    for axis in 0..3 {
        let extent = (bounds[1][axis] - bounds[0][axis]).max(1.0);
        m[axis * 4 + axis] = 1.0 / extent;
        m[12 + axis] = -bounds[0][axis] / extent;
    }
    m
}

fn bounds_frustum(bounds: &Bounds) -> [Plane; 6] {
    [
        Plane::new([1.0, 0.0, 0.0], bounds[0][0]),
        Plane::new([-1.0, 0.0, 0.0], -bounds[1][0]),
        Plane::new([0.0, 1.0, 0.0], bounds[0][1]),
        Plane::new([0.0, -1.0, 0.0], -bounds[1][1]),
        Plane::new([0.0, 0.0, 1.0], bounds[0][2]),
        Plane::new([0.0, 0.0, -1.0], -bounds[1][2]),
    ]
}

/// Derive all per-light state. The order is load-bearing: the view needs
/// the transform, the projection needs the local bounds, the world bounds
/// need both transform and local bounds, the frustum needs the world
/// bounds.
pub fn setup_light(spec: LightSpec) -> RefLight {
    let transform = matrix_setup_transform_from_quat(&spec.rotation, &spec.origin);
    let view = matrix_affine_inverse(&transform);
    let local_bounds = local_bounds(&spec);
    let projection = unit_cube_projection(&local_bounds);
    let world_bounds = world_bounds(&transform, &local_bounds);
    let frustum = bounds_frustum(&world_bounds);
    RefLight {
        spec,
        transform,
        view,
        projection,
        local_bounds,
        world_bounds,
        frustum,
        interactions: Vec::new(),
        batches: Vec::new(),
        shadow_batches: Vec::new(),
        cube_shadow_batches: Default::default(),
    }
}

// =============================================================
//  Cube side bits
// =============================================================

/// All six shadow cube faces.
pub const CUBESIDE_CLIPALL: u8 = 0x3F;

/// Which cube-map faces of an omni light a box can touch. Each face spans
/// a four-plane pyramid from the light origin; the box clears a face when
/// it is fully behind any pyramid plane. Conservative by construction.
pub fn calc_cube_side_bits(light_origin: &Vec3, bounds: &Bounds) -> u8 {
    let mut bits = 0u8;
    for side in 0..6usize {
        let axis = side >> 1;
        let sign = if side & 1 == 0 { 1.0f32 } else { -1.0 };
        let (b, c) = match axis {
            0 => (1, 2),
            1 => (0, 2),
            _ => (0, 1),
        };

        let mut culled = false;
        for (other, other_sign) in [(b, 1.0f32), (b, -1.0), (c, 1.0), (c, -1.0)] {
            let mut normal = [0.0f32; 3];
            normal[axis] = sign;
            normal[other] = other_sign;
            vector_normalize(&mut normal);
            let plane = Plane::new(normal, dot_product(&normal, light_origin));
            if box_on_plane_side(&bounds[0], &bounds[1], &plane) == SIDE_BACK {
                culled = true;
                break;
            }
        }
        if !culled {
            bits |= 1 << side;
        }
    }
    bits
}

#[cfg(test)]
mod tests {
    use super::*;
    use tremor_common::math::bounds_intersect;

    #[test]
    fn test_omni_world_bounds_follow_origin() {
        let light = setup_light(LightSpec {
            origin: [100.0, 0.0, 0.0],
            radius: [50.0, 50.0, 50.0],
            ..LightSpec::default()
        });
        assert_eq!(light.world_bounds[0], [50.0, -50.0, -50.0]);
        assert_eq!(light.world_bounds[1], [150.0, 50.0, 50.0]);
    }

    #[test]
    fn test_frustum_rejects_outside_box() {
        let light = setup_light(LightSpec {
            radius: [100.0, 100.0, 100.0],
            ..LightSpec::default()
        });
        let far = [[500.0, 0.0, 0.0], [600.0, 10.0, 10.0]];
        assert!(!bounds_intersect(&light.world_bounds, &far));
        let clipped = light
            .frustum
            .iter()
            .any(|p| box_on_plane_side(&far[0], &far[1], p) == SIDE_BACK);
        assert!(clipped);
    }

    #[test]
    fn test_projection_maps_local_bounds_to_unit_cube() {
        let light = setup_light(LightSpec {
            radius: [100.0, 200.0, 50.0],
            ..LightSpec::default()
        });
        let lo = matrix_transform_point(&light.projection, &light.local_bounds[0]);
        let hi = matrix_transform_point(&light.projection, &light.local_bounds[1]);
        for axis in 0..3 {
            assert!(lo[axis].abs() < 1e-6);
            assert!((hi[axis] - 1.0).abs() < 1e-6);
        }
    }

    #[test]
    fn test_directional_bounds_cover_the_world() {
        let light = setup_light(LightSpec {
            kind: LightKind::Directional,
            ..LightSpec::default()
        });
        assert_eq!(light.world_bounds[0], [MIN_WORLD_COORD; 3]);
    }

    // ---------------------------------------------------------
    //  cube side bits
    // ---------------------------------------------------------

    #[test]
    fn test_box_on_one_axis_hits_one_face() {
        let bounds = [[100.0, -10.0, -10.0], [200.0, 10.0, 10.0]];
        let bits = calc_cube_side_bits(&[0.0, 0.0, 0.0], &bounds);
        assert_eq!(bits, 0b000001); // +x only
    }

    #[test]
    fn test_negative_axis_face() {
        let bounds = [[-10.0, -10.0, -200.0], [10.0, 10.0, -100.0]];
        let bits = calc_cube_side_bits(&[0.0, 0.0, 0.0], &bounds);
        assert_eq!(bits, 0b100000); // -z only
    }

    #[test]
    fn test_diagonal_box_hits_two_faces() {
        let bounds = [[50.0, 50.0, -5.0], [150.0, 150.0, 5.0]];
        let bits = calc_cube_side_bits(&[0.0, 0.0, 0.0], &bounds);
        assert_eq!(bits & 0b000001, 0b000001); // +x
        assert_eq!(bits & 0b000100, 0b000100); // +y
        assert_eq!(bits & 0b110000, 0); // no z faces
    }

    #[test]
    fn test_box_around_origin_hits_all_faces() {
        let bounds = [[-10.0, -10.0, -10.0], [10.0, 10.0, 10.0]];
        assert_eq!(calc_cube_side_bits(&[0.0, 0.0, 0.0], &bounds), CUBESIDE_CLIPALL);
    }
}
