//! Vector, plane, bounds, quaternion and matrix math.
//!
//! Vectors are plain `[f32; 3]` arrays operated on by free functions, the
//! way the rest of the engine consumes them. Matrices are column-major
//! `[f32; 16]` like OpenGL expects.

pub type Vec2 = [f32; 2];
pub type Vec3 = [f32; 3];
pub type Vec4 = [f32; 4];
pub type Quat = [f32; 4];
pub type Matrix = [f32; 16];

pub const VEC3_ORIGIN: Vec3 = [0.0, 0.0, 0.0];

// =============================================================
//  Vectors
// =============================================================

#[inline]
pub fn dot_product(a: &Vec3, b: &Vec3) -> f32 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

#[inline]
pub fn vector_subtract(a: &Vec3, b: &Vec3) -> Vec3 {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

#[inline]
pub fn vector_add(a: &Vec3, b: &Vec3) -> Vec3 {
    [a[0] + b[0], a[1] + b[1], a[2] + b[2]]
}

#[inline]
pub fn vector_scale(v: &Vec3, s: f32) -> Vec3 {
    [v[0] * s, v[1] * s, v[2] * s]
}

/// a + s * b
#[inline]
pub fn vector_ma(a: &Vec3, s: f32, b: &Vec3) -> Vec3 {
    [a[0] + s * b[0], a[1] + s * b[1], a[2] + s * b[2]]
}

#[inline]
pub fn vector_length(v: &Vec3) -> f32 {
    dot_product(v, v).sqrt()
}

#[inline]
pub fn distance(a: &Vec3, b: &Vec3) -> f32 {
    vector_length(&vector_subtract(a, b))
}

#[inline]
pub fn cross_product(a: &Vec3, b: &Vec3) -> Vec3 {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

/// Normalize in place, returning the original length.
pub fn vector_normalize(v: &mut Vec3) -> f32 {
    let len = vector_length(v);
    if len > 0.0 {
        let inv = 1.0 / len;
        v[0] *= inv;
        v[1] *= inv;
        v[2] *= inv;
    }
    len
}

// =============================================================
//  Bounds
// =============================================================

/// Axis-aligned bounding box as [mins, maxs].
pub type Bounds = [Vec3; 2];

pub const MIN_WORLD_COORD: f32 = -65536.0;
pub const MAX_WORLD_COORD: f32 = 65536.0;

pub fn clear_bounds() -> Bounds {
    [
        [f32::MAX, f32::MAX, f32::MAX],
        [f32::MIN, f32::MIN, f32::MIN],
    ]
}

pub fn add_point_to_bounds(p: &Vec3, bounds: &mut Bounds) {
    for i in 0..3 {
        if p[i] < bounds[0][i] {
            bounds[0][i] = p[i];
        }
        if p[i] > bounds[1][i] {
            bounds[1][i] = p[i];
        }
    }
}

pub fn bounds_intersect(a: &Bounds, b: &Bounds) -> bool {
    a[0][0] <= b[1][0]
        && a[0][1] <= b[1][1]
        && a[0][2] <= b[1][2]
        && a[1][0] >= b[0][0]
        && a[1][1] >= b[0][1]
        && a[1][2] >= b[0][2]
}

pub fn bounds_union(a: &Bounds, b: &Bounds) -> Bounds {
    [
        [
            a[0][0].min(b[0][0]),
            a[0][1].min(b[0][1]),
            a[0][2].min(b[0][2]),
        ],
        [
            a[1][0].max(b[1][0]),
            a[1][1].max(b[1][1]),
            a[1][2].max(b[1][2]),
        ],
    ]
}

/// Sphere origin and radius enclosing `bounds`.
pub fn sphere_from_bounds(bounds: &Bounds) -> (Vec3, f32) {
    let origin = vector_scale(&vector_add(&bounds[0], &bounds[1]), 0.5);
    let temp = vector_subtract(&bounds[1], &origin);
    (origin, vector_length(&temp))
}

pub fn radius_from_bounds(mins: &Vec3, maxs: &Vec3) -> f32 {
    let mut corner = [0.0f32; 3];
    for i in 0..3 {
        corner[i] = mins[i].abs().max(maxs[i].abs());
    }
    vector_length(&corner)
}

// =============================================================
//  Planes
// =============================================================

pub const PLANE_X: u8 = 0;
pub const PLANE_Y: u8 = 1;
pub const PLANE_Z: u8 = 2;
pub const PLANE_NON_AXIAL: u8 = 3;

pub const SIDE_FRONT: u8 = 1;
pub const SIDE_BACK: u8 = 2;
pub const SIDE_CROSS: u8 = 3;

/// A plane in point-normal form with cached classification data.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Plane {
    pub normal: Vec3,
    pub dist: f32,
    /// Axis-aligned classification, for fast side tests.
    pub plane_type: u8,
    /// Sign pattern of the normal components.
    pub signbits: u8,
}

pub fn plane_type_for_normal(normal: &Vec3) -> u8 {
    if normal[0] == 1.0 {
        PLANE_X
    } else if normal[1] == 1.0 {
        PLANE_Y
    } else if normal[2] == 1.0 {
        PLANE_Z
    } else {
        PLANE_NON_AXIAL
    }
}

impl Plane {
    pub fn new(normal: Vec3, dist: f32) -> Plane {
        let mut p = Plane {
            normal,
            dist,
            plane_type: 0,
            signbits: 0,
        };
        p.finish();
        p
    }

    /// Recompute the cached type and signbits after changing the normal.
    pub fn finish(&mut self) {
        let mut bits = 0u8;
        for j in 0..3 {
            if self.normal[j] < 0.0 {
                bits |= 1 << j;
            }
        }
        self.signbits = bits;
        self.plane_type = plane_type_for_normal(&self.normal);
    }

    /// Plane through three points; `None` when the points are collinear.
    pub fn from_points(a: &Vec3, b: &Vec3, c: &Vec3) -> Option<Plane> {
        let d1 = vector_subtract(b, a);
        let d2 = vector_subtract(c, a);
        // counter-clockwise winding faces the normal
        let mut normal = cross_product(&d1, &d2);
        if vector_normalize(&mut normal) == 0.0 {
            return None;
        }
        let dist = dot_product(a, &normal);
        Some(Plane::new(normal, dist))
    }

    #[inline]
    pub fn distance_to(&self, p: &Vec3) -> f32 {
        dot_product(p, &self.normal) - self.dist
    }
}

/// Classify a box against a plane: SIDE_FRONT, SIDE_BACK or SIDE_CROSS.
pub fn box_on_plane_side(mins: &Vec3, maxs: &Vec3, p: &Plane) -> u8 {
    // fast axial cases
    if p.plane_type < PLANE_NON_AXIAL {
        let t = p.plane_type as usize;
        if p.dist <= mins[t] {
            return SIDE_FRONT;
        }
        if p.dist >= maxs[t] {
            return SIDE_BACK;
        }
        return SIDE_CROSS;
    }

    // general case: pick box corners by signbits
    let mut dist1 = 0.0f32;
    let mut dist2 = 0.0f32;
    for i in 0..3 {
        if p.signbits & (1 << i) != 0 {
            dist1 += p.normal[i] * mins[i];
            dist2 += p.normal[i] * maxs[i];
        } else {
            dist1 += p.normal[i] * maxs[i];
            dist2 += p.normal[i] * mins[i];
        }
    }

    let mut sides = 0u8;
    if dist1 >= p.dist {
        sides = SIDE_FRONT;
    }
    if dist2 < p.dist {
        sides |= SIDE_BACK;
    }
    sides
}

// =============================================================
//  Quaternions
// =============================================================

pub const QUAT_IDENTITY: Quat = [0.0, 0.0, 0.0, 1.0];

pub fn quat_from_matrix(m: &Matrix) -> Quat {
    // column-major: m[col * 4 + row]
    let trace = m[0] + m[5] + m[10];
    if trace > 0.0 {
        let s = (trace + 1.0).sqrt() * 2.0;
        [
            (m[6] - m[9]) / s,
            (m[8] - m[2]) / s,
            (m[1] - m[4]) / s,
            0.25 * s,
        ]
    } else if m[0] > m[5] && m[0] > m[10] {
        let s = (1.0 + m[0] - m[5] - m[10]).sqrt() * 2.0;
        [
            0.25 * s,
            (m[4] + m[1]) / s,
            (m[8] + m[2]) / s,
            (m[6] - m[9]) / s,
        ]
    } else if m[5] > m[10] {
        let s = (1.0 + m[5] - m[0] - m[10]).sqrt() * 2.0;
        [
            (m[4] + m[1]) / s,
            0.25 * s,
            (m[9] + m[6]) / s,
            (m[8] - m[2]) / s,
        ]
    } else {
        let s = (1.0 + m[10] - m[0] - m[5]).sqrt() * 2.0;
        [
            (m[8] + m[2]) / s,
            (m[9] + m[6]) / s,
            0.25 * s,
            (m[1] - m[4]) / s,
        ]
    }
}

pub fn matrix_from_quat(q: &Quat) -> Matrix {
    let [x, y, z, w] = *q;
    let (x2, y2, z2) = (x + x, y + y, z + z);
    let (xx, xy, xz) = (x * x2, x * y2, x * z2);
    let (yy, yz, zz) = (y * y2, y * z2, z * z2);
    let (wx, wy, wz) = (w * x2, w * y2, w * z2);
    let mut m = matrix_identity();
    m[0] = 1.0 - (yy + zz);
    m[1] = xy + wz;
    m[2] = xz - wy;
    m[4] = xy - wz;
    m[5] = 1.0 - (xx + zz);
    m[6] = yz + wx;
    m[8] = xz + wy;
    m[9] = yz - wx;
    m[10] = 1.0 - (xx + yy);
    m
}

/// Rotate a point by a quaternion.
pub fn quat_transform_point(q: &Quat, p: &Vec3) -> Vec3 {
    let m = matrix_from_quat(q);
    matrix_transform_point(&m, p)
}

// =============================================================
//  Matrices (column-major, OpenGL convention)
// =============================================================

pub fn matrix_identity() -> Matrix {
    let mut m = [0.0f32; 16];
    m[0] = 1.0;
    m[5] = 1.0;
    m[10] = 1.0;
    m[15] = 1.0;
    m
}

pub fn matrix_multiply(a: &Matrix, b: &Matrix) -> Matrix {
    let mut out = [0.0f32; 16];
    for col in 0..4 {
        for row in 0..4 {
            let mut sum = 0.0;
            for k in 0..4 {
                sum += a[k * 4 + row] * b[col * 4 + k];
            }
            out[col * 4 + row] = sum;
        }
    }
    out
}

/// Transform a point (w = 1) by an affine matrix.
pub fn matrix_transform_point(m: &Matrix, p: &Vec3) -> Vec3 {
    [
        m[0] * p[0] + m[4] * p[1] + m[8] * p[2] + m[12],
        m[1] * p[0] + m[5] * p[1] + m[9] * p[2] + m[13],
        m[2] * p[0] + m[6] * p[1] + m[10] * p[2] + m[14],
    ]
}

/// Build a rigid transform from a rotation quaternion and an origin.
pub fn matrix_setup_transform_from_quat(q: &Quat, origin: &Vec3) -> Matrix {
    let mut m = matrix_from_quat(q);
    m[12] = origin[0];
    m[13] = origin[1];
    m[14] = origin[2];
    m
}

/// Invert a rigid (rotation + translation) transform.
pub fn matrix_affine_inverse(m: &Matrix) -> Matrix {
    let mut out = matrix_identity();
    // transpose the rotation
    out[0] = m[0];
    out[1] = m[4];
    out[2] = m[8];
    out[4] = m[1];
    out[5] = m[5];
    out[6] = m[9];
    out[8] = m[2];
    out[9] = m[6];
    out[10] = m[10];
    // rotate the negated translation
    let t = [m[12], m[13], m[14]];
    out[12] = -(out[0] * t[0] + out[4] * t[1] + out[8] * t[2]);
    out[13] = -(out[1] * t[0] + out[5] * t[1] + out[9] * t[2]);
    out[14] = -(out[2] * t[0] + out[6] * t[1] + out[10] * t[2]);
    out
}

// =============================================================
//  Tests
// =============================================================

#[cfg(test)]
mod tests {
    use super::*;

    // ---------------------------------------------------------
    //  planes
    // ---------------------------------------------------------

    #[test]
    fn test_plane_signbits_and_type() {
        let p = Plane::new([1.0, 0.0, 0.0], 16.0);
        assert_eq!(p.plane_type, PLANE_X);
        assert_eq!(p.signbits, 0);

        let p = Plane::new([0.0, -1.0, 0.0], 0.0);
        assert_eq!(p.plane_type, PLANE_NON_AXIAL);
        assert_eq!(p.signbits, 0b010);
    }

    #[test]
    fn test_plane_from_points_ccw() {
        let p = Plane::from_points(&[0.0, 0.0, 0.0], &[1.0, 0.0, 0.0], &[0.0, 1.0, 0.0])
            .unwrap();
        assert!((p.normal[2] - 1.0).abs() < 1e-6);
        assert!((p.dist - 0.0).abs() < 1e-6);
    }

    #[test]
    fn test_plane_from_points_degenerate() {
        assert!(Plane::from_points(
            &[0.0, 0.0, 0.0],
            &[1.0, 1.0, 1.0],
            &[2.0, 2.0, 2.0]
        )
        .is_none());
    }

    #[test]
    fn test_box_on_plane_side_axial() {
        let p = Plane::new([1.0, 0.0, 0.0], 0.0);
        assert_eq!(
            box_on_plane_side(&[1.0, -1.0, -1.0], &[2.0, 1.0, 1.0], &p),
            SIDE_FRONT
        );
        assert_eq!(
            box_on_plane_side(&[-2.0, -1.0, -1.0], &[-1.0, 1.0, 1.0], &p),
            SIDE_BACK
        );
        assert_eq!(
            box_on_plane_side(&[-1.0, -1.0, -1.0], &[1.0, 1.0, 1.0], &p),
            SIDE_CROSS
        );
    }

    #[test]
    fn test_box_on_plane_side_diagonal() {
        let mut n = [1.0, 1.0, 0.0];
        vector_normalize(&mut n);
        let p = Plane::new(n, 10.0);
        assert_eq!(
            box_on_plane_side(&[20.0, 20.0, -1.0], &[30.0, 30.0, 1.0], &p),
            SIDE_FRONT
        );
        assert_eq!(
            box_on_plane_side(&[-30.0, -30.0, -1.0], &[-20.0, -20.0, 1.0], &p),
            SIDE_BACK
        );
    }

    // ---------------------------------------------------------
    //  bounds
    // ---------------------------------------------------------

    #[test]
    fn test_bounds_accumulate() {
        let mut b = clear_bounds();
        add_point_to_bounds(&[1.0, 2.0, 3.0], &mut b);
        add_point_to_bounds(&[-1.0, 0.0, 5.0], &mut b);
        assert_eq!(b[0], [-1.0, 0.0, 3.0]);
        assert_eq!(b[1], [1.0, 2.0, 5.0]);
    }

    #[test]
    fn test_bounds_intersect_touching() {
        let a = [[0.0, 0.0, 0.0], [1.0, 1.0, 1.0]];
        let b = [[1.0, 0.0, 0.0], [2.0, 1.0, 1.0]];
        assert!(bounds_intersect(&a, &b));
        let c = [[1.1, 0.0, 0.0], [2.0, 1.0, 1.0]];
        assert!(!bounds_intersect(&a, &c));
    }

    #[test]
    fn test_sphere_from_bounds() {
        let (origin, radius) = sphere_from_bounds(&[[-1.0, -1.0, -1.0], [1.0, 1.0, 1.0]]);
        assert_eq!(origin, [0.0, 0.0, 0.0]);
        assert!((radius - 3.0f32.sqrt()).abs() < 1e-5);
    }

    // ---------------------------------------------------------
    //  matrices / quaternions
    // ---------------------------------------------------------

    #[test]
    fn test_matrix_transform_identity() {
        let m = matrix_identity();
        assert_eq!(matrix_transform_point(&m, &[1.0, 2.0, 3.0]), [1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_affine_inverse_round_trip() {
        let q = quat_from_matrix(&matrix_from_quat(&[0.0, 0.0, 0.38268343, 0.92387953]));
        let m = matrix_setup_transform_from_quat(&q, &[10.0, -4.0, 2.0]);
        let inv = matrix_affine_inverse(&m);
        let p = [3.0, 7.0, -1.0];
        let back = matrix_transform_point(&inv, &matrix_transform_point(&m, &p));
        for i in 0..3 {
            assert!((back[i] - p[i]).abs() < 1e-4, "{back:?} != {p:?}");
        }
    }

    #[test]
    fn test_quat_identity_rotation() {
        let p = [5.0, 6.0, 7.0];
        let r = quat_transform_point(&QUAT_IDENTITY, &p);
        for i in 0..3 {
            assert!((r[i] - p[i]).abs() < 1e-6);
        }
    }
}
