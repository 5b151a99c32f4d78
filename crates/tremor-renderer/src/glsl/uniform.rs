//! Uniform declarations and the update firewall.
//!
//! A shader descriptor carries an ordered list of uniform declarations; the
//! position in that list is the uniform's stable slot index, shared by every
//! permutation. Each built permutation keeps a location table (slot ->
//! driver location, -1 when discarded) and a firewall buffer of the last
//! bytes written per slot, so redundant driver calls are skipped.

use crate::device::{GraphicsDevice, ProgramHandle, UniformValue};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UniformKind {
    Int,
    Float,
    Vec2,
    Vec3,
    Vec4,
    Matrix,
    /// Uniform block; bound by index, never set through the firewall.
    Block,
}

impl UniformKind {
    pub fn byte_size(self) -> usize {
        match self {
            UniformKind::Int | UniformKind::Float => 4,
            UniformKind::Vec2 => 8,
            UniformKind::Vec3 => 12,
            UniformKind::Vec4 => 16,
            UniformKind::Matrix => 64,
            UniformKind::Block => 0,
        }
    }

    pub fn matches(self, value: &UniformValue) -> bool {
        matches!(
            (self, value),
            (UniformKind::Int, UniformValue::Int(_))
                | (UniformKind::Float, UniformValue::Float(_))
                | (UniformKind::Vec2, UniformValue::Vec2(_))
                | (UniformKind::Vec3, UniformValue::Vec3(_))
                | (UniformKind::Vec4, UniformValue::Vec4(_))
                | (UniformKind::Matrix, UniformValue::Matrix(_))
        )
    }
}

#[derive(Clone, Copy, Debug)]
pub struct UniformDecl {
    pub name: &'static str,
    pub kind: UniformKind,
}

impl UniformDecl {
    pub const fn new(name: &'static str, kind: UniformKind) -> UniformDecl {
        UniformDecl { name, kind }
    }
}

/// Last-written bytes per uniform slot. Starts zeroed to match the driver's
/// default uniform values, so a first write of zero is correctly skipped.
pub struct UniformFirewall {
    slots: Vec<Vec<u8>>,
}

impl UniformFirewall {
    pub fn new(decls: &[UniformDecl]) -> UniformFirewall {
        UniformFirewall {
            slots: decls
                .iter()
                .map(|d| vec![0u8; d.kind.byte_size()])
                .collect(),
        }
    }

    /// Record `value` in `slot`; returns false when it matches the last
    /// write and the driver call can be skipped.
    pub fn update(&mut self, slot: usize, value: &UniformValue) -> bool {
        let bytes = value.to_bytes();
        if self.slots[slot] == bytes {
            return false;
        }
        self.slots[slot] = bytes;
        true
    }
}

/// Resolve the location table for one linked permutation.
pub fn resolve_locations(
    device: &dyn GraphicsDevice,
    program: ProgramHandle,
    decls: &[UniformDecl],
) -> Vec<i32> {
    decls
        .iter()
        .map(|d| match d.kind {
            UniformKind::Block => device.uniform_block_index(program, d.name),
            _ => device.uniform_location(program, d.name),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const DECLS: &[UniformDecl] = &[
        UniformDecl::new("u_ColorModulate", UniformKind::Vec4),
        UniformDecl::new("u_AlphaThreshold", UniformKind::Float),
    ];

    #[test]
    fn test_firewall_skips_repeated_values() {
        let mut fw = UniformFirewall::new(DECLS);
        let v = UniformValue::Vec4([1.0, 0.5, 0.0, 1.0]);
        assert!(fw.update(0, &v));
        assert!(!fw.update(0, &v));
        assert!(fw.update(0, &UniformValue::Vec4([0.0, 0.5, 0.0, 1.0])));
    }

    #[test]
    fn test_firewall_starts_zeroed() {
        // the driver initializes uniforms to zero, so a zero write is a no-op
        let mut fw = UniformFirewall::new(DECLS);
        assert!(!fw.update(1, &UniformValue::Float(0.0)));
        assert!(fw.update(1, &UniformValue::Float(0.125)));
    }
}
