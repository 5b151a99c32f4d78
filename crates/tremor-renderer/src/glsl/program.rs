//! One built shader permutation.

use log::warn;

use crate::device::{GraphicsDevice, ProgramHandle, UniformValue};
use crate::glsl::uniform::{resolve_locations, UniformDecl, UniformFirewall, UniformKind};

/// A linked program for one (shader, macro bit-set) pair, with its uniform
/// location table and firewall.
pub struct ShaderProgram {
    pub handle: ProgramHandle,
    pub macro_bits: u32,
    locations: Vec<i32>,
    firewall: UniformFirewall,
}

impl ShaderProgram {
    pub fn new(
        device: &dyn GraphicsDevice,
        handle: ProgramHandle,
        macro_bits: u32,
        decls: &[UniformDecl],
    ) -> ShaderProgram {
        ShaderProgram {
            handle,
            macro_bits,
            locations: resolve_locations(device, handle, decls),
            firewall: UniformFirewall::new(decls),
        }
    }

    pub fn location(&self, slot: usize) -> i32 {
        self.locations[slot]
    }

    /// Set a uniform by slot. Discarded uniforms (location -1) and repeated
    /// values are silently skipped.
    pub fn set_uniform(
        &mut self,
        device: &dyn GraphicsDevice,
        decls: &[UniformDecl],
        slot: usize,
        value: &UniformValue,
    ) {
        let decl = &decls[slot];
        if decl.kind == UniformKind::Block {
            return;
        }
        if !decl.kind.matches(value) {
            warn!("uniform {} set with mismatched value type", decl.name);
            return;
        }
        let location = self.locations[slot];
        if location == -1 {
            return;
        }
        if self.firewall.update(slot, value) {
            device.set_uniform(location, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{HeadlessDevice, StageKind};

    const DECLS: &[UniformDecl] = &[
        UniformDecl::new("u_ModelMatrix", UniformKind::Matrix),
        UniformDecl::new("u_LightRadius", UniformKind::Float),
        UniformDecl::new("u_Unused", UniformKind::Float),
    ];

    fn link(device: &HeadlessDevice) -> ProgramHandle {
        let vs = device
            .compile_stage(
                StageKind::Vertex,
                "uniform mat4 u_ModelMatrix; uniform float u_LightRadius;",
            )
            .unwrap();
        device.link_program("test", &[vs], &[]).unwrap()
    }

    #[test]
    fn test_discarded_uniform_is_noop() {
        let device = HeadlessDevice::new();
        let handle = link(&device);
        let mut prog = ShaderProgram::new(&device, handle, 0, DECLS);
        assert_eq!(prog.location(2), -1);
        prog.set_uniform(&device, DECLS, 2, &UniformValue::Float(5.0));
        assert_eq!(device.uniform_set_count(), 0);
    }

    #[test]
    fn test_firewall_suppresses_repeats() {
        let device = HeadlessDevice::new();
        let handle = link(&device);
        let mut prog = ShaderProgram::new(&device, handle, 0, DECLS);
        prog.set_uniform(&device, DECLS, 1, &UniformValue::Float(300.0));
        prog.set_uniform(&device, DECLS, 1, &UniformValue::Float(300.0));
        prog.set_uniform(&device, DECLS, 1, &UniformValue::Float(301.0));
        assert_eq!(device.uniform_set_count(), 2);
    }
}
