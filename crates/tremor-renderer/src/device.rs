//! Graphics device collaborator.
//!
//! The GL driver sits behind [`GraphicsDevice`]; the renderer core never
//! issues a GL call directly. [`HeadlessDevice`] is a complete in-memory
//! implementation used by the test suite: program binaries round-trip as the
//! concatenated source text, so the shader cache path is exercised without a
//! context.

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::error::DeviceError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StageKind {
    Vertex,
    Fragment,
}

impl StageKind {
    pub fn file_suffix(self) -> &'static str {
        match self {
            StageKind::Vertex => "_vp",
            StageKind::Fragment => "_fp",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct StageHandle(pub u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ProgramHandle(pub u32);

/// A value bound to a uniform location. The byte view backs the firewall's
/// compare-and-skip check.
#[derive(Clone, Debug, PartialEq)]
pub enum UniformValue {
    Int(i32),
    Float(f32),
    Vec2([f32; 2]),
    Vec3([f32; 3]),
    Vec4([f32; 4]),
    Matrix([f32; 16]),
}

impl UniformValue {
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            UniformValue::Int(v) => v.to_le_bytes().to_vec(),
            UniformValue::Float(v) => v.to_le_bytes().to_vec(),
            UniformValue::Vec2(v) => bytemuck::cast_slice(v).to_vec(),
            UniformValue::Vec3(v) => bytemuck::cast_slice(v).to_vec(),
            UniformValue::Vec4(v) => bytemuck::cast_slice(v).to_vec(),
            UniformValue::Matrix(v) => bytemuck::cast_slice(v).to_vec(),
        }
    }
}

pub trait GraphicsDevice: Send + Sync {
    fn compile_stage(&self, kind: StageKind, source: &str) -> Result<StageHandle, DeviceError>;
    fn link_program(
        &self,
        name: &str,
        stages: &[StageHandle],
        attributes: &[(u32, &str)],
    ) -> Result<ProgramHandle, DeviceError>;

    /// Retrieve a linked program's driver binary; `Err(BinaryUnsupported)`
    /// when the driver can't provide one.
    fn get_program_binary(
        &self,
        program: ProgramHandle,
    ) -> Result<(u32, Vec<u8>), DeviceError>;

    /// Upload a previously saved binary, skipping compile and link.
    fn upload_program_binary(
        &self,
        name: &str,
        format: u32,
        binary: &[u8],
    ) -> Result<ProgramHandle, DeviceError>;

    /// Location of a named uniform, or -1 when the linker discarded it.
    fn uniform_location(&self, program: ProgramHandle, name: &str) -> i32;
    fn uniform_block_index(&self, program: ProgramHandle, name: &str) -> i32;

    fn bind_program(&self, program: Option<ProgramHandle>);
    fn set_uniform(&self, location: i32, value: &UniformValue);

    /// Stable hash of the driver/GL version strings, part of the cache key.
    fn driver_version_hash(&self) -> u32;
}

// =============================================================
//  Headless implementation
// =============================================================

pub const HEADLESS_BINARY_FORMAT: u32 = 0x4d45;

#[derive(Default)]
struct HeadlessState {
    next_handle: u32,
    stage_sources: HashMap<u32, String>,
    program_sources: HashMap<u32, String>,
    bound: Option<u32>,
    compiles: usize,
    links: usize,
    binary_uploads: usize,
    uniform_sets: usize,
}

#[derive(Default)]
pub struct HeadlessDevice {
    state: Mutex<HeadlessState>,
    /// When set, every compile fails; for degraded-path tests.
    pub fail_compiles: bool,
}

impl HeadlessDevice {
    pub fn new() -> HeadlessDevice {
        HeadlessDevice::default()
    }

    pub fn compile_count(&self) -> usize {
        self.state.lock().compiles
    }

    pub fn link_count(&self) -> usize {
        self.state.lock().links
    }

    pub fn binary_upload_count(&self) -> usize {
        self.state.lock().binary_uploads
    }

    pub fn uniform_set_count(&self) -> usize {
        self.state.lock().uniform_sets
    }
}

impl GraphicsDevice for HeadlessDevice {
    fn compile_stage(&self, kind: StageKind, source: &str) -> Result<StageHandle, DeviceError> {
        if self.fail_compiles {
            return Err(DeviceError::Compile(format!(
                "{kind:?} stage rejected by test device"
            )));
        }
        let mut state = self.state.lock();
        state.compiles += 1;
        state.next_handle += 1;
        let handle = state.next_handle;
        state.stage_sources.insert(handle, source.to_owned());
        Ok(StageHandle(handle))
    }

    fn link_program(
        &self,
        _name: &str,
        stages: &[StageHandle],
        _attributes: &[(u32, &str)],
    ) -> Result<ProgramHandle, DeviceError> {
        let mut state = self.state.lock();
        let mut combined = String::new();
        for stage in stages {
            match state.stage_sources.get(&stage.0) {
                Some(src) => combined.push_str(src),
                None => return Err(DeviceError::Link("unknown stage handle".to_owned())),
            }
        }
        state.links += 1;
        state.next_handle += 1;
        let handle = state.next_handle;
        state.program_sources.insert(handle, combined);
        Ok(ProgramHandle(handle))
    }

    fn get_program_binary(
        &self,
        program: ProgramHandle,
    ) -> Result<(u32, Vec<u8>), DeviceError> {
        let state = self.state.lock();
        let src = state
            .program_sources
            .get(&program.0)
            .ok_or(DeviceError::BinaryUnsupported)?;
        Ok((HEADLESS_BINARY_FORMAT, src.as_bytes().to_vec()))
    }

    fn upload_program_binary(
        &self,
        _name: &str,
        format: u32,
        binary: &[u8],
    ) -> Result<ProgramHandle, DeviceError> {
        if format != HEADLESS_BINARY_FORMAT {
            return Err(DeviceError::BinaryUnsupported);
        }
        let source = String::from_utf8(binary.to_vec())
            .map_err(|_| DeviceError::BinaryUnsupported)?;
        let mut state = self.state.lock();
        state.binary_uploads += 1;
        state.next_handle += 1;
        let handle = state.next_handle;
        state.program_sources.insert(handle, source);
        Ok(ProgramHandle(handle))
    }

    fn uniform_location(&self, program: ProgramHandle, name: &str) -> i32 {
        // the fake linker keeps a uniform iff its name occurs in the source
        let state = self.state.lock();
        match state.program_sources.get(&program.0) {
            Some(src) if src.contains(name) => name.bytes().map(|b| b as i32).sum::<i32>(),
            _ => -1,
        }
    }

    fn uniform_block_index(&self, program: ProgramHandle, name: &str) -> i32 {
        self.uniform_location(program, name)
    }

    fn bind_program(&self, program: Option<ProgramHandle>) {
        self.state.lock().bound = program.map(|p| p.0);
    }

    fn set_uniform(&self, _location: i32, _value: &UniformValue) {
        self.state.lock().uniform_sets += 1;
    }

    fn driver_version_hash(&self) -> u32 {
        0x4845_4144
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binary_round_trip() {
        let device = HeadlessDevice::new();
        let vs = device
            .compile_stage(StageKind::Vertex, "void main() { u_ModelMatrix; }")
            .unwrap();
        let prog = device.link_program("generic", &[vs], &[]).unwrap();
        let (format, binary) = device.get_program_binary(prog).unwrap();
        let restored = device.upload_program_binary("generic", format, &binary).unwrap();
        assert_ne!(device.uniform_location(restored, "u_ModelMatrix"), -1);
        assert_eq!(device.uniform_location(restored, "u_Missing"), -1);
        assert_eq!(device.compile_count(), 1);
        assert_eq!(device.binary_upload_count(), 1);
    }

    #[test]
    fn test_failing_device() {
        let device = HeadlessDevice {
            fail_compiles: true,
            ..HeadlessDevice::default()
        };
        assert!(device.compile_stage(StageKind::Fragment, "x").is_err());
    }
}
