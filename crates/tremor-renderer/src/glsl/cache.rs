//! Program binary cache.
//!
//! Each built permutation may be saved as the driver's program binary with a
//! header identifying exactly what produced it. On load, every header field
//! is validated; any mismatch silently invalidates the entry and the caller
//! falls back to a source build. Writes are best-effort: a failed write is
//! logged and ignored.

use bytemuck::{Pod, Zeroable};
use log::{debug, warn};

use crate::device::{GraphicsDevice, ProgramHandle};
use crate::fs::FileSystem;
use crate::glsl::macros::{MacroSet, MAX_SHADER_MACROS};

/// Bump on any change to the assembled-source layout.
pub const CACHE_VERSION: u32 = 3;

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct BinaryHeader {
    pub version: u32,
    /// CRC-32 of the assembled source text of every stage.
    pub checksum: u32,
    pub driver_version_hash: u32,
    /// Stable ids of the active macros, in bit order.
    pub macros: [u32; MAX_SHADER_MACROS],
    pub num_macros: u32,
    pub binary_format: u32,
    pub binary_length: u32,
}

const HEADER_SIZE: usize = std::mem::size_of::<BinaryHeader>();

fn cache_file_name(shader_name: &str, bits: u32) -> String {
    format!("glslprogs/{shader_name}_{bits}.bin")
}

fn active_macro_ids(macros: &MacroSet, bits: u32) -> ([u32; MAX_SHADER_MACROS], u32) {
    let mut ids = [0u32; MAX_SHADER_MACROS];
    let mut count = 0;
    for (i, &id) in macros.ids().iter().enumerate() {
        if bits & (1 << i) != 0 {
            ids[count] = id.stable_id();
            count += 1;
        }
    }
    (ids, count as u32)
}

/// Try to restore a permutation from the cache. `None` means build from
/// source; the cache never fails a build.
pub fn load_program_binary(
    fs: &dyn FileSystem,
    device: &dyn GraphicsDevice,
    shader_name: &str,
    macros: &MacroSet,
    bits: u32,
    checksum: u32,
) -> Option<ProgramHandle> {
    let file_name = cache_file_name(shader_name, bits);
    let data = fs.read_file(&file_name).ok()?;
    if data.len() < HEADER_SIZE {
        return None;
    }
    let header: BinaryHeader = bytemuck::pod_read_unaligned(&data[..HEADER_SIZE]);

    if header.version != CACHE_VERSION
        || header.checksum != checksum
        || header.driver_version_hash != device.driver_version_hash()
    {
        return None;
    }
    let (ids, count) = active_macro_ids(macros, bits);
    if header.num_macros != count || header.macros != ids {
        return None;
    }
    let binary = &data[HEADER_SIZE..];
    if binary.len() != header.binary_length as usize {
        return None;
    }

    match device.upload_program_binary(shader_name, header.binary_format, binary) {
        Ok(handle) => {
            debug!("...loaded {file_name} from the cache");
            Some(handle)
        }
        // stale driver blob, rebuild from source
        Err(_) => None,
    }
}

/// Save a freshly linked permutation. Failure is logged, never propagated.
pub fn save_program_binary(
    fs: &dyn FileSystem,
    device: &dyn GraphicsDevice,
    shader_name: &str,
    macros: &MacroSet,
    bits: u32,
    checksum: u32,
    program: ProgramHandle,
) {
    let (format, binary) = match device.get_program_binary(program) {
        Ok(pair) => pair,
        Err(_) => return,
    };
    let (ids, count) = active_macro_ids(macros, bits);
    let header = BinaryHeader {
        version: CACHE_VERSION,
        checksum,
        driver_version_hash: device.driver_version_hash(),
        macros: ids,
        num_macros: count,
        binary_format: format,
        binary_length: binary.len() as u32,
    };
    let mut data = Vec::with_capacity(HEADER_SIZE + binary.len());
    data.extend_from_slice(bytemuck::bytes_of(&header));
    data.extend_from_slice(&binary);

    let file_name = cache_file_name(shader_name, bits);
    if let Err(e) = fs.write_file(&file_name, &data) {
        warn!("couldn't write {file_name}: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{HeadlessDevice, StageKind};
    use crate::fs::MemoryFileSystem;
    use crate::glsl::macros::MacroId;

    fn build_and_save(
        fs: &MemoryFileSystem,
        device: &HeadlessDevice,
        macros: &MacroSet,
        bits: u32,
        checksum: u32,
    ) -> ProgramHandle {
        let vs = device
            .compile_stage(StageKind::Vertex, "void main() {}")
            .unwrap();
        let prog = device.link_program("generic", &[vs], &[]).unwrap();
        save_program_binary(fs, device, "generic", macros, bits, checksum, prog);
        prog
    }

    #[test]
    fn test_round_trip_hit() {
        let fs = MemoryFileSystem::new();
        let device = HeadlessDevice::new();
        let macros = MacroSet::new(vec![MacroId::UseAlphaTesting]);
        build_and_save(&fs, &device, &macros, 0b1, 0xdead_beef);
        assert!(
            load_program_binary(&fs, &device, "generic", &macros, 0b1, 0xdead_beef).is_some()
        );
    }

    #[test]
    fn test_checksum_mismatch_invalidates() {
        let fs = MemoryFileSystem::new();
        let device = HeadlessDevice::new();
        let macros = MacroSet::new(vec![MacroId::UseAlphaTesting]);
        build_and_save(&fs, &device, &macros, 0b1, 0xdead_beef);
        assert!(
            load_program_binary(&fs, &device, "generic", &macros, 0b1, 0x1234_5678).is_none()
        );
    }

    #[test]
    fn test_macro_list_mismatch_invalidates() {
        let fs = MemoryFileSystem::new();
        let device = HeadlessDevice::new();
        let saved = MacroSet::new(vec![MacroId::UseAlphaTesting]);
        build_and_save(&fs, &device, &saved, 0b1, 7);
        let loaded = MacroSet::new(vec![MacroId::UseDepthFade]);
        assert!(load_program_binary(&fs, &device, "generic", &loaded, 0b1, 7).is_none());
    }

    #[test]
    fn test_truncated_file_invalidates() {
        let fs = MemoryFileSystem::new();
        let device = HeadlessDevice::new();
        let macros = MacroSet::new(vec![]);
        build_and_save(&fs, &device, &macros, 0, 7);
        let name = cache_file_name("generic", 0);
        let mut data = fs.read_file(&name).unwrap();
        data.pop();
        fs.insert(&name, data);
        assert!(load_program_binary(&fs, &device, "generic", &macros, 0, 7).is_none());
    }

    #[test]
    fn test_missing_file_is_a_miss() {
        let fs = MemoryFileSystem::new();
        let device = HeadlessDevice::new();
        let macros = MacroSet::new(vec![]);
        assert!(load_program_binary(&fs, &device, "generic", &macros, 0, 7).is_none());
    }
}
