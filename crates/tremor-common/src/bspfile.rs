//! On-disk BSP format: lump directory, record structs and safe lump readers.
//!
//! All records are little-endian `#[repr(C)]` structs read with bytemuck, so
//! the source buffer needs no particular alignment. Field byte-swapping goes
//! through the `little_*` helpers and is a no-op on little-endian targets.

use std::error::Error;
use std::fmt;

use bitflags::bitflags;
use bytemuck::{AnyBitPattern, Pod, Zeroable};

// =============================================================
//  Identification
// =============================================================

/// "IBSP" read as a little-endian i32.
pub const BSP_IDENT: i32 =
    (b'P' as i32) << 24 | (b'S' as i32) << 16 | (b'B' as i32) << 8 | b'I' as i32;

pub const BSP_VERSION_Q3: i32 = 46;
pub const BSP_VERSION_ET: i32 = 47;

// =============================================================
//  Lump directory
// =============================================================

pub const LUMP_ENTITIES: usize = 0;
pub const LUMP_SHADERS: usize = 1;
pub const LUMP_PLANES: usize = 2;
pub const LUMP_NODES: usize = 3;
pub const LUMP_LEAFS: usize = 4;
pub const LUMP_LEAFSURFACES: usize = 5;
pub const LUMP_LEAFBRUSHES: usize = 6;
pub const LUMP_MODELS: usize = 7;
pub const LUMP_BRUSHES: usize = 8;
pub const LUMP_BRUSHSIDES: usize = 9;
pub const LUMP_DRAWVERTS: usize = 10;
pub const LUMP_DRAWINDEXES: usize = 11;
pub const LUMP_FOGS: usize = 12;
pub const LUMP_SURFACES: usize = 13;
pub const LUMP_LIGHTMAPS: usize = 14;
pub const LUMP_LIGHTGRID: usize = 15;
pub const LUMP_VISIBILITY: usize = 16;
pub const HEADER_LUMPS: usize = 17;

/// Map surface types stored in `DSurface::surface_type`.
pub const MST_BAD: i32 = 0;
pub const MST_PLANAR: i32 = 1;
pub const MST_PATCH: i32 = 2;
pub const MST_TRIANGLE_SOUP: i32 = 3;
pub const MST_FLARE: i32 = 4;
pub const MST_FOLIAGE: i32 = 5;

pub const LIGHTMAP_SIZE: usize = 128;
pub const MAX_MAP_NAME: usize = 64;

bitflags! {
    /// Surface flags compiled into the shader lump.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct SurfaceFlags: u32 {
        const NO_DAMAGE   = 0x1;
        const SLICK       = 0x2;
        const SKY         = 0x4;
        const LADDER      = 0x8;
        const NO_IMPACT   = 0x10;
        const NO_MARKS    = 0x20;
        const NO_DRAW     = 0x80;
        const NO_LIGHTMAP = 0x400;
        const POINT_LIGHT = 0x800;
        const NO_DLIGHT   = 0x2_0000;
    }
}

bitflags! {
    /// Content flags compiled into the shader lump.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct ContentFlags: u32 {
        const SOLID       = 0x1;
        const LAVA        = 0x8;
        const SLIME       = 0x10;
        const WATER       = 0x20;
        const FOG         = 0x40;
        const TRANSLUCENT = 0x2000_0000;
    }
}

// =============================================================
//  Byte-order helpers
// =============================================================

#[inline]
pub fn little_long(v: i32) -> i32 {
    i32::from_le(v)
}

#[inline]
pub fn little_float(v: f32) -> f32 {
    f32::from_bits(u32::from_le(v.to_bits()))
}

// =============================================================
//  Records
// =============================================================

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct Lump {
    pub fileofs: i32,
    pub filelen: i32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct DHeader {
    pub ident: i32,
    pub version: i32,
    pub lumps: [Lump; HEADER_LUMPS],
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
pub struct DShader {
    pub shader: [u8; MAX_MAP_NAME],
    pub surface_flags: i32,
    pub content_flags: i32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct DPlane {
    pub normal: [f32; 3],
    pub dist: f32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct DNode {
    pub plane_num: i32,
    /// Negative children are -(leaf_index + 1).
    pub children: [i32; 2],
    pub mins: [i32; 3],
    pub maxs: [i32; 3],
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct DLeaf {
    pub cluster: i32,
    pub area: i32,
    pub mins: [i32; 3],
    pub maxs: [i32; 3],
    pub first_leaf_surface: i32,
    pub num_leaf_surfaces: i32,
    pub first_leaf_brush: i32,
    pub num_leaf_brushes: i32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct DModel {
    pub mins: [f32; 3],
    pub maxs: [f32; 3],
    pub first_surface: i32,
    pub num_surfaces: i32,
    pub first_brush: i32,
    pub num_brushes: i32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct DBrush {
    pub first_side: i32,
    pub num_sides: i32,
    pub shader_num: i32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct DBrushSide {
    pub plane_num: i32,
    pub shader_num: i32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct DrawVert {
    pub xyz: [f32; 3],
    pub st: [f32; 2],
    pub lightmap: [f32; 2],
    pub normal: [f32; 3],
    pub color: [u8; 4],
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
pub struct DFog {
    pub shader: [u8; MAX_MAP_NAME],
    /// -1 marks global fog.
    pub brush_num: i32,
    pub visible_side: i32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct DSurface {
    pub shader_num: i32,
    pub fog_num: i32,
    pub surface_type: i32,
    pub first_vert: i32,
    pub num_verts: i32,
    pub first_index: i32,
    pub num_indexes: i32,
    pub lightmap_num: i32,
    pub lightmap_x: i32,
    pub lightmap_y: i32,
    pub lightmap_width: i32,
    pub lightmap_height: i32,
    pub lightmap_origin: [f32; 3],
    pub lightmap_vecs: [[f32; 3]; 3],
    pub patch_width: i32,
    pub patch_height: i32,
}

/// One light-grid sample: ambient RGB, directed RGB, lat/long direction.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct DGridPoint {
    pub ambient: [u8; 3],
    pub directed: [u8; 3],
    pub lat_long: [u8; 2],
}

impl DShader {
    pub fn name(&self) -> &str {
        nul_terminated(&self.shader)
    }

    /// Known surface flags; unknown bits are dropped.
    pub fn flags(&self) -> SurfaceFlags {
        SurfaceFlags::from_bits_truncate(little_long(self.surface_flags) as u32)
    }

    pub fn contents(&self) -> ContentFlags {
        ContentFlags::from_bits_truncate(little_long(self.content_flags) as u32)
    }
}

impl DFog {
    pub fn name(&self) -> &str {
        nul_terminated(&self.shader)
    }
}

/// String slice up to the first NUL; invalid UTF-8 truncates the name.
pub fn nul_terminated(bytes: &[u8]) -> &str {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    std::str::from_utf8(&bytes[..end]).unwrap_or("")
}

// =============================================================
//  Lump readers
// =============================================================

/// A lump whose byte length is not a multiple of its record size.
#[derive(Debug)]
pub struct FunnyLumpSize {
    pub lump_len: usize,
    pub record_size: usize,
}

impl fmt::Display for FunnyLumpSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "funny lump size: {} bytes is not a multiple of {}-byte records",
            self.lump_len, self.record_size
        )
    }
}

impl Error for FunnyLumpSize {}

/// Slice the raw bytes of a lump out of the file image.
pub fn lump_bytes<'a>(base: &'a [u8], lump: &Lump) -> Result<&'a [u8], FunnyLumpSize> {
    let ofs = little_long(lump.fileofs) as usize;
    let len = little_long(lump.filelen) as usize;
    if ofs.checked_add(len).map_or(true, |end| end > base.len()) {
        return Err(FunnyLumpSize {
            lump_len: len,
            record_size: 1,
        });
    }
    Ok(&base[ofs..ofs + len])
}

/// Read a lump as a vector of records, rejecting partial trailing records.
pub fn read_lump<T: AnyBitPattern>(base: &[u8], lump: &Lump) -> Result<Vec<T>, FunnyLumpSize> {
    let bytes = lump_bytes(base, lump)?;
    let size = std::mem::size_of::<T>();
    if bytes.len() % size != 0 {
        return Err(FunnyLumpSize {
            lump_len: bytes.len(),
            record_size: size,
        });
    }
    Ok(bytes
        .chunks_exact(size)
        .map(bytemuck::pod_read_unaligned)
        .collect())
}

/// Read the header, or `None` when the image is too short to hold one.
pub fn read_header(base: &[u8]) -> Option<DHeader> {
    let size = std::mem::size_of::<DHeader>();
    if base.len() < size {
        return None;
    }
    Some(bytemuck::pod_read_unaligned(&base[..size]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ident_is_ibsp() {
        assert_eq!(&BSP_IDENT.to_le_bytes(), b"IBSP");
    }

    #[test]
    fn test_record_sizes() {
        // on-disk sizes fixed by the format
        assert_eq!(std::mem::size_of::<Lump>(), 8);
        assert_eq!(std::mem::size_of::<DHeader>(), 8 + 17 * 8);
        assert_eq!(std::mem::size_of::<DShader>(), 72);
        assert_eq!(std::mem::size_of::<DPlane>(), 16);
        assert_eq!(std::mem::size_of::<DNode>(), 36);
        assert_eq!(std::mem::size_of::<DLeaf>(), 48);
        assert_eq!(std::mem::size_of::<DModel>(), 40);
        assert_eq!(std::mem::size_of::<DrawVert>(), 44);
        assert_eq!(std::mem::size_of::<DFog>(), 72);
        assert_eq!(std::mem::size_of::<DSurface>(), 104);
        assert_eq!(std::mem::size_of::<DGridPoint>(), 8);
    }

    #[test]
    fn test_read_lump_round_trip() {
        let planes = [
            DPlane {
                normal: [1.0, 0.0, 0.0],
                dist: 64.0,
            },
            DPlane {
                normal: [0.0, 0.0, -1.0],
                dist: -8.0,
            },
        ];
        let mut image = vec![0u8; 4]; // unaligned offset on purpose
        image.extend_from_slice(bytemuck::cast_slice(&planes));
        let lump = Lump {
            fileofs: 4,
            filelen: (2 * std::mem::size_of::<DPlane>()) as i32,
        };
        let read: Vec<DPlane> = read_lump(&image, &lump).unwrap();
        assert_eq!(read.len(), 2);
        assert_eq!(read[1].dist, -8.0);
    }

    #[test]
    fn test_read_lump_funny_size() {
        let image = vec![0u8; 100];
        let lump = Lump {
            fileofs: 0,
            filelen: 17,
        };
        assert!(read_lump::<DPlane>(&image, &lump).is_err());
    }

    #[test]
    fn test_lump_out_of_range() {
        let image = vec![0u8; 16];
        let lump = Lump {
            fileofs: 8,
            filelen: 16,
        };
        assert!(lump_bytes(&image, &lump).is_err());
    }

    #[test]
    fn test_shader_flag_decode_drops_unknown_bits() {
        let shader = DShader {
            shader: [0; MAX_MAP_NAME],
            surface_flags: 0x4 | 0x4000_0000,
            content_flags: 0x1 | 0x40,
        };
        assert_eq!(shader.flags(), SurfaceFlags::SKY);
        assert_eq!(shader.contents(), ContentFlags::SOLID | ContentFlags::FOG);
    }

    #[test]
    fn test_nul_terminated_names() {
        let mut name = [0u8; MAX_MAP_NAME];
        name[..12].copy_from_slice(b"textures/sky");
        let shader = DShader {
            shader: name,
            surface_flags: 0,
            content_flags: 0,
        };
        assert_eq!(shader.name(), "textures/sky");
    }
}
