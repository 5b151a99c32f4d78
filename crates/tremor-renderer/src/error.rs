//! Error types, one enum per concern.

use std::error::Error;
use std::fmt;

// =============================================================
//  World loading
// =============================================================

/// Fatal world-load failures. Any of these aborts the load and leaves the
/// previously loaded world untouched.
#[derive(Debug)]
pub enum LoadError {
    FileNotFound(String),
    TruncatedHeader(String),
    WrongIdent { name: String, ident: i32 },
    WrongVersion { name: String, version: i32 },
    FunnyLumpSize { name: String, lump: usize },
    BadIndex { what: &'static str, index: i32, max: usize },
    BadSurfaceType { surface: usize, kind: i32 },
    BadPatchDimensions { surface: usize, width: i32, height: i32 },
    LightCountMismatch { counted: usize, parsed: usize },
    EntityParse(String),
    Fs(FsError),
}

impl fmt::Display for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadError::FileNotFound(name) => write!(f, "{name} not found"),
            LoadError::TruncatedHeader(name) => {
                write!(f, "{name} is too short to hold a header")
            }
            LoadError::WrongIdent { name, ident } => {
                write!(f, "{name} has wrong ident {ident:#x}")
            }
            LoadError::WrongVersion { name, version } => {
                write!(f, "{name} has wrong version number ({version})")
            }
            LoadError::FunnyLumpSize { name, lump } => {
                write!(f, "{name}: funny lump size in lump {lump}")
            }
            LoadError::BadIndex { what, index, max } => {
                write!(f, "{what} index {index} out of range (max {max})")
            }
            LoadError::BadSurfaceType { surface, kind } => {
                write!(f, "surface {surface} has unknown type {kind}")
            }
            LoadError::BadPatchDimensions {
                surface,
                width,
                height,
            } => write!(f, "surface {surface}: bad patch size {width} x {height}"),
            LoadError::LightCountMismatch { counted, parsed } => write!(
                f,
                "light entity count pass found {counted}, parse pass found {parsed}"
            ),
            LoadError::EntityParse(msg) => write!(f, "bad entity data: {msg}"),
            LoadError::Fs(e) => write!(f, "{e}"),
        }
    }
}

impl Error for LoadError {}

impl From<FsError> for LoadError {
    fn from(e: FsError) -> LoadError {
        LoadError::Fs(e)
    }
}

// =============================================================
//  GLSL building
// =============================================================

#[derive(Debug)]
pub enum GlslError {
    TooManyMacros { shader: String, count: usize },
    CompileFailed { shader: String, log: String },
    LinkFailed { shader: String, log: String },
    NoLegalPermutation { shader: String },
    MissingSnippet(String),
    Device(DeviceError),
}

impl fmt::Display for GlslError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GlslError::TooManyMacros { shader, count } => {
                write!(f, "shader {shader} declares {count} macros, over the limit")
            }
            GlslError::CompileFailed { shader, log } => {
                write!(f, "couldn't compile shader {shader}: {log}")
            }
            GlslError::LinkFailed { shader, log } => {
                write!(f, "couldn't link shader {shader}: {log}")
            }
            GlslError::NoLegalPermutation { shader } => {
                write!(f, "no legal macro permutation for shader {shader}")
            }
            GlslError::MissingSnippet(name) => write!(f, "missing GLSL snippet {name}"),
            GlslError::Device(e) => write!(f, "{e}"),
        }
    }
}

impl Error for GlslError {}

impl From<DeviceError> for GlslError {
    fn from(e: DeviceError) -> GlslError {
        GlslError::Device(e)
    }
}

// =============================================================
//  Collaborators
// =============================================================

#[derive(Debug)]
pub enum DeviceError {
    Compile(String),
    Link(String),
    BinaryUnsupported,
}

impl fmt::Display for DeviceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceError::Compile(log) => write!(f, "compile error: {log}"),
            DeviceError::Link(log) => write!(f, "link error: {log}"),
            DeviceError::BinaryUnsupported => write!(f, "program binaries unsupported"),
        }
    }
}

impl Error for DeviceError {}

#[derive(Debug)]
pub enum FsError {
    NotFound(String),
    Io(String),
}

impl fmt::Display for FsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FsError::NotFound(name) => write!(f, "file {name} not found"),
            FsError::Io(msg) => write!(f, "file system error: {msg}"),
        }
    }
}

impl Error for FsError {}
