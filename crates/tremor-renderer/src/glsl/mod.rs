//! GLSL shader permutation management.
//!
//! A shader is a descriptor (uniform list + compile macro set); a built
//! program is one permutation of it, keyed by a macro bit-set. The registry
//! assembles sources in a fixed section order, checksums them, and restores
//! driver binaries from the cache when every header field matches.

pub mod cache;
pub mod macros;
pub mod program;
pub mod registry;
pub mod uniform;

pub use macros::{MacroId, MacroSet, VertexAttrBits, MAX_SHADER_MACROS};
pub use program::ShaderProgram;
pub use registry::{ShaderDescriptor, ShaderKey, ShaderRegistry, DEFORM_IDENTITY};
pub use uniform::{UniformDecl, UniformKind};
