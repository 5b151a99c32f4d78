//! Renderer core: GLSL shader permutation management and BSP world loading
//! with light/surface interaction precomputation.
//!
//! The crate is headless by design. Everything that would touch the driver
//! or the disk goes through the [`device::GraphicsDevice`] and
//! [`fs::FileSystem`] traits, so the whole pipeline runs under test with the
//! in-memory implementations.

pub mod context;
pub mod device;
pub mod error;
pub mod fs;
pub mod glsl;
pub mod material;
pub mod world;

pub use context::{LoadOptions, Refresh};
pub use error::{DeviceError, FsError, GlslError, LoadError};
