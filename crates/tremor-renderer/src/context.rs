//! Engine context: one struct owning the registries and the loaded world.
//!
//! Hosts construct a [`Refresh`] around their device and file system and
//! drive everything through it. A world load is transactional: the old
//! world stays in place until the new one has made it through the whole
//! pipeline.

use std::sync::Arc;

use log::error;

use crate::device::{GraphicsDevice, UniformValue};
use crate::error::{GlslError, LoadError};
use crate::fs::FileSystem;
use crate::glsl::{ShaderDescriptor, ShaderKey, ShaderRegistry};
use crate::material::{Material, MaterialId, MaterialRegistry};
use crate::world::{load_world, World, WorldSettings};

/// Host-side knobs for a world load.
#[derive(Clone, Copy, Debug)]
pub struct LoadOptions {
    /// Global multiplier clamping per-entity light scales.
    pub light_scale: f32,
    /// Precompute light/surface interactions after loading.
    pub precomputed_lighting: bool,
    /// Whether shadow batches are built at all.
    pub shadows: bool,
    /// Debug aid: give every world surface the default material.
    pub single_shader: bool,
    /// Default overbright shift, overridable by worldspawn.
    pub map_overbright_bits: u32,
}

impl Default for LoadOptions {
    fn default() -> LoadOptions {
        LoadOptions {
            light_scale: 1.0,
            precomputed_lighting: true,
            shadows: true,
            single_shader: false,
            map_overbright_bits: 2,
        }
    }
}

impl LoadOptions {
    fn settings(&self) -> WorldSettings {
        WorldSettings {
            light_scale: self.light_scale,
            precomputed_lighting: self.precomputed_lighting,
            shadows: self.shadows,
            single_shader: self.single_shader,
            map_overbright_bits: self.map_overbright_bits,
        }
    }
}

/// The renderer front end.
pub struct Refresh {
    device: Arc<dyn GraphicsDevice>,
    fs: Arc<dyn FileSystem>,
    pub shaders: ShaderRegistry,
    pub materials: MaterialRegistry,
    world: Option<World>,
}

impl Refresh {
    pub fn new(device: Arc<dyn GraphicsDevice>, fs: Arc<dyn FileSystem>) -> Refresh {
        Refresh {
            device,
            fs,
            shaders: ShaderRegistry::new(),
            materials: MaterialRegistry::new(),
            world: None,
        }
    }

    // ---------------------------------------------------------
    //  materials
    // ---------------------------------------------------------

    pub fn register_material(&mut self, material: Material) -> MaterialId {
        self.materials.register(material)
    }

    // ---------------------------------------------------------
    //  shaders
    // ---------------------------------------------------------

    pub fn register_shader(&mut self, descriptor: ShaderDescriptor) -> ShaderKey {
        self.shaders.register_shader(descriptor)
    }

    /// Build every legal permutation of every registered shader up front.
    pub fn build_shaders(&mut self) -> Result<(), GlslError> {
        self.shaders.build_all(self.device.as_ref(), self.fs.as_ref())
    }

    /// Bind the nearest legal permutation; returns what was actually bound.
    pub fn bind_shader(&mut self, key: ShaderKey, bits: u32) -> Result<u32, GlslError> {
        self.shaders
            .bind(self.device.as_ref(), self.fs.as_ref(), key, bits)
    }

    pub fn set_uniform(&mut self, key: ShaderKey, bits: u32, name: &str, value: &UniformValue) {
        self.shaders
            .set_uniform(self.device.as_ref(), key, bits, name, value);
    }

    // ---------------------------------------------------------
    //  world
    // ---------------------------------------------------------

    /// Load a map. On failure the previously loaded world is untouched.
    pub fn load_world(&mut self, name: &str, options: &LoadOptions) -> Result<(), LoadError> {
        match load_world(
            self.fs.as_ref(),
            name,
            &mut self.materials,
            &options.settings(),
        ) {
            Ok(world) => {
                self.world = Some(world);
                Ok(())
            }
            Err(e) => {
                error!("couldn't load {name}: {e}");
                Err(e)
            }
        }
    }

    pub fn world(&self) -> Option<&World> {
        self.world.as_ref()
    }

    pub fn clear_world(&mut self) {
        self.world = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::HeadlessDevice;
    use crate::fs::MemoryFileSystem;

    fn refresh() -> (Refresh, Arc<MemoryFileSystem>) {
        let fs = Arc::new(MemoryFileSystem::new());
        let refresh = Refresh::new(Arc::new(HeadlessDevice::new()), fs.clone());
        (refresh, fs)
    }

    #[test]
    fn test_missing_map_fails_and_keeps_no_world() {
        let (mut refresh, _fs) = refresh();
        let err = refresh
            .load_world("maps/nowhere.bsp", &LoadOptions::default())
            .unwrap_err();
        assert!(matches!(err, LoadError::FileNotFound(_)));
        assert!(refresh.world().is_none());
    }

    #[test]
    fn test_garbage_map_is_rejected() {
        let (mut refresh, fs) = refresh();
        fs.insert("maps/bad.bsp", vec![0u8; 16]);
        let err = refresh
            .load_world("maps/bad.bsp", &LoadOptions::default())
            .unwrap_err();
        assert!(matches!(err, LoadError::TruncatedHeader(_)));
    }
}
