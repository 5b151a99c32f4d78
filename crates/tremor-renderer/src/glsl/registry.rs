//! Shader registry: descriptors, source assembly, permutation builds.
//!
//! Registration queues a shader; `build_all` enumerates every legal macro
//! bit-set and builds it, consulting the binary cache first. Binding with a
//! bit-set that was never built (an illegal set resolved at runtime, or a
//! shader registered after `build_all`) builds on demand.

use std::collections::HashMap;

use crc::{Crc, CRC_32_ISO_HDLC};
use log::debug;

use crate::device::{GraphicsDevice, StageKind, UniformValue};
use crate::error::GlslError;
use crate::fs::FileSystem;
use crate::glsl::cache::{load_program_binary, save_program_binary};
use crate::glsl::macros::{MacroId, MacroSet, VertexAttrBits, MAX_SHADER_MACROS, VERTEX_ATTRS};
use crate::glsl::program::ShaderProgram;
use crate::glsl::uniform::UniformDecl;

const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

const VERSION_DECL: &str = "#version 330 core\n";

const COMPAT_HEADER: &str = "\
#define textureCube texture
#define texture2D texture
#define texture2DProj textureProj
";

const ENGINE_CONSTANTS: &str = "\
#ifndef M_PI
#define M_PI 3.14159265358979323846
#endif
#define MAX_SHADOWMAPS 5
";

/// Index into the deform snippet table; 0 is the identity deform.
pub const DEFORM_IDENTITY: usize = 0;

const IDENTITY_DEFORM_SNIPPET: &str = "\
vec4 DeformPosition(const vec4 pos, const vec3 normal, const vec2 st) {
\treturn pos;
}
";

// =============================================================
//  Descriptors
// =============================================================

/// Everything that defines a shader: main sources, uniform list, macro set,
/// base vertex streams and library snippets. Built with [`ShaderBuilder`].
pub struct ShaderDescriptor {
    pub name: String,
    pub vertex_main: String,
    pub fragment_main: String,
    pub uniforms: Vec<UniformDecl>,
    pub macros: MacroSet,
    pub base_attrs: VertexAttrBits,
    pub lib_snippets: Vec<&'static str>,
    pub deform_index: usize,
}

impl ShaderDescriptor {
    pub fn builder(name: &str) -> ShaderBuilder {
        ShaderBuilder {
            name: name.to_owned(),
            vertex_main: String::new(),
            fragment_main: String::new(),
            uniforms: Vec::new(),
            macros: Vec::new(),
            base_attrs: VertexAttrBits::POSITION,
            lib_snippets: Vec::new(),
            deform_index: DEFORM_IDENTITY,
        }
    }

    /// Stable slot index of a declared uniform.
    pub fn uniform_slot(&self, name: &str) -> Option<usize> {
        self.uniforms.iter().position(|d| d.name == name)
    }
}

pub struct ShaderBuilder {
    name: String,
    vertex_main: String,
    fragment_main: String,
    uniforms: Vec<UniformDecl>,
    macros: Vec<MacroId>,
    base_attrs: VertexAttrBits,
    lib_snippets: Vec<&'static str>,
    deform_index: usize,
}

impl ShaderBuilder {
    pub fn vertex_main(mut self, source: &str) -> Self {
        self.vertex_main = source.to_owned();
        self
    }

    pub fn fragment_main(mut self, source: &str) -> Self {
        self.fragment_main = source.to_owned();
        self
    }

    pub fn uniform(mut self, decl: UniformDecl) -> Self {
        self.uniforms.push(decl);
        self
    }

    pub fn compile_macro(mut self, id: MacroId) -> Self {
        self.macros.push(id);
        self
    }

    pub fn base_attrs(mut self, attrs: VertexAttrBits) -> Self {
        self.base_attrs = attrs;
        self
    }

    pub fn lib_snippet(mut self, name: &'static str) -> Self {
        self.lib_snippets.push(name);
        self
    }

    pub fn deform_index(mut self, index: usize) -> Self {
        self.deform_index = index;
        self
    }

    pub fn build(self) -> Result<ShaderDescriptor, GlslError> {
        if self.macros.len() > MAX_SHADER_MACROS {
            return Err(GlslError::TooManyMacros {
                shader: self.name,
                count: self.macros.len(),
            });
        }
        Ok(ShaderDescriptor {
            name: self.name,
            vertex_main: self.vertex_main,
            fragment_main: self.fragment_main,
            uniforms: self.uniforms,
            macros: MacroSet::new(self.macros),
            base_attrs: self.base_attrs,
            lib_snippets: self.lib_snippets,
            deform_index: self.deform_index,
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ShaderKey(pub usize);

struct ShaderEntry {
    descriptor: ShaderDescriptor,
    permutations: HashMap<u32, ShaderProgram>,
}

// =============================================================
//  Registry
// =============================================================

#[derive(Default)]
pub struct ShaderRegistry {
    snippets: HashMap<&'static str, String>,
    deforms: Vec<String>,
    shaders: Vec<ShaderEntry>,
    build_queue: Vec<ShaderKey>,
}

impl ShaderRegistry {
    pub fn new() -> ShaderRegistry {
        ShaderRegistry {
            snippets: HashMap::new(),
            deforms: vec![IDENTITY_DEFORM_SNIPPET.to_owned()],
            shaders: Vec::new(),
            build_queue: Vec::new(),
        }
    }

    pub fn register_lib_snippet(&mut self, name: &'static str, source: &str) {
        self.snippets.insert(name, source.to_owned());
    }

    /// Dedupe a deform stage down to a table index.
    pub fn register_deform(&mut self, source: &str) -> usize {
        if let Some(i) = self.deforms.iter().position(|d| d == source) {
            return i;
        }
        self.deforms.push(source.to_owned());
        self.deforms.len() - 1
    }

    pub fn register_shader(&mut self, descriptor: ShaderDescriptor) -> ShaderKey {
        let key = ShaderKey(self.shaders.len());
        self.shaders.push(ShaderEntry {
            descriptor,
            permutations: HashMap::new(),
        });
        self.build_queue.push(key);
        key
    }

    pub fn descriptor(&self, key: ShaderKey) -> &ShaderDescriptor {
        &self.shaders[key.0].descriptor
    }

    pub fn program(&self, key: ShaderKey, bits: u32) -> Option<&ShaderProgram> {
        self.shaders[key.0].permutations.get(&bits)
    }

    // ---------------------------------------------------------
    //  source assembly
    // ---------------------------------------------------------

    /// Assemble the full source for one stage of one permutation. The
    /// section order is fixed; the CRC of this text is the cache key.
    fn assemble_source(
        &self,
        desc: &ShaderDescriptor,
        stage: StageKind,
        bits: u32,
    ) -> Result<String, GlslError> {
        let mut out = String::new();
        out.push_str(VERSION_DECL);
        out.push_str(COMPAT_HEADER);
        out.push_str(match stage {
            StageKind::Vertex => "#define VERTEX_SHADER\n",
            StageKind::Fragment => "#define FRAGMENT_SHADER\n",
        });
        out.push_str(ENGINE_CONSTANTS);

        for (i, id) in desc.macros.ids().iter().enumerate() {
            if bits & (1 << i) != 0 {
                out.push_str("#define ");
                out.push_str(id.define_name());
                out.push('\n');
            }
        }

        let attrs = desc.base_attrs | desc.macros.vertex_attrs(bits);
        for &(bit, name, location) in VERTEX_ATTRS {
            if attrs.contains(bit) {
                let upper = name.trim_start_matches("attr_").to_uppercase();
                out.push_str(&format!("#define ATTR_INDEX_{upper} {location}\n"));
            }
        }

        let mut libs: Vec<&'static str> = desc.lib_snippets.clone();
        for (i, id) in desc.macros.ids().iter().enumerate() {
            if bits & (1 << i) != 0 {
                for &lib in id.lib_snippets() {
                    if !libs.contains(&lib) {
                        libs.push(lib);
                    }
                }
            }
        }
        for lib in libs {
            let source = self
                .snippets
                .get(lib)
                .ok_or_else(|| GlslError::MissingSnippet(lib.to_owned()))?;
            out.push_str(source);
            out.push('\n');
        }

        if stage == StageKind::Vertex {
            out.push_str(&self.deforms[desc.deform_index]);
        }

        out.push_str(match stage {
            StageKind::Vertex => &desc.vertex_main,
            StageKind::Fragment => &desc.fragment_main,
        });
        Ok(out)
    }

    // ---------------------------------------------------------
    //  building
    // ---------------------------------------------------------

    fn build_permutation(
        &mut self,
        device: &dyn GraphicsDevice,
        fs: &dyn FileSystem,
        key: ShaderKey,
        bits: u32,
    ) -> Result<(), GlslError> {
        if self.shaders[key.0].permutations.contains_key(&bits) {
            return Ok(());
        }

        let desc = &self.shaders[key.0].descriptor;
        let vertex_source = self.assemble_source(desc, StageKind::Vertex, bits)?;
        let fragment_source = self.assemble_source(desc, StageKind::Fragment, bits)?;

        let mut digest = CRC32.digest();
        digest.update(vertex_source.as_bytes());
        digest.update(fragment_source.as_bytes());
        let checksum = digest.finalize();

        let desc = &self.shaders[key.0].descriptor;
        let name = desc.name.clone();
        let handle = match load_program_binary(fs, device, &name, &desc.macros, bits, checksum)
        {
            Some(handle) => handle,
            None => {
                let vs = device
                    .compile_stage(StageKind::Vertex, &vertex_source)
                    .map_err(|e| GlslError::CompileFailed {
                        shader: name.clone(),
                        log: e.to_string(),
                    })?;
                let fs_stage = device
                    .compile_stage(StageKind::Fragment, &fragment_source)
                    .map_err(|e| GlslError::CompileFailed {
                        shader: name.clone(),
                        log: e.to_string(),
                    })?;

                let attrs = desc.base_attrs | desc.macros.vertex_attrs(bits);
                let bindings: Vec<(u32, &str)> = VERTEX_ATTRS
                    .iter()
                    .filter(|(bit, _, _)| attrs.contains(*bit))
                    .map(|&(_, attr_name, location)| (location, attr_name))
                    .collect();

                let handle = device
                    .link_program(&name, &[vs, fs_stage], &bindings)
                    .map_err(|e| GlslError::LinkFailed {
                        shader: name.clone(),
                        log: e.to_string(),
                    })?;
                save_program_binary(fs, device, &name, &desc.macros, bits, checksum, handle);
                handle
            }
        };

        let desc = &self.shaders[key.0].descriptor;
        let program = ShaderProgram::new(device, handle, bits, &desc.uniforms);
        self.shaders[key.0].permutations.insert(bits, program);
        Ok(())
    }

    /// Build every legal permutation of every queued shader.
    pub fn build_all(
        &mut self,
        device: &dyn GraphicsDevice,
        fs: &dyn FileSystem,
    ) -> Result<(), GlslError> {
        let queue = std::mem::take(&mut self.build_queue);
        for key in queue {
            let macros = &self.shaders[key.0].descriptor.macros;
            let count = macros.permutation_count();
            let legal: Vec<u32> = (0..count)
                .filter(|&bits| self.shaders[key.0].descriptor.macros.is_legal(bits))
                .collect();
            if legal.is_empty() {
                return Err(GlslError::NoLegalPermutation {
                    shader: self.shaders[key.0].descriptor.name.clone(),
                });
            }
            for bits in &legal {
                self.build_permutation(device, fs, key, *bits)?;
            }
            debug!(
                "...built {} of {} permutations of {}",
                legal.len(),
                count,
                self.shaders[key.0].descriptor.name
            );
        }
        Ok(())
    }

    // ---------------------------------------------------------
    //  binding
    // ---------------------------------------------------------

    /// Bind the nearest legal permutation to `requested_bits`, building it
    /// first when needed. Returns the bit-set actually bound.
    pub fn bind(
        &mut self,
        device: &dyn GraphicsDevice,
        fs: &dyn FileSystem,
        key: ShaderKey,
        requested_bits: u32,
    ) -> Result<u32, GlslError> {
        let bits = self.shaders[key.0]
            .descriptor
            .macros
            .resolve_legal(requested_bits);
        self.build_permutation(device, fs, key, bits)?;
        let program = &self.shaders[key.0].permutations[&bits];
        device.bind_program(Some(program.handle));
        Ok(bits)
    }

    /// Set a uniform on a built permutation by declared name.
    pub fn set_uniform(
        &mut self,
        device: &dyn GraphicsDevice,
        key: ShaderKey,
        bits: u32,
        name: &str,
        value: &UniformValue,
    ) {
        let entry = &mut self.shaders[key.0];
        let Some(slot) = entry.descriptor.uniform_slot(name) else {
            return;
        };
        if let Some(program) = entry.permutations.get_mut(&bits) {
            program.set_uniform(device, &entry.descriptor.uniforms, slot, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::HeadlessDevice;
    use crate::fs::MemoryFileSystem;
    use crate::glsl::uniform::UniformKind;

    fn lighting_descriptor() -> ShaderDescriptor {
        ShaderDescriptor::builder("forwardLighting")
            .vertex_main("void main() { gl_Position = vec4(attr_Position, 1.0); }")
            .fragment_main("uniform vec3 u_LightColor; void main() {}")
            .uniform(UniformDecl::new("u_LightColor", UniformKind::Vec3))
            .compile_macro(MacroId::UseVertexSkinning)
            .compile_macro(MacroId::UseVertexAnimation)
            .compile_macro(MacroId::UseShadowing)
            .lib_snippet("lighting")
            .build()
            .unwrap()
    }

    fn registry_with_snippets() -> ShaderRegistry {
        let mut reg = ShaderRegistry::new();
        reg.register_lib_snippet("lighting", "// lighting lib\n");
        reg.register_lib_snippet("vertexSkinning", "// skinning lib\n");
        reg.register_lib_snippet("vertexAnimation", "// animation lib\n");
        reg.register_lib_snippet("shadowing", "// shadow lib\n");
        reg
    }

    // ---------------------------------------------------------
    //  enumeration
    // ---------------------------------------------------------

    #[test]
    fn test_build_all_builds_exactly_the_legal_sets() {
        let device = HeadlessDevice::new();
        let fs = MemoryFileSystem::new();
        let mut reg = registry_with_snippets();
        let key = reg.register_shader(lighting_descriptor());
        reg.build_all(&device, &fs).unwrap();

        let macros = &reg.descriptor(key).macros;
        for bits in 0..macros.permutation_count() {
            let legal = reg.descriptor(key).macros.is_legal(bits);
            assert_eq!(
                reg.program(key, bits).is_some(),
                legal,
                "permutation {bits:#b}"
            );
        }
        // skinning + animation conflict: 2 of 8 sets are illegal
        assert_eq!(device.link_count(), 6);
    }

    // ---------------------------------------------------------
    //  cache
    // ---------------------------------------------------------

    #[test]
    fn test_second_run_hits_the_cache() {
        let device = HeadlessDevice::new();
        let fs = MemoryFileSystem::new();
        let mut reg = registry_with_snippets();
        reg.register_shader(lighting_descriptor());
        reg.build_all(&device, &fs).unwrap();
        let cold_compiles = device.compile_count();
        assert!(cold_compiles > 0);

        // same sources, same device: every permutation restores from disk
        let mut reg2 = registry_with_snippets();
        reg2.register_shader(lighting_descriptor());
        reg2.build_all(&device, &fs).unwrap();
        assert_eq!(device.compile_count(), cold_compiles);
        assert_eq!(device.binary_upload_count(), 6);
    }

    #[test]
    fn test_source_change_misses_the_cache() {
        let device = HeadlessDevice::new();
        let fs = MemoryFileSystem::new();
        let mut reg = registry_with_snippets();
        reg.register_shader(lighting_descriptor());
        reg.build_all(&device, &fs).unwrap();
        let cold_compiles = device.compile_count();

        let mut reg2 = registry_with_snippets();
        reg2.register_lib_snippet("lighting", "// lighting lib v2\n");
        reg2.register_shader(lighting_descriptor());
        reg2.build_all(&device, &fs).unwrap();
        assert_eq!(device.compile_count(), cold_compiles * 2);
    }

    // ---------------------------------------------------------
    //  binding
    // ---------------------------------------------------------

    #[test]
    fn test_bind_resolves_conflicting_request() {
        let device = HeadlessDevice::new();
        let fs = MemoryFileSystem::new();
        let mut reg = registry_with_snippets();
        let key = reg.register_shader(lighting_descriptor());
        reg.build_all(&device, &fs).unwrap();

        // skinning | animation is illegal; animation (the higher bit) drops
        let bound = reg.bind(&device, &fs, key, 0b011).unwrap();
        assert_eq!(bound, 0b001);
    }

    #[test]
    fn test_bind_builds_on_demand() {
        let device = HeadlessDevice::new();
        let fs = MemoryFileSystem::new();
        let mut reg = registry_with_snippets();
        let key = reg.register_shader(lighting_descriptor());
        // no build_all: the first bind compiles just this permutation
        let bound = reg.bind(&device, &fs, key, 0b100).unwrap();
        assert_eq!(bound, 0b100);
        assert_eq!(device.link_count(), 1);
    }

    #[test]
    fn test_missing_snippet_fails_the_build() {
        let device = HeadlessDevice::new();
        let fs = MemoryFileSystem::new();
        let mut reg = ShaderRegistry::new();
        reg.register_shader(lighting_descriptor());
        assert!(matches!(
            reg.build_all(&device, &fs),
            Err(GlslError::MissingSnippet(_))
        ));
    }

    // ---------------------------------------------------------
    //  deforms
    // ---------------------------------------------------------

    #[test]
    fn test_deform_registry_dedupes() {
        let mut reg = ShaderRegistry::new();
        let wave = "vec4 DeformPosition(const vec4 pos, const vec3 n, const vec2 st) { return pos + vec4(n, 0.0); }";
        let a = reg.register_deform(wave);
        let b = reg.register_deform(wave);
        assert_eq!(a, b);
        assert_ne!(a, DEFORM_IDENTITY);
    }

    #[test]
    fn test_too_many_macros_rejected() {
        let mut builder = ShaderDescriptor::builder("overflowing");
        for _ in 0..=MAX_SHADER_MACROS {
            builder = builder.compile_macro(MacroId::UseAlphaTesting);
        }
        assert!(matches!(
            builder.build(),
            Err(GlslError::TooManyMacros { .. })
        ));
    }
}
