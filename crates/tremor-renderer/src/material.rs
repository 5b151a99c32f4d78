//! Material table.
//!
//! Script parsing is a collaborator concern; the host registers material
//! descriptors up front and the world loader resolves the BSP shader lump
//! against this table. Unknown names fall back to a default lit material so
//! a map never fails to load over a missing script.

use std::collections::HashMap;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CullMode {
    Front,
    Back,
    TwoSided,
}

/// Fog parameters carried by fog materials.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FogParms {
    pub color: [f32; 3],
    pub depth_for_opaque: f32,
}

#[derive(Clone, Debug)]
pub struct Material {
    pub name: String,
    /// Draw order key; lower sorts draw first.
    pub sort: f32,
    pub cull: CullMode,
    pub is_sky: bool,
    pub is_portal: bool,
    /// Whether dynamic lights affect this material at all.
    pub interacts_light: bool,
    pub no_shadows: bool,
    pub alpha_test: bool,
    pub fog_parms: Option<FogParms>,
}

pub const SORT_OPAQUE: f32 = 3.0;

impl Material {
    pub fn lit(name: &str) -> Material {
        Material {
            name: name.to_owned(),
            sort: SORT_OPAQUE,
            cull: CullMode::Front,
            is_sky: false,
            is_portal: false,
            interacts_light: true,
            no_shadows: false,
            alpha_test: false,
            fog_parms: None,
        }
    }

    pub fn sky(name: &str) -> Material {
        Material {
            is_sky: true,
            interacts_light: false,
            no_shadows: true,
            ..Material::lit(name)
        }
    }

    pub fn fog(name: &str, parms: FogParms) -> Material {
        Material {
            fog_parms: Some(parms),
            interacts_light: false,
            no_shadows: true,
            ..Material::lit(name)
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MaterialId(pub usize);

pub const DEFAULT_MATERIAL: MaterialId = MaterialId(0);

pub struct MaterialRegistry {
    materials: Vec<Material>,
    by_name: HashMap<String, MaterialId>,
}

impl Default for MaterialRegistry {
    fn default() -> MaterialRegistry {
        MaterialRegistry::new()
    }
}

impl MaterialRegistry {
    pub fn new() -> MaterialRegistry {
        let mut registry = MaterialRegistry {
            materials: Vec::new(),
            by_name: HashMap::new(),
        };
        registry.register(Material::lit("_default"));
        registry
    }

    pub fn register(&mut self, material: Material) -> MaterialId {
        if let Some(&id) = self.by_name.get(&material.name) {
            self.materials[id.0] = material;
            return id;
        }
        let id = MaterialId(self.materials.len());
        self.by_name.insert(material.name.clone(), id);
        self.materials.push(material);
        id
    }

    pub fn find(&self, name: &str) -> Option<MaterialId> {
        self.by_name.get(name).copied()
    }

    /// Resolve a name, registering a default lit material when unknown.
    pub fn find_or_default(&mut self, name: &str) -> MaterialId {
        match self.by_name.get(name) {
            Some(&id) => id,
            None => self.register(Material::lit(name)),
        }
    }

    pub fn get(&self, id: MaterialId) -> &Material {
        &self.materials[id.0]
    }

    pub fn len(&self) -> usize {
        self.materials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.materials.is_empty()
    }
}
