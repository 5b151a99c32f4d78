//! Compile macros and vertex attribute bits.
//!
//! A shader declares the macros it understands; each gets a bit in the
//! shader's permutation index in declaration order. Legality is a property
//! of a whole bit-set: a macro may conflict with other macros or require
//! them, and both predicates are evaluated against the candidate set.

use bitflags::bitflags;

/// Upper bound on macros per shader; bounds the permutation count at 2^10
/// and fixes the macro-list width in the binary cache header.
pub const MAX_SHADER_MACROS: usize = 10;

bitflags! {
    /// Vertex attribute streams a permutation consumes.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct VertexAttrBits: u32 {
        const POSITION     = 1 << 0;
        const QTANGENT     = 1 << 1;
        const ST           = 1 << 2;
        const LIGHTCOORD   = 1 << 3;
        const COLOR        = 1 << 4;
        const POSITION2    = 1 << 5;
        const QTANGENT2    = 1 << 6;
        const BONE_FACTORS = 1 << 7;
    }
}

/// (bits, shader attribute name, bound location) for every known stream.
pub const VERTEX_ATTRS: &[(VertexAttrBits, &str, u32)] = &[
    (VertexAttrBits::POSITION, "attr_Position", 0),
    (VertexAttrBits::QTANGENT, "attr_QTangent", 1),
    (VertexAttrBits::ST, "attr_TexCoord0", 2),
    (VertexAttrBits::LIGHTCOORD, "attr_TexCoord1", 3),
    (VertexAttrBits::COLOR, "attr_Color", 4),
    (VertexAttrBits::POSITION2, "attr_Position2", 5),
    (VertexAttrBits::QTANGENT2, "attr_QTangent2", 6),
    (VertexAttrBits::BONE_FACTORS, "attr_BoneFactors", 7),
];

/// Every compile macro the engine knows. A given shader declares a subset.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MacroId {
    UseVertexSkinning,
    UseVertexAnimation,
    UseVertexSprite,
    UseTcgenEnvironment,
    UseTcgenLightmap,
    UseDeformVertexes,
    UseNormalMapping,
    UseHeightMapInNormalMap,
    UseReliefMapping,
    UseReflectiveSpecular,
    UseShadowing,
    UseLightMapping,
    UseDeluxeMapping,
    UseGridLighting,
    UseGridDeluxeMapping,
    UseAlphaTesting,
    UseDepthFade,
    LightDirectional,
}

impl MacroId {
    /// Stable numeric identity, written into cache headers. Never reorder.
    pub fn stable_id(self) -> u32 {
        match self {
            MacroId::UseVertexSkinning => 0,
            MacroId::UseVertexAnimation => 1,
            MacroId::UseVertexSprite => 2,
            MacroId::UseTcgenEnvironment => 3,
            MacroId::UseTcgenLightmap => 4,
            MacroId::UseDeformVertexes => 5,
            MacroId::UseNormalMapping => 6,
            MacroId::UseHeightMapInNormalMap => 7,
            MacroId::UseReliefMapping => 8,
            MacroId::UseReflectiveSpecular => 9,
            MacroId::UseShadowing => 10,
            MacroId::UseLightMapping => 11,
            MacroId::UseDeluxeMapping => 12,
            MacroId::UseGridLighting => 13,
            MacroId::UseGridDeluxeMapping => 14,
            MacroId::UseAlphaTesting => 15,
            MacroId::UseDepthFade => 16,
            MacroId::LightDirectional => 17,
        }
    }

    /// The `#define` emitted when the macro is active.
    pub fn define_name(self) -> &'static str {
        match self {
            MacroId::UseVertexSkinning => "USE_VERTEX_SKINNING",
            MacroId::UseVertexAnimation => "USE_VERTEX_ANIMATION",
            MacroId::UseVertexSprite => "USE_VERTEX_SPRITE",
            MacroId::UseTcgenEnvironment => "USE_TCGEN_ENVIRONMENT",
            MacroId::UseTcgenLightmap => "USE_TCGEN_LIGHTMAP",
            MacroId::UseDeformVertexes => "USE_DEFORM_VERTEXES",
            MacroId::UseNormalMapping => "USE_NORMAL_MAPPING",
            MacroId::UseHeightMapInNormalMap => "USE_HEIGHTMAP_IN_NORMALMAP",
            MacroId::UseReliefMapping => "USE_RELIEF_MAPPING",
            MacroId::UseReflectiveSpecular => "USE_REFLECTIVE_SPECULAR",
            MacroId::UseShadowing => "USE_SHADOWING",
            MacroId::UseLightMapping => "USE_LIGHT_MAPPING",
            MacroId::UseDeluxeMapping => "USE_DELUXE_MAPPING",
            MacroId::UseGridLighting => "USE_GRID_LIGHTING",
            MacroId::UseGridDeluxeMapping => "USE_GRID_DELUXE_MAPPING",
            MacroId::UseAlphaTesting => "USE_ALPHA_TESTING",
            MacroId::UseDepthFade => "USE_DEPTH_FADE",
            MacroId::LightDirectional => "LIGHT_DIRECTIONAL",
        }
    }

    /// Macros this one can never be combined with.
    pub fn conflicts(self) -> &'static [MacroId] {
        match self {
            MacroId::UseVertexSkinning => {
                &[MacroId::UseVertexAnimation, MacroId::UseVertexSprite]
            }
            MacroId::UseVertexAnimation => {
                &[MacroId::UseVertexSkinning, MacroId::UseVertexSprite]
            }
            MacroId::UseVertexSprite => &[
                MacroId::UseVertexSkinning,
                MacroId::UseVertexAnimation,
                MacroId::UseTcgenEnvironment,
            ],
            MacroId::UseTcgenEnvironment => {
                &[MacroId::UseTcgenLightmap, MacroId::UseVertexSprite]
            }
            MacroId::UseTcgenLightmap => &[MacroId::UseTcgenEnvironment],
            MacroId::UseDeluxeMapping => &[MacroId::UseGridDeluxeMapping],
            MacroId::UseGridDeluxeMapping => &[MacroId::UseDeluxeMapping],
            _ => &[],
        }
    }

    /// Macros this one cannot work without.
    pub fn requires(self) -> &'static [MacroId] {
        match self {
            MacroId::UseReliefMapping => &[MacroId::UseHeightMapInNormalMap],
            MacroId::UseGridDeluxeMapping => &[MacroId::UseGridLighting],
            MacroId::UseDeluxeMapping => &[MacroId::UseLightMapping],
            _ => &[],
        }
    }

    /// Extra vertex streams the macro pulls in.
    pub fn vertex_attrs(self) -> VertexAttrBits {
        match self {
            MacroId::UseVertexSkinning => VertexAttrBits::BONE_FACTORS,
            MacroId::UseVertexAnimation => {
                VertexAttrBits::POSITION2.union(VertexAttrBits::QTANGENT2)
            }
            MacroId::UseTcgenLightmap | MacroId::UseLightMapping | MacroId::UseDeluxeMapping => {
                VertexAttrBits::LIGHTCOORD
            }
            _ => VertexAttrBits::empty(),
        }
    }

    /// Extra library snippets the macro's code depends on.
    pub fn lib_snippets(self) -> &'static [&'static str] {
        match self {
            MacroId::UseVertexSkinning => &["vertexSkinning"],
            MacroId::UseVertexAnimation => &["vertexAnimation"],
            MacroId::UseVertexSprite => &["vertexSprite"],
            MacroId::UseReliefMapping => &["reliefMapping"],
            MacroId::UseShadowing => &["shadowing"],
            _ => &[],
        }
    }
}

/// The macro half of a shader descriptor: an ordered list (bit i of a
/// permutation index is `macros[i]`).
#[derive(Clone, Debug, Default)]
pub struct MacroSet {
    macros: Vec<MacroId>,
}

impl MacroSet {
    pub fn new(macros: Vec<MacroId>) -> MacroSet {
        debug_assert!(macros.len() <= MAX_SHADER_MACROS);
        MacroSet { macros }
    }

    pub fn len(&self) -> usize {
        self.macros.len()
    }

    pub fn is_empty(&self) -> bool {
        self.macros.is_empty()
    }

    pub fn ids(&self) -> &[MacroId] {
        &self.macros
    }

    pub fn permutation_count(&self) -> u32 {
        1 << self.macros.len()
    }

    pub fn bit_of(&self, id: MacroId) -> Option<u32> {
        self.macros.iter().position(|&m| m == id).map(|i| 1 << i)
    }

    fn contains_any(&self, bits: u32, ids: &[MacroId]) -> bool {
        ids.iter()
            .any(|&id| self.bit_of(id).map_or(false, |b| bits & b != 0))
    }

    /// True when the macro at `index` is set in `bits` and one of its
    /// conflicting macros is set as well.
    pub fn has_conflicting_macros(&self, index: usize, bits: u32) -> bool {
        if bits & (1 << index) == 0 {
            return false;
        }
        self.contains_any(bits, self.macros[index].conflicts())
    }

    /// True when the macro at `index` is set in `bits` but one of its
    /// prerequisites is declared and missing.
    pub fn misses_required_macros(&self, index: usize, bits: u32) -> bool {
        if bits & (1 << index) == 0 {
            return false;
        }
        self.macros[index]
            .requires()
            .iter()
            .any(|&req| match self.bit_of(req) {
                Some(b) => bits & b == 0,
                // an undeclared prerequisite can never be satisfied
                None => true,
            })
    }

    /// A permutation is legal when no set macro conflicts or misses a
    /// prerequisite.
    pub fn is_legal(&self, bits: u32) -> bool {
        (0..self.macros.len()).all(|i| {
            !self.has_conflicting_macros(i, bits) && !self.misses_required_macros(i, bits)
        })
    }

    /// Nearest legal permutation: repeatedly clear the highest-numbered bit
    /// that conflicts or misses a prerequisite. Terminates because each step
    /// clears one bit and the empty set is always legal.
    pub fn resolve_legal(&self, mut bits: u32) -> u32 {
        bits &= self.permutation_count() - 1;
        while !self.is_legal(bits) {
            let offending = (0..self.macros.len())
                .rev()
                .find(|&i| {
                    self.has_conflicting_macros(i, bits) || self.misses_required_macros(i, bits)
                });
            match offending {
                Some(i) => bits &= !(1 << i),
                None => break,
            }
        }
        bits
    }

    /// Vertex streams required by the macros set in `bits`, on top of the
    /// shader's base streams.
    pub fn vertex_attrs(&self, bits: u32) -> VertexAttrBits {
        let mut attrs = VertexAttrBits::empty();
        for (i, &id) in self.macros.iter().enumerate() {
            if bits & (1 << i) != 0 {
                attrs |= id.vertex_attrs();
            }
        }
        attrs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn skin_anim_sprite() -> MacroSet {
        MacroSet::new(vec![
            MacroId::UseVertexSkinning,
            MacroId::UseVertexAnimation,
            MacroId::UseVertexSprite,
        ])
    }

    // ---------------------------------------------------------
    //  legality
    // ---------------------------------------------------------

    #[test]
    fn test_mutual_conflicts() {
        let set = skin_anim_sprite();
        assert!(set.is_legal(0b000));
        assert!(set.is_legal(0b001));
        assert!(set.is_legal(0b010));
        assert!(set.is_legal(0b100));
        assert!(!set.is_legal(0b011));
        assert!(!set.is_legal(0b101));
        assert!(!set.is_legal(0b111));
    }

    #[test]
    fn test_requires_declared_prerequisite() {
        let set = MacroSet::new(vec![
            MacroId::UseGridLighting,
            MacroId::UseGridDeluxeMapping,
        ]);
        assert!(set.is_legal(0b01)); // grid lighting alone
        assert!(!set.is_legal(0b10)); // deluxe without grid
        assert!(set.is_legal(0b11));
    }

    #[test]
    fn test_requires_undeclared_prerequisite_never_legal() {
        let set = MacroSet::new(vec![MacroId::UseGridDeluxeMapping]);
        assert!(set.is_legal(0b0));
        assert!(!set.is_legal(0b1));
    }

    // ---------------------------------------------------------
    //  resolution
    // ---------------------------------------------------------

    #[test]
    fn test_resolve_drops_highest_offender() {
        let set = skin_anim_sprite();
        // skinning + sprite conflict: sprite is the higher bit, drop it
        assert_eq!(set.resolve_legal(0b101), 0b001);
        // all three set: drop sprite, then animation
        assert_eq!(set.resolve_legal(0b111), 0b001);
        assert!(set.is_legal(set.resolve_legal(0b111)));
    }

    #[test]
    fn test_resolve_is_identity_on_legal_sets() {
        let set = skin_anim_sprite();
        for bits in 0..set.permutation_count() {
            if set.is_legal(bits) {
                assert_eq!(set.resolve_legal(bits), bits);
            }
        }
    }

    #[test]
    fn test_resolve_masks_out_of_range_bits() {
        let set = MacroSet::new(vec![MacroId::UseAlphaTesting]);
        assert_eq!(set.resolve_legal(0b1111_0001), 0b1);
    }

    // ---------------------------------------------------------
    //  attributes
    // ---------------------------------------------------------

    #[test]
    fn test_macro_vertex_attrs() {
        let set = skin_anim_sprite();
        assert_eq!(set.vertex_attrs(0b001), VertexAttrBits::BONE_FACTORS);
        assert_eq!(
            set.vertex_attrs(0b010),
            VertexAttrBits::POSITION2 | VertexAttrBits::QTANGENT2
        );
        assert_eq!(set.vertex_attrs(0b000), VertexAttrBits::empty());
    }
}
