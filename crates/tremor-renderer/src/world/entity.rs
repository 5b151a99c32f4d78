//! Entities-lump parsing: worldspawn keys and light sources.
//!
//! Lights are counted in a first pass and parsed in a second; the two must
//! agree or the load fails, since interaction tables are sized from the
//! count.

use log::warn;

use tremor_common::math::{matrix_identity, quat_from_matrix, Vec3};
use tremor_common::tokenize::{parse_vector, Tokenizer};

use crate::error::LoadError;
use crate::world::light::{LightKind, LightSpec};
use crate::world::WorldSpawn;

type KeyValues = Vec<(String, String)>;

/// Read one `{ "key" "value" ... }` block; `None` at end of text.
fn parse_entity_block(tok: &mut Tokenizer) -> Result<Option<KeyValues>, LoadError> {
    let Some(open) = tok.parse() else {
        return Ok(None);
    };
    if open != "{" {
        return Err(LoadError::EntityParse(format!(
            "expected entity start at line {}, found {open:?}",
            tok.line()
        )));
    }
    let mut pairs = Vec::new();
    loop {
        let Some(key) = tok.parse() else {
            return Err(LoadError::EntityParse(
                "unterminated entity block".to_owned(),
            ));
        };
        if key == "}" {
            return Ok(Some(pairs));
        }
        let Some(value) = tok.parse() else {
            return Err(LoadError::EntityParse(
                "entity key without a value".to_owned(),
            ));
        };
        pairs.push((key, value));
    }
}

fn value_of<'a>(pairs: &'a KeyValues, key: &str) -> Option<&'a str> {
    pairs
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(key))
        .map(|(_, v)| v.as_str())
}

fn classname(pairs: &KeyValues) -> &str {
    value_of(pairs, "classname").unwrap_or("")
}

fn vec3_of(pairs: &KeyValues, key: &str) -> Option<Vec3> {
    value_of(pairs, key).map(|v| {
        let mut out = [0.0f32; 3];
        parse_vector(v, &mut out);
        out
    })
}

fn flag_of(pairs: &KeyValues, key: &str) -> bool {
    value_of(pairs, key)
        .and_then(|v| v.parse::<f32>().ok())
        .map_or(false, |v| v != 0.0)
}

// =============================================================
//  Worldspawn
// =============================================================

fn parse_worldspawn(pairs: &KeyValues) -> WorldSpawn {
    let mut spawn = WorldSpawn::default();

    if let Some(size) = vec3_of(pairs, "gridsize") {
        if size.iter().all(|&v| v > 0.0) {
            spawn.light_grid_size = size;
        }
    }
    if let Some(color) = vec3_of(pairs, "_color").or_else(|| vec3_of(pairs, "ambientColor")) {
        spawn.ambient_color = color;
    }
    if flag_of(pairs, "deluxeMapping") {
        spawn.deluxe_mapping = true;
    }
    if let Some(cmdline) = value_of(pairs, "_q3map2_cmdline") {
        if cmdline.contains("-deluxe") {
            spawn.deluxe_mapping = true;
        }
    }
    if flag_of(pairs, "hdrRGBE") {
        spawn.hdr_rgbe = true;
    }
    if let Some(bits) = value_of(pairs, "mapOverBrightBits").and_then(|v| v.parse::<i32>().ok())
    {
        spawn.map_overbright_bits = bits.clamp(0, 3) as u32;
    }
    spawn
}

// =============================================================
//  Lights
// =============================================================

fn parse_rotation(value: &str) -> [f32; 4] {
    let mut axis = [0.0f32; 9];
    parse_vector(value, &mut axis);
    let mut m = matrix_identity();
    for col in 0..3 {
        for row in 0..3 {
            m[col * 4 + row] = axis[col * 3 + row];
        }
    }
    quat_from_matrix(&m)
}

fn parse_light(pairs: &KeyValues, global_light_scale: f32) -> LightSpec {
    let mut spec = LightSpec::default();

    if let Some(origin) = vec3_of(pairs, "origin").or_else(|| vec3_of(pairs, "light_origin")) {
        spec.origin = origin;
    }
    if let Some(center) = vec3_of(pairs, "light_center") {
        spec.center = center;
    }
    if let Some(color) = vec3_of(pairs, "_color") {
        spec.color = color;
    }

    if let Some(radius) = vec3_of(pairs, "light_radius") {
        if radius[0] != radius[1] || radius[1] != radius[2] {
            warn!("non-spherical light volumes are approximated by their box");
        }
        spec.radius = radius;
    } else if let Some(v) = value_of(pairs, "light")
        .or_else(|| value_of(pairs, "_light"))
        .and_then(|v| v.parse::<f32>().ok())
    {
        spec.radius = [v, v, v];
    }

    if let Some(scale) = value_of(pairs, "light_scale").and_then(|v| v.parse::<f32>().ok()) {
        spec.scale = scale.min(global_light_scale);
    } else {
        spec.scale = global_light_scale;
    }

    for (key, field) in [
        ("light_target", 0usize),
        ("light_right", 1),
        ("light_up", 2),
        ("light_start", 3),
        ("light_end", 4),
    ] {
        if let Some(v) = vec3_of(pairs, key) {
            spec.kind = LightKind::Projective;
            match field {
                0 => spec.target = v,
                1 => spec.right = v,
                2 => spec.up = v,
                3 => spec.start = v,
                _ => spec.end = v,
            }
        }
    }

    if let Some(rotation) = value_of(pairs, "rotation").or_else(|| value_of(pairs, "light_rotation"))
    {
        spec.rotation = parse_rotation(rotation);
    }

    spec.no_shadows = flag_of(pairs, "noshadows");
    spec.no_radiosity = flag_of(pairs, "noradiosity");
    if flag_of(pairs, "parallel") {
        spec.kind = LightKind::Directional;
    }
    spec
}

// =============================================================
//  Driver
// =============================================================

fn is_light(pairs: &KeyValues) -> bool {
    classname(pairs) == "light"
}

/// Parse the entities lump. Returns the worldspawn keys and all lights.
pub fn parse_entities(
    text: &str,
    global_light_scale: f32,
) -> Result<(WorldSpawn, Vec<LightSpec>), LoadError> {
    // count pass
    let mut counted = 0usize;
    let mut tok = Tokenizer::new(text);
    while let Some(pairs) = parse_entity_block(&mut tok)? {
        if is_light(&pairs) {
            counted += 1;
        }
    }

    // parse pass
    let mut spawn = WorldSpawn::default();
    let mut lights = Vec::with_capacity(counted);
    let mut tok = Tokenizer::new(text);
    while let Some(pairs) = parse_entity_block(&mut tok)? {
        if classname(&pairs) == "worldspawn" {
            spawn = parse_worldspawn(&pairs);
        } else if is_light(&pairs) {
            lights.push(parse_light(&pairs, global_light_scale));
        }
    }

    if lights.len() != counted {
        return Err(LoadError::LightCountMismatch {
            counted,
            parsed: lights.len(),
        });
    }
    Ok((spawn, lights))
}
