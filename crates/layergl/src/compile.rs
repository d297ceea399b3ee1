//! Rewrites WebGL-dialect shader stages into Vulkan GLSL 4.50 for `wgpu`.
//!
//! Layer shaders are written against the WebGL 1 surface: `attribute`,
//! `varying`, loose `uniform float`/`vecN` declarations, `sampler2D`,
//! `texture2D` and `gl_FragColor`. `wgpu` wants explicit locations and
//! bindings, so each stage is parsed into a [`StageInterface`], its
//! declarations are blanked out (keeping line numbers intact), and a header
//! re-declares everything with layouts:
//!
//! - value uniforms live in one std140 block of `vec4` slots at set 0, and a
//!   `#define` maps each name onto its slot swizzle;
//! - every sampler becomes a separate texture/sampler pair at set 1 and a
//!   `#define` rebuilds the combined sampler;
//! - the four contract attributes get fixed locations, varyings get locations
//!   shared between both stages.

use std::fmt::Write as _;

use crate::error::ShaderStage;

/// Fixed attribute locations. Other attributes are numbered after these.
pub(crate) const FIXED_ATTRIBUTES: [&str; 4] = [
    "a_VertexCoords",
    "a_TextureCoords",
    "a_CRSCoords",
    "a_LatLngCoords",
];

const UNIFORM_BLOCK: &str = "layergl_params";
const UNIFORM_SLOTS: &str = "layergl_slots";
const FRAG_OUTPUT: &str = "layergl_frag_color";

/// Kind of texture a sampler uniform reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SamplerKind {
    Image,
    FloatArray,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Declaration {
    pub ty: String,
    pub name: String,
}

impl Declaration {
    /// Number of floats a `float`/`vecN` declaration carries.
    pub fn components(&self) -> u32 {
        match self.ty.as_str() {
            "vec2" => 2,
            "vec3" => 3,
            "vec4" => 4,
            _ => 1,
        }
    }

    pub fn sampler_kind(&self) -> SamplerKind {
        if self.ty == "sampler2DArray" {
            SamplerKind::FloatArray
        } else {
            SamplerKind::Image
        }
    }
}

/// Declarations found in one stage plus its body with them removed.
#[derive(Debug, Clone, Default)]
pub(crate) struct StageInterface {
    pub attributes: Vec<Declaration>,
    pub varyings: Vec<Declaration>,
    pub uniforms: Vec<Declaration>,
    pub samplers: Vec<Declaration>,
    body: String,
}

/// Binding layout shared by both stages of one program.
#[derive(Debug, Clone, Default)]
pub(crate) struct ProgramLayout {
    /// Value uniforms in slot order.
    pub uniforms: Vec<Declaration>,
    /// Samplers in binding order; sampler `k` uses bindings `2k` and `2k + 1`.
    pub samplers: Vec<Declaration>,
    /// Varyings in location order.
    pub varyings: Vec<Declaration>,
}

impl ProgramLayout {
    /// Layout used to validate a single stage before it is linked.
    pub fn for_stage(interface: &StageInterface) -> Self {
        Self {
            uniforms: interface.uniforms.clone(),
            samplers: interface.samplers.clone(),
            varyings: interface.varyings.clone(),
        }
    }

    pub fn uniform_slot(&self, name: &str) -> Option<usize> {
        self.uniforms.iter().position(|decl| decl.name == name)
    }

    pub fn sampler_slot(&self, name: &str) -> Option<usize> {
        self.samplers.iter().position(|decl| decl.name == name)
    }
}

/// Location of a vertex attribute as seen by the pipeline.
pub(crate) fn attribute_location(interface: &StageInterface, name: &str) -> Option<u32> {
    let mut extra = FIXED_ATTRIBUTES.len() as u32;
    for decl in &interface.attributes {
        let location = match FIXED_ATTRIBUTES.iter().position(|fixed| *fixed == decl.name) {
            Some(index) => index as u32,
            None => {
                let location = extra;
                extra += 1;
                location
            }
        };
        if decl.name == name {
            return Some(location);
        }
    }
    None
}

/// Splits a WebGL-dialect stage into its declarations and body.
pub(crate) fn parse_stage(stage: ShaderStage, source: &str) -> Result<StageInterface, String> {
    let mut interface = StageInterface::default();
    let mut body = String::with_capacity(source.len());

    for (index, line) in source.lines().enumerate() {
        let code = line.split("//").next().unwrap_or("").trim();
        let keyword = code.split_whitespace().next().unwrap_or("");
        match keyword {
            "#version" | "precision" => {}
            "attribute" | "varying" | "uniform" => {
                let decls = parse_declaration(code)
                    .map_err(|reason| format!("{stage} shader line {}: {reason}", index + 1))?;
                for decl in decls {
                    classify(stage, keyword, decl, &mut interface)
                        .map_err(|reason| format!("{stage} shader line {}: {reason}", index + 1))?;
                }
            }
            _ => body.push_str(line),
        }
        body.push('\n');
    }

    interface.body = body;
    Ok(interface)
}

fn classify(
    stage: ShaderStage,
    keyword: &str,
    decl: Declaration,
    interface: &mut StageInterface,
) -> Result<(), String> {
    let is_vector = matches!(decl.ty.as_str(), "float" | "vec2" | "vec3" | "vec4");
    match keyword {
        "attribute" => {
            if stage != ShaderStage::Vertex {
                return Err(format!("attribute '{}' outside the vertex stage", decl.name));
            }
            if !is_vector {
                return Err(format!("attribute type '{}' is not supported", decl.ty));
            }
            interface.attributes.push(decl);
        }
        "varying" => {
            if !is_vector {
                return Err(format!("varying type '{}' is not supported", decl.ty));
            }
            interface.varyings.push(decl);
        }
        _ => match decl.ty.as_str() {
            "sampler2D" | "sampler2DArray" => interface.samplers.push(decl),
            _ if is_vector => interface.uniforms.push(decl),
            other => return Err(format!("uniform type '{other}' is not supported")),
        },
    }
    Ok(())
}

fn parse_declaration(code: &str) -> Result<Vec<Declaration>, String> {
    let code = code
        .strip_suffix(';')
        .ok_or_else(|| "declarations must fit on one line and end with ';'".to_string())?;
    let mut tokens = code
        .split_whitespace()
        .skip(1)
        .filter(|token| !matches!(*token, "lowp" | "mediump" | "highp"));
    let ty = tokens
        .next()
        .ok_or_else(|| "declaration is missing a type".to_string())?
        .to_string();
    let names: String = tokens.collect::<Vec<_>>().join(" ");

    let mut decls = Vec::new();
    for name in names.split(',') {
        let name = name.trim();
        if name.is_empty() {
            return Err(format!("declaration of type '{ty}' is missing a name"));
        }
        if name.contains('[') {
            return Err(format!("array declaration '{name}' is not supported"));
        }
        if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(format!("invalid identifier '{name}'"));
        }
        decls.push(Declaration {
            ty: ty.clone(),
            name: name.to_string(),
        });
    }
    Ok(decls)
}

/// Merges the two stages' declarations into one program layout.
///
/// Vertex declarations come first; a name declared in both stages must agree
/// on its type, and every fragment varying must be written by the vertex stage.
pub(crate) fn link_interfaces(
    vertex: &StageInterface,
    fragment: &StageInterface,
) -> Result<ProgramLayout, String> {
    let uniforms = merge("uniform", &vertex.uniforms, &fragment.uniforms)?;
    let samplers = merge("sampler", &vertex.samplers, &fragment.samplers)?;
    for varying in &fragment.varyings {
        match vertex.varyings.iter().find(|decl| decl.name == varying.name) {
            None => {
                return Err(format!(
                    "varying '{}' is read by the fragment stage but never written by the vertex stage",
                    varying.name
                ))
            }
            Some(decl) if decl.ty != varying.ty => {
                return Err(format!(
                    "varying '{}' is {} in the vertex stage but {} in the fragment stage",
                    varying.name, decl.ty, varying.ty
                ))
            }
            Some(_) => {}
        }
    }
    Ok(ProgramLayout {
        uniforms,
        samplers,
        varyings: vertex.varyings.clone(),
    })
}

fn merge(
    what: &str,
    vertex: &[Declaration],
    fragment: &[Declaration],
) -> Result<Vec<Declaration>, String> {
    let mut merged = vertex.to_vec();
    for decl in fragment {
        match merged.iter().find(|existing| existing.name == decl.name) {
            Some(existing) if existing.ty != decl.ty => {
                return Err(format!(
                    "{what} '{}' is {} in the vertex stage but {} in the fragment stage",
                    decl.name, existing.ty, decl.ty
                ))
            }
            Some(_) => {}
            None => merged.push(decl.clone()),
        }
    }
    Ok(merged)
}

/// Produces the GLSL 4.50 source for one stage under `layout`.
pub(crate) fn emit_stage(
    stage: ShaderStage,
    interface: &StageInterface,
    layout: &ProgramLayout,
) -> String {
    let mut out = String::from("#version 450\n");

    if !interface.uniforms.is_empty() {
        let slots = layout.uniforms.len().max(1);
        let _ = writeln!(
            out,
            "layout(std140, set = 0, binding = 0) uniform LayerParams {{\n    vec4 {UNIFORM_SLOTS}[{slots}];\n}} {UNIFORM_BLOCK};"
        );
        for decl in &interface.uniforms {
            let Some(slot) = layout.uniform_slot(&decl.name) else {
                continue;
            };
            let swizzle = match decl.components() {
                1 => ".x",
                2 => ".xy",
                3 => ".xyz",
                _ => "",
            };
            let _ = writeln!(
                out,
                "#define {} {UNIFORM_BLOCK}.{UNIFORM_SLOTS}[{slot}]{swizzle}",
                decl.name
            );
        }
    }

    for decl in &interface.samplers {
        let Some(slot) = layout.sampler_slot(&decl.name) else {
            continue;
        };
        let texture_ty = match decl.sampler_kind() {
            SamplerKind::Image => "texture2D",
            SamplerKind::FloatArray => "texture2DArray",
        };
        let binding = slot * 2;
        let _ = writeln!(
            out,
            "layout(set = 1, binding = {binding}) uniform {texture_ty} layergl_texture{slot};"
        );
        let _ = writeln!(
            out,
            "layout(set = 1, binding = {}) uniform sampler layergl_sampler{slot};",
            binding + 1
        );
        let _ = writeln!(
            out,
            "#define {} {}(layergl_texture{slot}, layergl_sampler{slot})",
            decl.name, decl.ty
        );
    }

    if stage == ShaderStage::Vertex {
        for decl in &interface.attributes {
            if let Some(location) = attribute_location(interface, &decl.name) {
                let _ = writeln!(
                    out,
                    "layout(location = {location}) in {} {};",
                    decl.ty, decl.name
                );
            }
        }
    }

    let direction = match stage {
        ShaderStage::Vertex => "out",
        ShaderStage::Fragment => "in",
    };
    for decl in &interface.varyings {
        if let Some(location) = layout
            .varyings
            .iter()
            .position(|varying| varying.name == decl.name)
        {
            let _ = writeln!(
                out,
                "layout(location = {location}) {direction} {} {};",
                decl.ty, decl.name
            );
        }
    }

    if stage == ShaderStage::Fragment {
        let _ = writeln!(out, "layout(location = 0) out vec4 {FRAG_OUTPUT};");
        let _ = writeln!(out, "#define gl_FragColor {FRAG_OUTPUT}");
    }
    out.push_str("#define texture2D texture\n");
    out.push_str("#line 1\n");
    out.push_str(&interface.body);
    out
}
