use std::collections::HashMap;

use crate::error::{EngineError, ShaderStage};

use super::{GpuContext, ProgramId, ShaderId, UniformLocation};

pub const ATTR_VERTEX_COORDS: &str = "a_VertexCoords";
pub const ATTR_TEXTURE_COORDS: &str = "a_TextureCoords";
pub const ATTR_CRS_COORDS: &str = "a_CRSCoords";
pub const ATTR_LAT_LNG_COORDS: &str = "a_LatLngCoords";

/// Scalar uniform holding milliseconds since the engine started. Declaring it
/// turns on the animation loop.
pub const CLOCK_UNIFORM: &str = "u_Now";

/// Locations of the fixed attributes; `None` when the vertex stage omits one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AttributeLocations {
    pub vertex: Option<u32>,
    pub texture: Option<u32>,
    pub crs: Option<u32>,
    pub lat_lng: Option<u32>,
}

/// The engine's single linked program and the locations resolved against it.
#[derive(Debug, Clone)]
pub struct CompiledProgram {
    pub id: ProgramId,
    pub attributes: AttributeLocations,
    clock: Option<UniformLocation>,
    uniforms: HashMap<String, UniformLocation>,
}

impl CompiledProgram {
    pub fn clock_location(&self) -> Option<UniformLocation> {
        self.clock
    }

    pub fn has_clock(&self) -> bool {
        self.clock.is_some()
    }

    pub fn uniform_location(&self, name: &str) -> Option<UniformLocation> {
        self.uniforms.get(name).copied()
    }

    /// Looks up and caches the locations of `names`; undeclared names stay unresolved.
    pub(crate) fn resolve_uniforms<'a>(
        &mut self,
        ctx: &dyn GpuContext,
        names: impl IntoIterator<Item = &'a str>,
    ) {
        for name in names {
            if let Some(location) = ctx.uniform_location(self.id, name) {
                self.uniforms.insert(name.to_string(), location);
            }
        }
    }
}

/// Compiles both stages and links them into the program the engine renders with.
///
/// Shader objects are released once linking has been attempted.
pub fn compile_and_link(
    ctx: &mut dyn GpuContext,
    vertex_source: &str,
    fragment_source: &str,
) -> Result<CompiledProgram, EngineError> {
    let vertex = compile_stage(ctx, ShaderStage::Vertex, vertex_source)?;
    let fragment = match compile_stage(ctx, ShaderStage::Fragment, fragment_source) {
        Ok(fragment) => fragment,
        Err(err) => {
            ctx.delete_shader(vertex);
            return Err(err);
        }
    };

    let linked = ctx.link_program(vertex, fragment);
    ctx.delete_shader(vertex);
    ctx.delete_shader(fragment);
    let id = linked.map_err(|diagnostic| EngineError::ProgramLink { diagnostic })?;

    let attributes = AttributeLocations {
        vertex: ctx.attribute_location(id, ATTR_VERTEX_COORDS),
        texture: ctx.attribute_location(id, ATTR_TEXTURE_COORDS),
        crs: ctx.attribute_location(id, ATTR_CRS_COORDS),
        lat_lng: ctx.attribute_location(id, ATTR_LAT_LNG_COORDS),
    };
    let clock = ctx.uniform_location(id, CLOCK_UNIFORM);
    tracing::debug!(
        program = id.0,
        ?attributes,
        clock = clock.is_some(),
        "linked tile shader program"
    );

    Ok(CompiledProgram {
        id,
        attributes,
        clock,
        uniforms: HashMap::new(),
    })
}

fn compile_stage(
    ctx: &mut dyn GpuContext,
    stage: ShaderStage,
    source: &str,
) -> Result<ShaderId, EngineError> {
    if source.trim().is_empty() {
        return Err(EngineError::ShaderCompile {
            stage,
            diagnostic: "shader source is empty".to_string(),
        });
    }
    ctx.compile_shader(stage, source)
        .map_err(|diagnostic| EngineError::ShaderCompile { stage, diagnostic })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::mock::{MockCall, MockContext, PASS_THROUGH_FRAGMENT, STANDARD_VERTEX};

    #[test]
    fn resolves_fixed_attributes_and_clock() {
        let mut ctx = MockContext::new();
        let fragment = format!("uniform float u_Now;\n{PASS_THROUGH_FRAGMENT}");
        let program = compile_and_link(&mut ctx, STANDARD_VERTEX, &fragment).unwrap();
        assert_eq!(program.attributes.vertex, Some(0));
        assert_eq!(program.attributes.texture, Some(1));
        assert_eq!(program.attributes.crs, Some(2));
        assert_eq!(program.attributes.lat_lng, Some(3));
        assert!(program.has_clock());
    }

    #[test]
    fn missing_attributes_are_not_an_error() {
        let mut ctx = MockContext::new();
        let vertex = "attribute vec2 a_VertexCoords;\nvoid main() {}\n";
        let program =
            compile_and_link(&mut ctx, vertex, "void main() { gl_FragColor = vec4(1.0); }").unwrap();
        assert_eq!(program.attributes.vertex, Some(0));
        assert_eq!(program.attributes.crs, None);
        assert!(!program.has_clock());
    }

    #[test]
    fn compile_failure_reports_stage_and_diagnostic() {
        let mut ctx = MockContext::new();
        let err = compile_and_link(&mut ctx, STANDARD_VERTEX, "#error broken\n").unwrap_err();
        match err {
            EngineError::ShaderCompile { stage, diagnostic } => {
                assert_eq!(stage, ShaderStage::Fragment);
                assert!(diagnostic.contains("broken"));
            }
            other => panic!("unexpected error: {other}"),
        }
        // The vertex shader that did compile is released again.
        let compiled = ctx.count(|call| matches!(call, MockCall::CompileShader(_)));
        let deleted = ctx.count(|call| matches!(call, MockCall::DeleteShader(_)));
        assert_eq!(compiled, deleted);
    }

    #[test]
    fn empty_source_is_a_compile_error() {
        let mut ctx = MockContext::new();
        let err = compile_and_link(&mut ctx, "  \n", PASS_THROUGH_FRAGMENT).unwrap_err();
        assert!(matches!(
            err,
            EngineError::ShaderCompile {
                stage: ShaderStage::Vertex,
                ..
            }
        ));
    }

    #[test]
    fn link_failure_is_reported_separately() {
        let mut ctx = MockContext::new();
        let fragment = "varying vec2 v_never;\nvoid main() { gl_FragColor = vec4(v_never, 0.0, 1.0); }\n";
        let err = compile_and_link(&mut ctx, STANDARD_VERTEX, fragment).unwrap_err();
        assert!(matches!(err, EngineError::ProgramLink { .. }));
        assert!(err.diagnostic().unwrap().contains("v_never"));
    }
}
