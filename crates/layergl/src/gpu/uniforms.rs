use std::collections::BTreeMap;

use serde_json::Value;

use crate::error::EngineError;
use crate::types::UniformValue;

use super::{CompiledProgram, GpuContext};

/// Shape of a uniform, inferred once from its default value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UniformArity {
    /// A plain number, uploaded with `uniform1f`.
    Scalar,
    /// A sequence of 1-4 numbers, uploaded with `uniform{N}fv`.
    Vector(usize),
}

impl UniformArity {
    pub fn components(self) -> usize {
        match self {
            UniformArity::Scalar => 1,
            UniformArity::Vector(len) => len,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct UniformSpec {
    pub name: String,
    pub arity: UniformArity,
    pub value: Vec<f32>,
}

impl UniformSpec {
    /// Infers the arity of a configured default.
    ///
    /// A number is a scalar and an array of 1 to 4 numbers a vector of that
    /// length. Any other array length, the empty array included, is a
    /// [`EngineError::UniformSize`]; every other shape is a
    /// [`EngineError::UniformType`].
    pub fn from_default(name: &str, value: &Value) -> Result<Self, EngineError> {
        let type_error = |found: &str| EngineError::UniformType {
            name: name.to_string(),
            found: found.to_string(),
        };
        let (arity, value) = match value {
            Value::Number(number) => {
                let scalar = number.as_f64().ok_or_else(|| type_error("a non-finite number"))?;
                (UniformArity::Scalar, vec![scalar as f32])
            }
            Value::Array(items) => {
                let mut components = Vec::with_capacity(items.len());
                for item in items {
                    let component = item
                        .as_f64()
                        .ok_or_else(|| type_error("an array containing a non-number"))?;
                    components.push(component as f32);
                }
                if components.is_empty() || components.len() > 4 {
                    return Err(EngineError::UniformSize {
                        name: name.to_string(),
                        len: components.len(),
                    });
                }
                (UniformArity::Vector(components.len()), components)
            }
            Value::String(_) => return Err(type_error("a string")),
            Value::Bool(_) => return Err(type_error("a boolean")),
            Value::Object(_) => return Err(type_error("an object")),
            Value::Null => return Err(type_error("null")),
        };
        Ok(Self {
            name: name.to_string(),
            arity,
            value,
        })
    }

    fn upload(&self, ctx: &mut dyn GpuContext, program: &CompiledProgram) {
        let Some(location) = program.uniform_location(&self.name) else {
            return;
        };
        match self.arity {
            UniformArity::Scalar => ctx.uniform_1f(location, self.value[0]),
            UniformArity::Vector(len) => ctx.uniform_fv(location, len, &self.value),
        }
    }
}

/// The configured uniforms, keyed by name.
#[derive(Debug, Clone, Default)]
pub struct UniformRegistry {
    specs: BTreeMap<String, UniformSpec>,
}

impl UniformRegistry {
    /// Validates every default before anything touches the GPU.
    pub fn register_defaults(defaults: &BTreeMap<String, Value>) -> Result<Self, EngineError> {
        let mut specs = BTreeMap::new();
        for (name, value) in defaults {
            specs.insert(name.clone(), UniformSpec::from_default(name, value)?);
        }
        Ok(Self { specs })
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&UniformSpec> {
        self.specs.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.specs.keys().map(String::as_str)
    }

    /// Pushes every current value to the program.
    pub(crate) fn upload_all(&self, ctx: &mut dyn GpuContext, program: &CompiledProgram) {
        for spec in self.specs.values() {
            spec.upload(ctx, program);
        }
    }

    /// Stores and uploads a new value. Returns whether anything was uploaded.
    pub(crate) fn set(
        &mut self,
        ctx: &mut dyn GpuContext,
        program: &CompiledProgram,
        name: &str,
        value: &UniformValue,
    ) -> bool {
        let Some(spec) = self.specs.get_mut(name) else {
            tracing::debug!(uniform = name, "ignoring value for unregistered uniform");
            return false;
        };
        let components = value.components();
        if components.len() != spec.arity.components() {
            tracing::warn!(
                uniform = name,
                expected = spec.arity.components(),
                actual = components.len(),
                "ignoring uniform value with the wrong number of components"
            );
            return false;
        }
        spec.value = components.to_vec();
        spec.upload(ctx, program);
        true
    }
}
