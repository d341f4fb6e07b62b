use serde::{Deserialize, Serialize};

use super::ValueTreeReference;

/// Scalar values a property can hold.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Primitive {
    String(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Data(Vec<u8>),
}

impl Primitive {
    pub fn type_name(&self) -> &'static str {
        match self {
            Primitive::String(_) => "string",
            Primitive::Int(_) => "int",
            Primitive::Float(_) => "float",
            Primitive::Bool(_) => "bool",
            Primitive::Data(_) => "data",
        }
    }
}

/// A single named field of a value tree.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Property {
    Primitive(Primitive),
    OptionalPrimitive(Option<Primitive>),
    Primitives(Vec<Primitive>),
    Reference(ValueTreeReference),
    OptionalReference(Option<ValueTreeReference>),
    References(Vec<ValueTreeReference>),
}

impl Property {
    pub fn kind(&self) -> &'static str {
        match self {
            Property::Primitive(_) => "primitive",
            Property::OptionalPrimitive(_) => "optional primitive",
            Property::Primitives(_) => "primitive list",
            Property::Reference(_) => "reference",
            Property::OptionalReference(_) => "optional reference",
            Property::References(_) => "reference list",
        }
    }

    /// Child references held by this property, empty for scalar kinds.
    pub fn references(&self) -> &[ValueTreeReference] {
        match self {
            Property::Reference(reference) => std::slice::from_ref(reference),
            Property::OptionalReference(Some(reference)) => std::slice::from_ref(reference),
            Property::References(references) => references,
            _ => &[],
        }
    }

    pub(crate) fn update_references<F>(&mut self, transform: &mut F)
    where
        F: FnMut(&ValueTreeReference) -> ValueTreeReference,
    {
        match self {
            Property::Reference(reference) => *reference = transform(&*reference),
            Property::OptionalReference(Some(reference)) => *reference = transform(&*reference),
            Property::References(references) => {
                for reference in references.iter_mut() {
                    *reference = transform(&*reference);
                }
            }
            _ => {}
        }
    }

    /// Equal content, comparing references by identity only.
    pub fn is_equivalent(&self, other: &Property) -> bool {
        match (self, other) {
            (Property::Reference(a), Property::Reference(b)) => a.identity == b.identity,
            (Property::OptionalReference(a), Property::OptionalReference(b)) => {
                match (a, b) {
                    (Some(a), Some(b)) => a.identity == b.identity,
                    (None, None) => true,
                    _ => false,
                }
            }
            (Property::References(a), Property::References(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(a, b)| a.identity == b.identity)
            }
            _ => self == other,
        }
    }
}
