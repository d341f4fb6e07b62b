//! Application values that can be stored in a repository
//!
//! A [`Repositable`] knows how to write its fields to a [`PropertyWriter`]
//! and how to read itself back from a [`PropertyReader`]. Planting turns a
//! value graph into value trees; harvesting turns them back into values.

mod harvester;
mod planter;

pub use harvester::{ForestHarvester, ValueTreeHarvester};
pub use planter::{ForestPlanter, ValueTreePlanter};

use thiserror::Error;

use crate::tree::{Metadata, Primitive, ValueTreeIdentity, ValueTreeReference};

/// Errors raised while reconstructing values from a forest
#[derive(Error, Debug, Clone, PartialEq)]
pub enum HarvestError {
    #[error("Broken reference: {0}")]
    BrokenReference(ValueTreeReference),

    #[error("Missing property '{name}' on {reposited_type}")]
    MissingProperty { reposited_type: String, name: String },

    #[error("Type mismatch for '{name}': expected {expected}, found {found}")]
    TypeMismatch {
        name: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("Reposited type mismatch: expected {expected}, found {found}")]
    RepositedTypeMismatch { expected: String, found: String },
}

/// An application value type that can be flattened to and rebuilt from
/// value trees.
///
/// Object graphs are restricted to trees: a value appears in at most one
/// parent. Cross-links between entities should be stored as plain
/// identifiers.
pub trait Repositable: Sized {
    /// Stable tag naming this type in every value tree it produces
    const REPOSITED_TYPE: &'static str;

    fn metadata(&self) -> &Metadata;

    fn metadata_mut(&mut self) -> &mut Metadata;

    /// Rebuild a value from named fields. Metadata is restored by the
    /// harvester afterwards.
    fn read_from<R: PropertyReader>(reader: &R) -> Result<Self, HarvestError>;

    fn write_to<W: PropertyWriter>(&self, writer: &mut W);

    fn identity(&self) -> ValueTreeIdentity {
        ValueTreeIdentity::new(self.metadata().unique_identifier.clone(), Self::REPOSITED_TYPE)
    }
}

/// Scalar field types
pub trait RepositablePrimitive: Sized {
    const TYPE_NAME: &'static str;

    fn to_primitive(&self) -> Primitive;

    fn from_primitive(primitive: &Primitive) -> Option<Self>;
}

impl RepositablePrimitive for String {
    const TYPE_NAME: &'static str = "string";

    fn to_primitive(&self) -> Primitive {
        Primitive::String(self.clone())
    }

    fn from_primitive(primitive: &Primitive) -> Option<Self> {
        match primitive {
            Primitive::String(value) => Some(value.clone()),
            _ => None,
        }
    }
}

impl RepositablePrimitive for i64 {
    const TYPE_NAME: &'static str = "int";

    fn to_primitive(&self) -> Primitive {
        Primitive::Int(*self)
    }

    fn from_primitive(primitive: &Primitive) -> Option<Self> {
        match primitive {
            Primitive::Int(value) => Some(*value),
            _ => None,
        }
    }
}

impl RepositablePrimitive for i32 {
    const TYPE_NAME: &'static str = "int";

    fn to_primitive(&self) -> Primitive {
        Primitive::Int(i64::from(*self))
    }

    fn from_primitive(primitive: &Primitive) -> Option<Self> {
        match primitive {
            Primitive::Int(value) => i32::try_from(*value).ok(),
            _ => None,
        }
    }
}

impl RepositablePrimitive for f64 {
    const TYPE_NAME: &'static str = "float";

    fn to_primitive(&self) -> Primitive {
        Primitive::Float(*self)
    }

    fn from_primitive(primitive: &Primitive) -> Option<Self> {
        match primitive {
            Primitive::Float(value) => Some(*value),
            _ => None,
        }
    }
}

impl RepositablePrimitive for bool {
    const TYPE_NAME: &'static str = "bool";

    fn to_primitive(&self) -> Primitive {
        Primitive::Bool(*self)
    }

    fn from_primitive(primitive: &Primitive) -> Option<Self> {
        match primitive {
            Primitive::Bool(value) => Some(*value),
            _ => None,
        }
    }
}

impl RepositablePrimitive for Vec<u8> {
    const TYPE_NAME: &'static str = "data";

    fn to_primitive(&self) -> Primitive {
        Primitive::Data(self.clone())
    }

    fn from_primitive(primitive: &Primitive) -> Option<Self> {
        match primitive {
            Primitive::Data(value) => Some(value.clone()),
            _ => None,
        }
    }
}

/// Sink for the named fields of a value.
pub trait PropertyWriter {
    fn write<T: RepositablePrimitive>(&mut self, name: &str, value: &T);

    fn write_optional<T: RepositablePrimitive>(&mut self, name: &str, value: Option<&T>);

    fn write_list<T: RepositablePrimitive>(&mut self, name: &str, values: &[T]);

    fn write_child<T: Repositable>(&mut self, name: &str, child: &T);

    fn write_optional_child<T: Repositable>(&mut self, name: &str, child: Option<&T>);

    fn write_children<T: Repositable>(&mut self, name: &str, children: &[T]);
}

/// Source of the named fields of a value.
pub trait PropertyReader {
    fn read<T: RepositablePrimitive>(&self, name: &str) -> Result<T, HarvestError>;

    fn read_optional<T: RepositablePrimitive>(&self, name: &str)
        -> Result<Option<T>, HarvestError>;

    fn read_list<T: RepositablePrimitive>(&self, name: &str) -> Result<Vec<T>, HarvestError>;

    fn read_child<T: Repositable>(&self, name: &str) -> Result<T, HarvestError>;

    fn read_optional_child<T: Repositable>(&self, name: &str) -> Result<Option<T>, HarvestError>;

    fn read_children<T: Repositable>(&self, name: &str) -> Result<Vec<T>, HarvestError>;
}

/// Sample value types shared by unit tests across the crate.
#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    #[derive(Clone, Debug)]
    pub struct Pet {
        pub metadata: Metadata,
        pub name: String,
    }

    impl Pet {
        pub fn new(name: &str) -> Self {
            Self {
                metadata: Metadata::new(),
                name: name.to_string(),
            }
        }
    }

    impl Repositable for Pet {
        const REPOSITED_TYPE: &'static str = "Pet";

        fn metadata(&self) -> &Metadata {
            &self.metadata
        }

        fn metadata_mut(&mut self) -> &mut Metadata {
            &mut self.metadata
        }

        fn read_from<R: PropertyReader>(reader: &R) -> Result<Self, HarvestError> {
            Ok(Self {
                metadata: Metadata::default(),
                name: reader.read("name")?,
            })
        }

        fn write_to<W: PropertyWriter>(&self, writer: &mut W) {
            writer.write("name", &self.name);
        }
    }

    #[derive(Clone, Debug)]
    pub struct Person {
        pub metadata: Metadata,
        pub name: String,
        pub age: i64,
        pub nickname: Option<String>,
        pub tags: Vec<String>,
        pub best_friend: Option<Box<Person>>,
        pub pets: Vec<Pet>,
    }

    impl Person {
        pub fn new(name: &str, age: i64) -> Self {
            Self {
                metadata: Metadata::new(),
                name: name.to_string(),
                age,
                nickname: None,
                tags: Vec::new(),
                best_friend: None,
                pets: Vec::new(),
            }
        }

        pub fn pet_names(&self) -> Vec<&str> {
            self.pets.iter().map(|pet| pet.name.as_str()).collect()
        }
    }

    impl Repositable for Person {
        const REPOSITED_TYPE: &'static str = "Person";

        fn metadata(&self) -> &Metadata {
            &self.metadata
        }

        fn metadata_mut(&mut self) -> &mut Metadata {
            &mut self.metadata
        }

        fn read_from<R: PropertyReader>(reader: &R) -> Result<Self, HarvestError> {
            Ok(Self {
                metadata: Metadata::default(),
                name: reader.read("name")?,
                age: reader.read("age")?,
                nickname: reader.read_optional("nickname")?,
                tags: reader.read_list("tags")?,
                best_friend: reader.read_optional_child::<Person>("best_friend")?.map(Box::new),
                pets: reader.read_children("pets")?,
            })
        }

        fn write_to<W: PropertyWriter>(&self, writer: &mut W) {
            writer.write("name", &self.name);
            writer.write("age", &self.age);
            writer.write_optional("nickname", self.nickname.as_ref());
            writer.write_list("tags", &self.tags);
            writer.write_optional_child("best_friend", self.best_friend.as_deref());
            writer.write_children("pets", &self.pets);
        }
    }
}
