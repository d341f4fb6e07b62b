use std::borrow::Borrow;

use crate::forest::{Forest, PlantedValueTree};
use crate::tree::{Property, ValueTree, ValueTreeReference};

use super::{HarvestError, PropertyReader, Repositable, RepositablePrimitive};

/// Reads one value tree back into a value, harvesting children from the
/// same forest.
pub struct ValueTreeHarvester<'f> {
    tree: &'f ValueTree,
    forest: &'f Forest,
}

impl<'f> ValueTreeHarvester<'f> {
    /// Rebuild the value stored under `reference`.
    ///
    /// The value's metadata is copied from its tree. A reference missing
    /// from the forest is a [`HarvestError::BrokenReference`].
    pub fn harvest<T: Repositable>(
        forest: &Forest,
        reference: &ValueTreeReference,
    ) -> Result<T, HarvestError> {
        let tree = forest
            .get(reference)
            .ok_or_else(|| HarvestError::BrokenReference(reference.clone()))?;
        if tree.reposited_type != T::REPOSITED_TYPE {
            return Err(HarvestError::RepositedTypeMismatch {
                expected: T::REPOSITED_TYPE.to_string(),
                found: tree.reposited_type.clone(),
            });
        }

        let harvester = ValueTreeHarvester { tree, forest };
        let mut value = T::read_from(&harvester)?;
        *value.metadata_mut() = tree.metadata.clone();
        Ok(value)
    }

    fn property(&self, name: &str) -> Result<&'f Property, HarvestError> {
        self.tree
            .get(name)
            .ok_or_else(|| HarvestError::MissingProperty {
                reposited_type: self.tree.reposited_type.clone(),
                name: name.to_string(),
            })
    }

    fn mismatch(name: &str, expected: &'static str, property: &Property) -> HarvestError {
        HarvestError::TypeMismatch {
            name: name.to_string(),
            expected,
            found: property.kind(),
        }
    }

    fn primitive<T: RepositablePrimitive>(
        name: &str,
        primitive: &crate::tree::Primitive,
    ) -> Result<T, HarvestError> {
        T::from_primitive(primitive).ok_or_else(|| HarvestError::TypeMismatch {
            name: name.to_string(),
            expected: T::TYPE_NAME,
            found: primitive.type_name(),
        })
    }
}

impl PropertyReader for ValueTreeHarvester<'_> {
    fn read<T: RepositablePrimitive>(&self, name: &str) -> Result<T, HarvestError> {
        match self.property(name)? {
            Property::Primitive(primitive) => Self::primitive(name, primitive),
            other => Err(Self::mismatch(name, "primitive", other)),
        }
    }

    fn read_optional<T: RepositablePrimitive>(
        &self,
        name: &str,
    ) -> Result<Option<T>, HarvestError> {
        match self.property(name)? {
            Property::OptionalPrimitive(primitive) => primitive
                .as_ref()
                .map(|primitive| Self::primitive(name, primitive))
                .transpose(),
            other => Err(Self::mismatch(name, "optional primitive", other)),
        }
    }

    fn read_list<T: RepositablePrimitive>(&self, name: &str) -> Result<Vec<T>, HarvestError> {
        match self.property(name)? {
            Property::Primitives(primitives) => primitives
                .iter()
                .map(|primitive| Self::primitive(name, primitive))
                .collect(),
            other => Err(Self::mismatch(name, "primitive list", other)),
        }
    }

    fn read_child<T: Repositable>(&self, name: &str) -> Result<T, HarvestError> {
        match self.property(name)? {
            Property::Reference(reference) => ValueTreeHarvester::harvest(self.forest, reference),
            other => Err(Self::mismatch(name, "reference", other)),
        }
    }

    fn read_optional_child<T: Repositable>(&self, name: &str) -> Result<Option<T>, HarvestError> {
        match self.property(name)? {
            Property::OptionalReference(reference) => reference
                .as_ref()
                .map(|reference| ValueTreeHarvester::harvest(self.forest, reference))
                .transpose(),
            other => Err(Self::mismatch(name, "optional reference", other)),
        }
    }

    fn read_children<T: Repositable>(&self, name: &str) -> Result<Vec<T>, HarvestError> {
        match self.property(name)? {
            Property::References(references) => references
                .iter()
                .map(|reference| ValueTreeHarvester::harvest(self.forest, reference))
                .collect(),
            other => Err(Self::mismatch(name, "reference list", other)),
        }
    }
}

/// Harvests values from rooted views.
pub struct ForestHarvester;

impl ForestHarvester {
    pub fn harvest<T, F>(planted: &PlantedValueTree<F>) -> Result<T, HarvestError>
    where
        T: Repositable,
        F: Borrow<Forest>,
    {
        ValueTreeHarvester::harvest(planted.forest(), planted.root())
    }
}
