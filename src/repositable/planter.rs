use crate::forest::{Forest, PlantedValueTree};
use crate::tree::{Property, ValueTree, ValueTreeReference};

use super::{PropertyWriter, Repositable, RepositablePrimitive};

/// Writes one value into a value tree, planting each child it meets into
/// the shared forest.
pub struct ValueTreePlanter<'f> {
    tree: ValueTree,
    forest: &'f mut Forest,
}

impl<'f> ValueTreePlanter<'f> {
    /// Plant `value` and everything it contains into `forest`, returning the
    /// reference of the value's own tree.
    ///
    /// Child references carry each child's current commit identifier, so a
    /// previously fetched graph plants references to the fetched versions.
    pub fn plant<T: Repositable>(value: &T, forest: &mut Forest) -> ValueTreeReference {
        let mut planter = ValueTreePlanter {
            tree: ValueTree::new(T::REPOSITED_TYPE, value.metadata().clone()),
            forest,
        };
        value.write_to(&mut planter);

        let ValueTreePlanter { tree, forest } = planter;
        let reference = tree.reference();
        forest.update(tree);
        reference
    }

    fn plant_child<T: Repositable>(&mut self, child: &T) -> ValueTreeReference {
        ValueTreePlanter::plant(child, self.forest)
    }
}

impl PropertyWriter for ValueTreePlanter<'_> {
    fn write<T: RepositablePrimitive>(&mut self, name: &str, value: &T) {
        self.tree.set(name, Property::Primitive(value.to_primitive()));
    }

    fn write_optional<T: RepositablePrimitive>(&mut self, name: &str, value: Option<&T>) {
        self.tree.set(
            name,
            Property::OptionalPrimitive(value.map(RepositablePrimitive::to_primitive)),
        );
    }

    fn write_list<T: RepositablePrimitive>(&mut self, name: &str, values: &[T]) {
        self.tree.set(
            name,
            Property::Primitives(values.iter().map(RepositablePrimitive::to_primitive).collect()),
        );
    }

    fn write_child<T: Repositable>(&mut self, name: &str, child: &T) {
        let reference = self.plant_child(child);
        self.tree.set(name, Property::Reference(reference));
    }

    fn write_optional_child<T: Repositable>(&mut self, name: &str, child: Option<&T>) {
        let reference = child.map(|child| self.plant_child(child));
        self.tree.set(name, Property::OptionalReference(reference));
    }

    fn write_children<T: Repositable>(&mut self, name: &str, children: &[T]) {
        let references = children
            .iter()
            .map(|child| self.plant_child(child))
            .collect();
        self.tree.set(name, Property::References(references));
    }
}

/// Plants whole value graphs into a forest.
#[derive(Debug, Default)]
pub struct ForestPlanter {
    forest: Forest,
}

impl ForestPlanter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Plant a value graph into a fresh forest, rooted at the value.
    pub fn planted<T: Repositable>(value: &T) -> PlantedValueTree<Forest> {
        let mut planter = Self::new();
        let root = planter.plant(value);
        PlantedValueTree::new(planter.into_forest(), root)
    }

    /// Add another value graph. A later write of the same entity version
    /// replaces an earlier one.
    pub fn plant<T: Repositable>(&mut self, value: &T) -> ValueTreeReference {
        ValueTreePlanter::plant(value, &mut self.forest)
    }

    pub fn into_forest(self) -> Forest {
        self.forest
    }
}
