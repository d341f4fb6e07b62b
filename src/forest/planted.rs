use std::borrow::Borrow;

use crate::tree::{ValueTree, ValueTreePath, ValueTreeReference};

use super::Forest;

/// A forest viewed from one root.
///
/// The view either borrows its forest (`PlantedValueTree<&Forest>`) or owns
/// one (`PlantedValueTree<Forest>`), e.g. the result of [`map`](Self::map)
/// or of planting a fresh value.
#[derive(Clone, Debug)]
pub struct PlantedValueTree<F: Borrow<Forest>> {
    forest: F,
    root: ValueTreeReference,
}

impl<F: Borrow<Forest>> PlantedValueTree<F> {
    pub fn new(forest: F, root: ValueTreeReference) -> Self {
        Self { forest, root }
    }

    pub fn root(&self) -> &ValueTreeReference {
        &self.root
    }

    pub fn forest(&self) -> &Forest {
        self.forest.borrow()
    }

    pub fn root_tree(&self) -> Option<&ValueTree> {
        self.forest().get(&self.root)
    }

    pub fn into_forest(self) -> F {
        self.forest
    }

    /// Lazy pre-order walk yielding the full path to each node.
    pub fn paths(&self) -> ForestRanger<'_> {
        ForestRanger::new(self.forest(), self.root.clone())
    }

    /// Lazy pre-order walk yielding each node's reference.
    pub fn references(&self) -> impl Iterator<Item = ValueTreeReference> + '_ {
        self.paths().filter_map(|mut path| path.pop())
    }

    /// Lazy pre-order walk yielding each node.
    pub fn trees(&self) -> impl Iterator<Item = &ValueTree> + '_ {
        let forest = self.forest();
        self.references().filter_map(move |reference| forest.get(&reference))
    }

    /// New view over a fresh forest holding `transform(node)` for every
    /// reachable node.
    ///
    /// The root reference is kept, so `transform` must not change a node's
    /// identity or commit.
    pub fn map<T>(&self, mut transform: T) -> PlantedValueTree<Forest>
    where
        T: FnMut(&ValueTree) -> ValueTree,
    {
        let forest: Forest = self.trees().map(|tree| transform(tree)).collect();
        PlantedValueTree::new(forest, self.root.clone())
    }
}

/// Depth-first pre-order iterator over the nodes reachable from a root.
///
/// Children are visited in property order. References that do not resolve
/// in the forest end their branch and are not yielded.
pub struct ForestRanger<'a> {
    forest: &'a Forest,
    stack: Vec<ValueTreePath>,
}

impl<'a> ForestRanger<'a> {
    pub fn new(forest: &'a Forest, root: ValueTreeReference) -> Self {
        Self {
            forest,
            stack: vec![vec![root]],
        }
    }
}

impl<'a> Iterator for ForestRanger<'a> {
    type Item = ValueTreePath;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let path = self.stack.pop()?;
            let tree = match path.last().and_then(|reference| self.forest.get(reference)) {
                Some(tree) => tree,
                None => continue,
            };

            for child in tree.child_references().into_iter().rev() {
                // cycles end the branch
                if path.iter().any(|step| step.identity == child.identity) {
                    continue;
                }
                let mut child_path = path.clone();
                child_path.push(child);
                self.stack.push(child_path);
            }
            return Some(path);
        }
    }
}
