#![warn(missing_docs)]
#![doc(test(no_crate_inject))]
#![doc(test(attr(deny(unused, future_incompatible))))]

//! This crate provides an implementation of staged event trees, as described by these papers:
//!
//! - Smith and Anderson, Conditional independence and chain event graphs, 2008
//! - Collazzo, Görgen and Leonelli, Learning and interpreting staged event trees, 2018
//!
//! A staged event tree is a discrete probability model over an ordered sequence of categorical
//! variables. Every path from the root of the tree picks one level for each of the first few
//! variables; that path is the *context* in which the next variable is observed. Contexts at the
//! same depth are partitioned into *stages*, and every context in a stage shares one conditional
//! distribution for the next variable. Putting every context in its own stage gives the saturated
//! model, putting all of them in one stage gives the independence model, and everything in between
//! trades parameters for fit.
//!
//! The tree is never built out of nodes. A [`Tree`] only records the levels of each variable, and
//! [`tree_index`] turns a path into its position among all the paths of the same length.

use std::collections::HashSet;

mod data;
pub mod distance;
mod error;
mod model;
pub mod search;

pub use data::{Contingency, CountTable, DataSource, JointTable, Records};
pub use error::{Error, Result};
pub use model::{lr_test, Score, StageEstimate, StagedTree, DEFAULT_UNOBSERVED};

/// One categorical variable: a name and its ordered, distinct levels.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct Variable {
    name: String,
    levels: Vec<String>,
}

impl Variable {
    /// The variable's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The variable's levels, in their declared order.
    pub fn levels(&self) -> &[String] {
        &self.levels
    }
}

/// The shape of a complete symmetric event tree.
///
/// Depth `d` of the tree branches on the `d`th variable, so every node at that depth has one child
/// per level of that variable. The variable order here is the order of the tree and never changes
/// for the lifetime of a model.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct Tree {
    variables: Vec<Variable>,
}

impl Tree {
    /// Creates a tree from `(name, levels)` pairs, in tree order.
    ///
    /// Fails with [`Error::InvalidLevels`] if there are no variables, if any variable has no
    /// levels or repeats a level, or if two variables share a name.
    ///
    /// ```
    /// use stagedtrees::Tree;
    ///
    /// let tree = Tree::new(vec![("a", vec!["x", "y"]), ("b", vec!["1", "2", "3"])])?;
    /// assert_eq!(tree.len(), 2);
    /// assert_eq!(tree.cardinality(1), 3);
    ///
    /// assert!(Tree::new(vec![("a", vec!["x", "x"])]).is_err());
    /// assert!(Tree::new(vec![("a", Vec::<&str>::new())]).is_err());
    /// # Ok::<(), stagedtrees::Error>(())
    /// ```
    pub fn new<I, N, L, S>(variables: I) -> Result<Self>
    where
        I: IntoIterator<Item = (N, L)>,
        N: Into<String>,
        L: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut names = HashSet::new();
        let mut tree = Tree {
            variables: Vec::new(),
        };
        for (name, levels) in variables {
            let name = name.into();
            let levels: Vec<String> = levels.into_iter().map(Into::into).collect();
            if levels.is_empty() {
                return Err(Error::invalid_levels(&name, "no levels declared"));
            }
            let mut seen = HashSet::with_capacity(levels.len());
            if let Some(duplicate) = levels.iter().find(|level| !seen.insert(level.as_str())) {
                return Err(Error::invalid_levels(
                    &name,
                    format!("level `{}` appears twice", duplicate),
                ));
            }
            if !names.insert(name.clone()) {
                return Err(Error::invalid_levels(&name, "variable declared twice"));
            }
            tree.variables.push(Variable { name, levels });
        }
        if tree.variables.is_empty() {
            return Err(Error::invalid_levels("", "a tree needs at least one variable"));
        }
        Ok(tree)
    }

    /// The number of variables, which is also the depth of the tree.
    pub fn len(&self) -> usize {
        self.variables.len()
    }

    /// Always `false`: [`Tree::new`] refuses to build a tree without variables.
    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }

    /// Returns an iterator over the variables in tree order.
    pub fn variables(&self) -> impl ExactSizeIterator<Item = &Variable> + '_ {
        self.variables.iter()
    }

    /// The name of the variable at the given depth.
    pub fn name(&self, variable: usize) -> &str {
        &self.variables[variable].name
    }

    /// The levels of the variable at the given depth.
    pub fn levels(&self, variable: usize) -> &[String] {
        &self.variables[variable].levels
    }

    /// The number of levels of the variable at the given depth.
    pub fn cardinality(&self, variable: usize) -> usize {
        self.variables[variable].levels.len()
    }

    /// Finds a variable's depth by name.
    pub fn index_of(&self, name: &str) -> Result<usize> {
        self.variables
            .iter()
            .position(|variable| variable.name == name)
            .ok_or_else(|| Error::UnknownVariable(name.to_owned()))
    }

    /// Finds the 0-based index of `value` among the levels of the variable at the given depth.
    pub fn level_index(&self, variable: usize, value: &str) -> Result<usize> {
        let variable = &self.variables[variable];
        variable
            .levels
            .iter()
            .position(|level| level == value)
            .ok_or_else(|| Error::InvalidPath {
                variable: variable.name.clone(),
                value: value.to_owned(),
            })
    }

    /// The number of nodes at depth `variable`, which is the number of contexts in which that
    /// variable can be observed: the product of the cardinalities of every earlier variable.
    ///
    /// Passing `self.len()` gives the number of leaves.
    ///
    /// ```
    /// use stagedtrees::Tree;
    ///
    /// let tree = Tree::new(vec![("a", vec!["x", "y"]), ("b", vec!["1", "2", "3"])])?;
    /// assert_eq!(tree.positions(0), 1);
    /// assert_eq!(tree.positions(1), 2);
    /// assert_eq!(tree.positions(2), 6);
    /// # Ok::<(), stagedtrees::Error>(())
    /// ```
    pub fn positions(&self, variable: usize) -> usize {
        self.variables[..variable]
            .iter()
            .map(|variable| variable.levels.len())
            .product()
    }

    /// Converts a path of level names into 0-based level indices, checking every element.
    pub(crate) fn level_indices<S: AsRef<str>>(&self, path: &[S]) -> Result<Vec<usize>> {
        if path.len() > self.len() {
            return Err(Error::PathTooLong {
                length: path.len(),
                depth: self.len(),
            });
        }
        path.iter()
            .enumerate()
            .map(|(variable, value)| self.level_index(variable, value.as_ref()))
            .collect()
    }

    /// Mixed-radix position of a path of 0-based level indices, itself 0-based.
    pub(crate) fn row_of(&self, indices: &[usize]) -> usize {
        indices
            .iter()
            .zip(self.variables.iter())
            .fold(0, |row, (index, variable)| {
                row * variable.levels.len() + index
            })
    }
}

/// How [`tree_index`] numbers the nodes of a tree.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum IndexMode {
    /// Number nodes from 1 within their own depth.
    Local,
    /// Number nodes from 1 across the whole tree in breadth-first order, so the root is 1 and
    /// the first node at depth 1 is 2.
    Complete,
}

/// Returns the 1-based position of the node reached by following `path` from the root.
///
/// In [`IndexMode::Local`], the result lies between 1 and the number of nodes at depth
/// `path.len()`, and every path of that length maps to a different position. The position is a
/// mixed-radix number whose digits are the level indices along the path, most significant first.
///
/// Fails with [`Error::InvalidPath`] if some element isn't a level of the variable at its depth,
/// or [`Error::PathTooLong`] if the path has more elements than the tree has variables.
///
/// ```
/// use stagedtrees::{tree_index, IndexMode, Tree};
///
/// let tree = Tree::new(vec![("a", vec!["x", "y"]), ("b", vec!["1", "2", "3"])])?;
///
/// assert_eq!(tree_index(&["y", "2"], &tree, IndexMode::Local)?, 5);
/// assert_eq!(tree_index(&["y"], &tree, IndexMode::Local)?, 2);
/// assert_eq!(tree_index::<&str>(&[], &tree, IndexMode::Local)?, 1);
///
/// // One root and two nodes at depth 1 come before every node at depth 2.
/// assert_eq!(tree_index(&["y", "2"], &tree, IndexMode::Complete)?, 8);
/// assert_eq!(tree_index(&["x"], &tree, IndexMode::Complete)?, 2);
///
/// assert!(tree_index(&["z"], &tree, IndexMode::Local).is_err());
/// # Ok::<(), stagedtrees::Error>(())
/// ```
pub fn tree_index<S: AsRef<str>>(path: &[S], tree: &Tree, mode: IndexMode) -> Result<usize> {
    let indices = tree.level_indices(path)?;
    let local = tree.row_of(&indices) + 1;
    Ok(match mode {
        IndexMode::Local => local,
        IndexMode::Complete => {
            let shallower: usize = (0..path.len()).map(|depth| tree.positions(depth)).sum();
            local + shallower
        }
    })
}

/// Assigns a stage label to every context of every variable.
///
/// The stage vector of a variable may be shorter than the number of contexts at its depth; it is
/// then reused cyclically, so a single label describes a variable that doesn't depend on its
/// context at all. The length must evenly divide the number of contexts.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct StageTable {
    stages: Vec<Vec<String>>,
}

impl StageTable {
    /// The independence model: one stage, labeled `"1"`, per variable.
    pub fn independent(tree: &Tree) -> Self {
        StageTable {
            stages: vec![vec!["1".to_owned()]; tree.len()],
        }
    }

    /// The saturated model: every context in its own stage, labeled by its 1-based position.
    ///
    /// ```
    /// use stagedtrees::{StageTable, Tree};
    ///
    /// let tree = Tree::new(vec![
    ///     ("a", vec!["x", "y"]),
    ///     ("b", vec!["1", "2", "3"]),
    ///     ("c", vec!["t", "f"]),
    /// ])?;
    /// let full = StageTable::full(&tree);
    /// assert_eq!(full.distinct(0).len(), 1);
    /// assert_eq!(full.distinct(1).len(), 2);
    /// assert_eq!(full.distinct(2).len(), 6);
    /// # Ok::<(), stagedtrees::Error>(())
    /// ```
    pub fn full(tree: &Tree) -> Self {
        StageTable {
            stages: (0..tree.len())
                .map(|variable| {
                    (1..=tree.positions(variable))
                        .map(|position| position.to_string())
                        .collect()
                })
                .collect(),
        }
    }

    /// Creates a stage table from explicit stage vectors, one per variable in tree order.
    pub fn new(tree: &Tree, stages: Vec<Vec<String>>) -> Result<Self> {
        if stages.len() != tree.len() {
            return Err(Error::bad_stages(
                stages.len().min(tree.len()),
                format!(
                    "{} stage vectors given for {} variables",
                    stages.len(),
                    tree.len()
                ),
            ));
        }
        for (variable, labels) in stages.iter().enumerate() {
            check_length(tree, variable, labels.len())?;
        }
        Ok(StageTable { stages })
    }

    /// The number of variables this table covers.
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Returns `true` if the table covers no variables.
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// The stored stage vector of a variable, which may be shorter than the number of contexts.
    pub fn labels(&self, variable: usize) -> &[String] {
        &self.stages[variable]
    }

    /// Looks up the stage of the context at 1-based `position` for `variable`.
    ///
    /// Returns `None` if the variable doesn't exist or `position` is 0. Any other position is
    /// reduced modulo the stored stage vector's length.
    ///
    /// ```
    /// use stagedtrees::{StageTable, Tree};
    ///
    /// let tree = Tree::new(vec![("a", vec!["x", "y"]), ("b", vec!["1", "2"])])?;
    /// let independent = StageTable::independent(&tree);
    /// assert_eq!(independent.stage_of(1, 2), Some("1"));
    /// assert_eq!(independent.stage_of(1, 0), None);
    /// # Ok::<(), stagedtrees::Error>(())
    /// ```
    pub fn stage_of(&self, variable: usize, position: usize) -> Option<&str> {
        let labels = self.stages.get(variable)?;
        let row = position.checked_sub(1)?;
        Some(&labels[row % labels.len()])
    }

    /// Stage of the context at 0-based `row`, for callers that already validated `variable`.
    pub(crate) fn label_at(&self, variable: usize, row: usize) -> &str {
        let labels = &self.stages[variable];
        &labels[row % labels.len()]
    }

    /// The distinct stage labels of a variable, in order of first appearance.
    pub fn distinct(&self, variable: usize) -> Vec<&str> {
        let mut seen = HashSet::new();
        self.stages[variable]
            .iter()
            .map(String::as_str)
            .filter(|label| seen.insert(*label))
            .collect()
    }

    /// The stage vector of a variable, repeated out to one label per context.
    pub fn expanded(&self, tree: &Tree, variable: usize) -> Vec<String> {
        let labels = &self.stages[variable];
        labels
            .iter()
            .cycle()
            .take(tree.positions(variable))
            .cloned()
            .collect()
    }

    /// Puts every context currently in stage `drop` into stage `keep`.
    ///
    /// Merging a stage with itself changes nothing. Fails with [`Error::BadStageAssignment`] if
    /// the variable doesn't use one of the two labels.
    ///
    /// ```
    /// use stagedtrees::{StageTable, Tree};
    ///
    /// let tree = Tree::new(vec![("a", vec!["x", "y", "z"]), ("b", vec!["1", "2"])])?;
    /// let mut stages = StageTable::full(&tree);
    /// stages.merge(1, "1", "3")?;
    /// assert_eq!(stages.labels(1), ["1", "2", "1"]);
    ///
    /// let before = stages.clone();
    /// stages.merge(1, "2", "2")?;
    /// assert_eq!(stages, before);
    ///
    /// assert!(stages.merge(1, "1", "3").is_err());
    /// # Ok::<(), stagedtrees::Error>(())
    /// ```
    pub fn merge(&mut self, variable: usize, keep: &str, drop: &str) -> Result<()> {
        let labels = self
            .stages
            .get_mut(variable)
            .ok_or_else(|| Error::bad_stages(variable, "no such variable"))?;
        for label in [keep, drop].iter() {
            if !labels.iter().any(|existing| existing == label) {
                return Err(Error::bad_stages(
                    variable,
                    format!("stage `{}` is not in use", label),
                ));
            }
        }
        if keep != drop {
            for label in labels.iter_mut().filter(|label| label.as_str() == drop) {
                *label = keep.to_owned();
            }
        }
        Ok(())
    }

    /// Moves the context at 1-based `position` into a brand new stage and returns its label.
    ///
    /// A compact stage vector is first expanded to one label per context.
    pub fn split(&mut self, tree: &Tree, variable: usize, position: usize) -> Result<String> {
        if variable >= self.stages.len() {
            return Err(Error::bad_stages(variable, "no such variable"));
        }
        let positions = tree.positions(variable);
        if position == 0 || position > positions {
            return Err(Error::bad_stages(
                variable,
                format!("position {} is outside 1..={}", position, positions),
            ));
        }
        let mut labels = self.expanded(tree, variable);
        let label = StageTable::new_label(labels.iter().map(String::as_str));
        labels[position - 1] = label.clone();
        self.stages[variable] = labels;
        Ok(label)
    }

    /// Replaces a variable's whole stage vector, returning the previous one.
    pub fn set(
        &mut self,
        tree: &Tree,
        variable: usize,
        labels: Vec<String>,
    ) -> Result<Vec<String>> {
        if variable >= self.stages.len() {
            return Err(Error::bad_stages(variable, "no such variable"));
        }
        check_length(tree, variable, labels.len())?;
        Ok(std::mem::replace(&mut self.stages[variable], labels))
    }

    /// Returns the smallest positive integer, as a string, that isn't among `existing`.
    ///
    /// ```
    /// use stagedtrees::StageTable;
    ///
    /// assert_eq!(StageTable::new_label(vec!["2", "3"]), "1");
    /// assert_eq!(StageTable::new_label(vec!["1", "2", "UNOBSERVED"]), "3");
    /// ```
    pub fn new_label<'a, I: IntoIterator<Item = &'a str>>(existing: I) -> String {
        let existing: HashSet<&str> = existing.into_iter().collect();
        (1u64..)
            .map(|candidate| candidate.to_string())
            .find(|candidate| !existing.contains(candidate.as_str()))
            .unwrap_or_default()
    }
}

fn check_length(tree: &Tree, variable: usize, len: usize) -> Result<()> {
    let positions = tree.positions(variable);
    if len == 0 {
        Err(Error::bad_stages(variable, "empty stage vector"))
    } else if positions % len != 0 {
        Err(Error::bad_stages(
            variable,
            format!("{} stages do not evenly divide {} contexts", len, positions),
        ))
    } else {
        Ok(())
    }
}
