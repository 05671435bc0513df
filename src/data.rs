//! Getting observations into the shape the estimator needs: one count table per variable, with a
//! row for every context in which that variable is observed.

use crate::{Error, Result, Tree};
use smallvec::SmallVec;
use std::collections::BTreeSet;

/// Level indices along one observed path, in tree order. Most trees are shallow enough that these
/// never touch the heap.
type Path = SmallVec<[usize; 8]>;

fn check_count(count: f64) -> Result<()> {
    if count >= 0.0 && count.is_finite() {
        Ok(())
    } else {
        Err(Error::InvalidCounts(format!(
            "counts must be finite and non-negative, got {}",
            count
        )))
    }
}

/// A dense table of counts over every combination of levels of a tree's variables.
///
/// Cells are stored in the order of [`tree_index`][crate::tree_index] over full-length paths, so
/// the last variable varies fastest.
#[derive(Clone, Debug, PartialEq)]
pub struct JointTable {
    tree: Tree,
    counts: Vec<f64>,
}

impl JointTable {
    /// Wraps a vector holding one count per leaf of `tree`.
    pub fn new(tree: Tree, counts: Vec<f64>) -> Result<Self> {
        let cells = tree.positions(tree.len());
        if counts.len() != cells {
            return Err(Error::InvalidCounts(format!(
                "expected {} cells, found {}",
                cells,
                counts.len()
            )));
        }
        for count in counts.iter() {
            check_count(*count)?;
        }
        Ok(JointTable { tree, counts })
    }

    /// Creates a table with every cell zero.
    pub fn zeros(tree: Tree) -> Self {
        let cells = tree.positions(tree.len());
        JointTable {
            tree,
            counts: vec![0.0; cells],
        }
    }

    /// Adds `count` observations of the given full-length path.
    ///
    /// ```
    /// use stagedtrees::{JointTable, Tree};
    ///
    /// let tree = Tree::new(vec![("a", vec!["x", "y"]), ("b", vec!["1", "2"])])?;
    /// let mut table = JointTable::zeros(tree);
    /// table.add(&["y", "1"], 3.0)?.add(&["x", "2"], 1.0)?;
    /// assert_eq!(table.counts(), [0.0, 1.0, 3.0, 0.0]);
    /// assert_eq!(table.total(), 4.0);
    /// # Ok::<(), stagedtrees::Error>(())
    /// ```
    pub fn add<S: AsRef<str>>(&mut self, path: &[S], count: f64) -> Result<&mut Self> {
        check_count(count)?;
        let indices = self.tree.level_indices(path)?;
        if indices.len() != self.tree.len() {
            return Err(Error::InvalidCounts(format!(
                "a cell needs a level for all {} variables, got {}",
                self.tree.len(),
                indices.len()
            )));
        }
        let cell = self.tree.row_of(&indices);
        self.counts[cell] += count;
        Ok(self)
    }

    /// The variables and levels this table is indexed by.
    pub fn tree(&self) -> &Tree {
        &self.tree
    }

    /// Every cell, in path order.
    pub fn counts(&self) -> &[f64] {
        &self.counts
    }

    /// The total count across all cells.
    pub fn total(&self) -> f64 {
        self.counts.iter().sum()
    }
}

/// Row-wise categorical observations: a header of variable names and one record per observation,
/// each optionally weighted.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Records {
    header: Vec<String>,
    rows: Vec<Vec<String>>,
    weights: Vec<f64>,
}

impl Records {
    /// Creates an empty collection of records with the given column names.
    pub fn new<I, S>(header: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Records {
            header: header.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
            weights: Vec::new(),
        }
    }

    /// Appends one observation.
    pub fn push<I, S>(&mut self, row: I) -> Result<&mut Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.push_weighted(row, 1.0)
    }

    /// Appends a record standing for `weight` identical observations.
    pub fn push_weighted<I, S>(&mut self, row: I, weight: f64) -> Result<&mut Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        check_count(weight)?;
        let row: Vec<String> = row.into_iter().map(Into::into).collect();
        if row.len() != self.header.len() {
            return Err(Error::InvalidRecord {
                expected: self.header.len(),
                found: row.len(),
            });
        }
        self.rows.push(row);
        self.weights.push(weight);
        Ok(self)
    }

    /// The column names.
    pub fn header(&self) -> &[String] {
        &self.header
    }

    /// The number of records.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Returns `true` if there are no records.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Derives a tree from the data, ordering variables as the header does and levels in sorted
    /// order.
    ///
    /// ```
    /// use stagedtrees::Records;
    ///
    /// let mut records = Records::new(vec!["a", "b"]);
    /// records.push(vec!["y", "2"])?.push(vec!["x", "2"])?.push(vec!["y", "1"])?;
    /// let tree = records.tree()?;
    /// assert_eq!(tree.levels(0), ["x", "y"]);
    /// assert_eq!(tree.levels(1), ["1", "2"]);
    /// # Ok::<(), stagedtrees::Error>(())
    /// ```
    pub fn tree(&self) -> Result<Tree> {
        Tree::new(self.header.iter().enumerate().map(|(column, name)| {
            let levels: BTreeSet<&str> = self.rows.iter().map(|row| row[column].as_str()).collect();
            (name.clone(), levels)
        }))
    }
}

/// Where observations come from. Either form is converted into paths over a tree's variables
/// before any counting happens.
#[derive(Clone, Copy, Debug)]
pub enum DataSource<'a> {
    /// A full joint count table.
    Joint(&'a JointTable),
    /// One record per observation.
    Records(&'a Records),
}

impl<'a> From<&'a JointTable> for DataSource<'a> {
    fn from(table: &'a JointTable) -> Self {
        DataSource::Joint(table)
    }
}

impl<'a> From<&'a Records> for DataSource<'a> {
    fn from(records: &'a Records) -> Self {
        DataSource::Records(records)
    }
}

impl DataSource<'_> {
    /// Lists every observed path over `tree`'s variables with its positive weight.
    ///
    /// Variables are matched by name, so the data may carry columns the tree doesn't use; those
    /// are summed out.
    fn observations(&self, tree: &Tree) -> Result<Vec<(Path, f64)>> {
        match *self {
            DataSource::Joint(table) => {
                let source = table.tree();
                let columns = tree
                    .variables()
                    .map(|variable| {
                        let column = source
                            .index_of(variable.name())
                            .map_err(|_| Error::MissingData(variable.name().to_owned()))?;
                        if source.levels(column) != variable.levels() {
                            return Err(Error::invalid_levels(
                                variable.name(),
                                "declared levels differ from the levels in the data",
                            ));
                        }
                        Ok(column)
                    })
                    .collect::<Result<Vec<usize>>>()?;

                let mut digits = vec![0; source.len()];
                let mut observations = Vec::new();
                for (cell, count) in table.counts().iter().enumerate() {
                    if *count <= 0.0 {
                        continue;
                    }
                    let mut rest = cell;
                    for variable in (0..source.len()).rev() {
                        let cardinality = source.cardinality(variable);
                        digits[variable] = rest % cardinality;
                        rest /= cardinality;
                    }
                    let path = columns.iter().map(|column| digits[*column]).collect();
                    observations.push((path, *count));
                }
                Ok(observations)
            }

            DataSource::Records(records) => {
                let columns = tree
                    .variables()
                    .map(|variable| {
                        records
                            .header
                            .iter()
                            .position(|name| name == variable.name())
                            .ok_or_else(|| Error::MissingData(variable.name().to_owned()))
                    })
                    .collect::<Result<Vec<usize>>>()?;

                let mut observations = Vec::with_capacity(records.len());
                for (row, weight) in records.rows.iter().zip(records.weights.iter()) {
                    if *weight <= 0.0 {
                        continue;
                    }
                    let path = columns
                        .iter()
                        .enumerate()
                        .map(|(variable, column)| tree.level_index(variable, &row[*column]))
                        .collect::<Result<Path>>()?;
                    observations.push((path, *weight));
                }
                Ok(observations)
            }
        }
    }
}

/// Counts for one variable: a row per context, a column per level of the variable.
#[derive(Clone, Debug, PartialEq)]
pub struct CountTable {
    columns: usize,
    counts: Vec<f64>,
}

impl CountTable {
    fn zeros(rows: usize, columns: usize) -> Self {
        CountTable {
            columns,
            counts: vec![0.0; rows * columns],
        }
    }

    /// The number of contexts.
    pub fn rows(&self) -> usize {
        self.counts.len() / self.columns
    }

    /// The number of levels of the variable.
    pub fn columns(&self) -> usize {
        self.columns
    }

    /// The counts observed in the context at 0-based `row`.
    pub fn row(&self, row: usize) -> &[f64] {
        &self.counts[row * self.columns..(row + 1) * self.columns]
    }

    /// The number of observations that passed through the context at 0-based `row`.
    pub fn row_total(&self, row: usize) -> f64 {
        self.row(row).iter().sum()
    }

    /// The total count across the whole table.
    pub fn total(&self) -> f64 {
        self.counts.iter().sum()
    }
}

/// One [`CountTable`] per variable, all derived from the same observations.
#[derive(Clone, Debug, PartialEq)]
pub struct Contingency {
    tables: Vec<CountTable>,
}

impl Contingency {
    /// Counts the observations in `data` along every prefix of `tree`'s variable order.
    ///
    /// The table for the variable at depth `i` has one row per path over the first `i`
    /// variables, numbered as [`tree_index`][crate::tree_index] numbers them, so the first
    /// variable's table has a single row.
    ///
    /// Fails with [`Error::MissingData`] if the data lacks one of the tree's variables,
    /// [`Error::InvalidPath`] if it contains a value the tree doesn't declare, and
    /// [`Error::InvalidLevels`] if a joint table declares different levels than the tree.
    ///
    /// ```
    /// use stagedtrees::{Contingency, Records, Tree};
    ///
    /// let tree = Tree::new(vec![("a", vec!["x", "y"]), ("b", vec!["1", "2", "3"])])?;
    /// let mut records = Records::new(vec!["b", "a"]);
    /// records.push(vec!["1", "y"])?.push(vec!["3", "y"])?.push(vec!["3", "y"])?;
    /// records.push(vec!["2", "x"])?;
    ///
    /// let counts = Contingency::aggregate(&tree, (&records).into())?;
    /// assert_eq!(counts.table(0).row(0), [1.0, 3.0]);
    /// assert_eq!(counts.table(1).row(0), [0.0, 1.0, 0.0]);
    /// assert_eq!(counts.table(1).row(1), [1.0, 0.0, 2.0]);
    ///
    /// records.push(vec!["4", "x"])?;
    /// assert!(Contingency::aggregate(&tree, (&records).into()).is_err());
    /// # Ok::<(), stagedtrees::Error>(())
    /// ```
    pub fn aggregate(tree: &Tree, data: DataSource<'_>) -> Result<Self> {
        let mut tables: Vec<CountTable> = (0..tree.len())
            .map(|variable| CountTable::zeros(tree.positions(variable), tree.cardinality(variable)))
            .collect();

        for (path, weight) in data.observations(tree)? {
            let mut row = 0;
            for (variable, level) in path.iter().copied().enumerate() {
                let table = &mut tables[variable];
                table.counts[row * table.columns + level] += weight;
                row = row * table.columns + level;
            }
        }

        Ok(Contingency { tables })
    }

    /// The number of variables counted.
    pub fn len(&self) -> usize {
        self.tables.len()
    }

    /// Returns `true` if no variables were counted.
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// The count table of the variable at the given depth.
    pub fn table(&self, variable: usize) -> &CountTable {
        &self.tables[variable]
    }

    /// The total number of observations.
    pub fn sample_size(&self) -> f64 {
        self.tables.first().map_or(0.0, CountTable::total)
    }
}
