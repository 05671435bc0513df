//! Fitting stage probabilities to counts, and scoring the result.

use crate::data::{Contingency, CountTable, DataSource};
use crate::{Error, Result, StageTable, Tree};
use statrs::distribution::{ChiSquared, Univariate};
use std::collections::HashMap;
use tracing::trace;

/// The label given to contexts that no observation passed through, when fitting without
/// smoothing.
pub const DEFAULT_UNOBSERVED: &str = "UNOBSERVED";

/// The fitted distribution of one stage.
#[derive(Clone, Debug, PartialEq)]
#[non_exhaustive]
pub struct StageEstimate {
    /// The stage's label.
    pub label: String,

    /// Observed counts summed over every context in the stage, one per level of the variable.
    pub counts: Vec<f64>,

    /// The smoothed conditional distribution shared by every context in the stage.
    pub probabilities: Vec<f64>,

    /// This stage's contribution to the model's log-likelihood: the sum of each count times the
    /// natural log of its probability. Smoothing changes the probabilities but never the counts
    /// that weight them.
    pub log_likelihood: f64,
}

impl StageEstimate {
    fn smooth(&mut self, lambda: f64) {
        let total: f64 = self.counts.iter().sum();
        let levels = self.counts.len() as f64;
        let denominator = total + lambda * levels;
        self.probabilities = if denominator > 0.0 {
            self.counts
                .iter()
                .map(|count| (count + lambda) / denominator)
                .collect()
        } else {
            // Nothing to go on and no pseudo-counts either, so fall back to uniform instead of 0/0.
            vec![1.0 / levels; self.counts.len()]
        };
        self.log_likelihood = self
            .counts
            .iter()
            .zip(self.probabilities.iter())
            .filter(|(count, _)| **count > 0.0)
            .map(|(count, probability)| count * probability.ln())
            .sum();
    }

    /// The number of observations that reached this stage.
    pub fn total(&self) -> f64 {
        self.counts.iter().sum()
    }
}

fn estimate(
    table: &CountTable,
    stages: &StageTable,
    variable: usize,
    lambda: f64,
) -> Vec<StageEstimate> {
    let mut estimates: Vec<StageEstimate> = Vec::new();
    let mut index: HashMap<&str, usize> = HashMap::new();
    for row in 0..table.rows() {
        let label = stages.label_at(variable, row);
        let at = *index.entry(label).or_insert_with(|| {
            estimates.push(StageEstimate {
                label: label.to_owned(),
                counts: vec![0.0; table.columns()],
                probabilities: Vec::new(),
                log_likelihood: 0.0,
            });
            estimates.len() - 1
        });
        for (sum, count) in estimates[at].counts.iter_mut().zip(table.row(row)) {
            *sum += count;
        }
    }
    for estimate in estimates.iter_mut() {
        estimate.smooth(lambda);
    }
    estimates
}

#[derive(Clone, Debug)]
struct Fit {
    counts: Contingency,
    lambda: f64,
    // One entry per variable; each lists that variable's stages in order of first appearance.
    estimates: Vec<Vec<StageEstimate>>,
}

/// A staged event tree: a [`Tree`], a [`StageTable`] over it, and, once fitted, the counts and
/// stage probabilities estimated from data.
///
/// Every method that changes the stages re-estimates the affected variable right away, so the
/// probabilities and log-likelihood always describe the current stages.
///
/// ```
/// use stagedtrees::{Records, StagedTree};
///
/// let mut records = Records::new(vec!["a", "b"]);
/// for (a, b, n) in vec![("x", "1", 30.0), ("x", "2", 10.0), ("y", "1", 15.0), ("y", "2", 5.0)] {
///     records.push_weighted(vec![a, b], n)?;
/// }
/// let mut model = StagedTree::full(records.tree()?);
/// model.fit(&records, 0.0)?;
/// let saturated = model.log_likelihood()?;
///
/// // b has the same distribution whatever a is, so putting both contexts in one stage loses
/// // nothing.
/// model.merge_stages(1, "1", "2")?;
/// assert!((model.log_likelihood()? - saturated).abs() < 1e-9);
/// assert_eq!(model.stage_probabilities(1, "1")?, [0.75, 0.25]);
/// # Ok::<(), stagedtrees::Error>(())
/// ```
#[derive(Clone, Debug)]
pub struct StagedTree {
    tree: Tree,
    stages: StageTable,
    unobserved: String,
    fit: Option<Fit>,
}

impl StagedTree {
    /// Creates the independence model over `tree`: one stage per variable.
    pub fn independent(tree: Tree) -> Self {
        let stages = StageTable::independent(&tree);
        StagedTree::unfitted(tree, stages)
    }

    /// Creates the saturated model over `tree`: one stage per context.
    pub fn full(tree: Tree) -> Self {
        let stages = StageTable::full(&tree);
        StagedTree::unfitted(tree, stages)
    }

    /// Creates a model with explicit stages, which must have been built for a tree of the same
    /// shape.
    pub fn with_stages(tree: Tree, stages: StageTable) -> Result<Self> {
        let stages = StageTable::new(&tree, stages.stages)?;
        Ok(StagedTree::unfitted(tree, stages))
    }

    fn unfitted(tree: Tree, stages: StageTable) -> Self {
        StagedTree {
            tree,
            stages,
            unobserved: DEFAULT_UNOBSERVED.to_owned(),
            fit: None,
        }
    }

    /// Changes the label used for contexts without observations. Takes effect at the next fit.
    pub fn with_unobserved_label(mut self, label: impl Into<String>) -> Self {
        self.unobserved = label.into();
        self
    }

    /// The shape of the tree.
    pub fn tree(&self) -> &Tree {
        &self.tree
    }

    /// The current stages.
    pub fn stages(&self) -> &StageTable {
        &self.stages
    }

    /// The label given to contexts without observations.
    pub fn unobserved_label(&self) -> &str {
        &self.unobserved
    }

    /// Returns `true` once [`fit`][StagedTree::fit] has succeeded.
    pub fn is_fitted(&self) -> bool {
        self.fit.is_some()
    }

    /// The smoothing pseudo-count of the last fit.
    pub fn lambda(&self) -> Result<f64> {
        Ok(self.fitted()?.lambda)
    }

    fn fitted(&self) -> Result<&Fit> {
        self.fit.as_ref().ok_or(Error::UnfittedModel)
    }

    /// Counts `data` along the tree and estimates every stage's distribution, adding `lambda` to
    /// every count first.
    ///
    /// Any earlier counts are thrown away, and every context the last fit left in the unobserved
    /// stage gets a stage of its own again. Then, when `lambda` is 0, every context that no
    /// observation reached is moved into the unobserved stage, whose distribution is uniform.
    pub fn fit<'a>(&mut self, data: impl Into<DataSource<'a>>, lambda: f64) -> Result<()> {
        if !(lambda >= 0.0 && lambda.is_finite()) {
            return Err(Error::InvalidSmoothing(lambda));
        }
        let counts = Contingency::aggregate(&self.tree, data.into())?;

        for variable in 0..self.tree.len() {
            if !self.stages.stages[variable].contains(&self.unobserved) {
                continue;
            }
            let mut labels = self.stages.expanded(&self.tree, variable);
            for row in 0..labels.len() {
                if labels[row] == self.unobserved {
                    let fresh = StageTable::new_label(labels.iter().map(String::as_str));
                    labels[row] = fresh;
                }
            }
            self.stages.stages[variable] = labels;
        }

        if lambda == 0.0 {
            for variable in 0..self.tree.len() {
                let table = counts.table(variable);
                let empty: Vec<usize> = (0..table.rows())
                    .filter(|row| table.row_total(*row) == 0.0)
                    .collect();
                if !empty.is_empty() {
                    let mut labels = self.stages.expanded(&self.tree, variable);
                    for row in empty {
                        labels[row] = self.unobserved.clone();
                    }
                    self.stages.stages[variable] = labels;
                }
            }
        }

        let estimates = (0..self.tree.len())
            .map(|variable| {
                let estimates = estimate(counts.table(variable), &self.stages, variable, lambda);
                trace!(
                    variable = self.tree.name(variable),
                    stages = estimates.len(),
                    "estimated stage probabilities"
                );
                estimates
            })
            .collect();

        self.fit = Some(Fit {
            counts,
            lambda,
            estimates,
        });
        Ok(())
    }

    fn refresh(&mut self, variable: usize) {
        if let Some(fit) = self.fit.as_mut() {
            fit.estimates[variable] =
                estimate(fit.counts.table(variable), &self.stages, variable, fit.lambda);
        }
    }

    /// The counts from the last fit.
    pub fn counts(&self) -> Result<&Contingency> {
        Ok(&self.fitted()?.counts)
    }

    /// The total number of observations in the last fit.
    pub fn sample_size(&self) -> Result<f64> {
        Ok(self.fitted()?.counts.sample_size())
    }

    /// Every stage of a variable with its fitted distribution, in order of first appearance.
    pub fn estimates(&self, variable: usize) -> Result<&[StageEstimate]> {
        Ok(&self.fitted()?.estimates[variable])
    }

    fn estimate_of(&self, variable: usize, label: &str) -> Result<&StageEstimate> {
        self.estimates(variable)?
            .iter()
            .find(|estimate| estimate.label == label)
            .ok_or_else(|| Error::bad_stages(variable, format!("stage `{}` is not in use", label)))
    }

    /// The fitted distribution of one stage.
    pub fn stage_probabilities(&self, variable: usize, label: &str) -> Result<&[f64]> {
        Ok(&self.estimate_of(variable, label)?.probabilities)
    }

    /// The natural log of the likelihood of the fitted data under the current stages.
    pub fn log_likelihood(&self) -> Result<f64> {
        Ok(self
            .fitted()?
            .estimates
            .iter()
            .flatten()
            .map(|estimate| estimate.log_likelihood)
            .sum())
    }

    /// Computes the log-likelihood again context by context, without using any per-stage
    /// totals. Up to rounding, this always agrees with [`log_likelihood`][Self::log_likelihood].
    pub fn recompute_log_likelihood(&self) -> Result<f64> {
        let fit = self.fitted()?;
        let mut total = 0.0;
        for variable in 0..self.tree.len() {
            let table = fit.counts.table(variable);
            for row in 0..table.rows() {
                let label = self.stages.label_at(variable, row);
                let probabilities = &self.estimate_of(variable, label)?.probabilities;
                total += table
                    .row(row)
                    .iter()
                    .zip(probabilities.iter())
                    .filter(|(count, _)| **count > 0.0)
                    .map(|(count, probability)| count * probability.ln())
                    .sum::<f64>();
            }
        }
        Ok(total)
    }

    /// The number of free parameters: for every variable, one fewer than its number of levels for
    /// each stage other than the unobserved stage.
    pub fn degrees_of_freedom(&self) -> usize {
        (0..self.tree.len())
            .map(|variable| {
                let stages = self
                    .stages
                    .distinct(variable)
                    .into_iter()
                    .filter(|label| *label != self.unobserved)
                    .count();
                stages * (self.tree.cardinality(variable) - 1)
            })
            .sum()
    }

    /// The [Akaike Information Criterion][aic]; lower is better.
    ///
    /// [aic]: https://en.wikipedia.org/wiki/Akaike_information_criterion
    pub fn aic(&self) -> Result<f64> {
        Ok(-2.0 * self.log_likelihood()? + 2.0 * self.degrees_of_freedom() as f64)
    }

    /// The [Bayesian Information Criterion][bic]; lower is better.
    ///
    /// [bic]: https://en.wikipedia.org/wiki/Bayesian_information_criterion
    /// Fails with [`Error::EmptyData`] when no observations were fitted, since `ln 0` has no
    /// finite value.
    pub fn bic(&self) -> Result<f64> {
        let n = self.sample_size()?;
        if n <= 0.0 {
            return Err(Error::EmptyData);
        }
        Ok(-2.0 * self.log_likelihood()? + n.ln() * self.degrees_of_freedom() as f64)
    }

    /// Puts every context of stage `drop` into stage `keep` and re-estimates the variable.
    pub fn merge_stages(&mut self, variable: usize, keep: &str, drop: &str) -> Result<()> {
        self.stages.merge(variable, keep, drop)?;
        self.refresh(variable);
        Ok(())
    }

    /// Moves the context at 1-based `position` into a new stage and re-estimates the variable.
    /// Returns the new stage's label.
    pub fn split_stage(&mut self, variable: usize, position: usize) -> Result<String> {
        let label = self.stages.split(&self.tree, variable, position)?;
        self.refresh(variable);
        Ok(label)
    }

    /// Replaces a variable's stage vector, re-estimates it, and returns the old vector so the
    /// change can be undone.
    pub fn assign_stages(&mut self, variable: usize, labels: Vec<String>) -> Result<Vec<String>> {
        let previous = self.stages.set(&self.tree, variable, labels)?;
        self.refresh(variable);
        Ok(previous)
    }

    /// Moves every stage that no observation reached into a single stage called `name`.
    ///
    /// Empty stages contribute nothing to the log-likelihood, so this never changes it.
    pub fn join_zero_counts(&mut self, name: &str) -> Result<()> {
        for variable in 0..self.tree.len() {
            let empty: Vec<String> = self
                .estimates(variable)?
                .iter()
                .filter(|estimate| estimate.total() == 0.0)
                .map(|estimate| estimate.label.clone())
                .collect();
            if empty.is_empty() {
                continue;
            }
            for label in self.stages.stages[variable].iter_mut() {
                if empty.contains(label) {
                    *label = name.to_owned();
                }
            }
            self.refresh(variable);
        }
        Ok(())
    }

    /// Puts every context of every variable into one stage, giving the independence model.
    pub fn collapse_stages(&mut self) {
        for variable in 0..self.tree.len() {
            self.stages.stages[variable] = vec!["1".to_owned()];
            self.refresh(variable);
        }
    }

    /// Renames every variable's stages to `1`, `2`, ... in order of first appearance, leaving the
    /// unobserved stage alone.
    pub fn relabel_stages(&mut self) {
        for variable in 0..self.tree.len() {
            let mut names: HashMap<String, String> = HashMap::new();
            let unobserved = &self.unobserved;
            for label in self.stages.stages[variable].iter_mut() {
                if label == unobserved {
                    continue;
                }
                let next = names.len() + 1;
                *label = names
                    .entry(label.clone())
                    .or_insert_with(|| next.to_string())
                    .clone();
            }
            self.refresh(variable);
        }
    }

    /// Returns `true` if both models are over the same tree and partition every variable's
    /// contexts the same way, whatever the stages are called.
    pub fn compare_stages(&self, other: &StagedTree) -> bool {
        if self.tree != other.tree {
            return false;
        }
        (0..self.tree.len()).all(|variable| {
            let ours = self.stages.expanded(&self.tree, variable);
            let theirs = other.stages.expanded(&other.tree, variable);
            let mut forward = HashMap::new();
            let mut backward = HashMap::new();
            ours.iter().zip(theirs.iter()).all(|(a, b)| {
                *forward.entry(a).or_insert(b) == b && *backward.entry(b).or_insert(a) == a
            })
        })
    }

    fn path_probability(&self, indices: &[usize]) -> Result<f64> {
        let mut row = 0;
        let mut probability = 1.0;
        for (variable, level) in indices.iter().copied().enumerate() {
            let label = self.stages.label_at(variable, row);
            probability *= self.estimate_of(variable, label)?.probabilities[level];
            row = row * self.tree.cardinality(variable) + level;
        }
        Ok(probability)
    }

    /// The probability of observing `path` over the first `path.len()` variables.
    ///
    /// ```
    /// use stagedtrees::{Records, StagedTree};
    ///
    /// let mut records = Records::new(vec!["a", "b"]);
    /// records.push(vec!["x", "1"])?.push(vec!["x", "2"])?;
    /// records.push(vec!["y", "2"])?.push(vec!["y", "2"])?;
    /// let mut model = StagedTree::full(records.tree()?);
    /// model.fit(&records, 0.0)?;
    ///
    /// assert_eq!(model.prob(&["y"])?, 0.5);
    /// assert_eq!(model.prob(&["x", "2"])?, 0.25);
    /// assert_eq!(model.prob(&["y", "1"])?, 0.0);
    /// # Ok::<(), stagedtrees::Error>(())
    /// ```
    pub fn prob<S: AsRef<str>>(&self, path: &[S]) -> Result<f64> {
        let indices = self.tree.level_indices(path)?;
        self.path_probability(&indices)
    }

    /// Finds the most probable level of the variable named `class`, given the levels of every
    /// other variable in `path`.
    ///
    /// `path` names one level per variable in tree order; its entry for `class` is ignored and
    /// may be anything. Ties go to the level declared first.
    pub fn predict<S: AsRef<str>>(&self, class: &str, path: &[S]) -> Result<&str> {
        let class = self.tree.index_of(class)?;
        if path.len() > self.tree.len() {
            return Err(Error::PathTooLong {
                length: path.len(),
                depth: self.tree.len(),
            });
        }
        if path.len() < self.tree.len() {
            return Err(Error::InvalidRecord {
                expected: self.tree.len(),
                found: path.len(),
            });
        }
        let mut indices = path
            .iter()
            .enumerate()
            .map(|(variable, value)| {
                if variable == class {
                    Ok(0)
                } else {
                    self.tree.level_index(variable, value.as_ref())
                }
            })
            .collect::<Result<Vec<usize>>>()?;

        let mut best = (0, f64::NEG_INFINITY);
        for level in 0..self.tree.cardinality(class) {
            indices[class] = level;
            let probability = self.path_probability(&indices)?;
            if probability > best.1 {
                best = (level, probability);
            }
        }
        Ok(&self.tree.levels(class)[best.0])
    }
}

/// How searches rank models. Every variant is oriented so that higher is better.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Score {
    /// The log-likelihood alone, which always prefers more stages.
    LogLikelihood,
    /// The negated [Akaike Information Criterion][StagedTree::aic].
    Aic,
    /// The negated [Bayesian Information Criterion][StagedTree::bic].
    Bic,
    /// `-(-2 ll + k df)` for the given penalty weight `k`. A weight of 2 ranks models exactly as
    /// [`Aic`][Score::Aic] does.
    Penalized(f64),
}

impl Default for Score {
    fn default() -> Self {
        Score::Bic
    }
}

impl Score {
    /// Scores a fitted model.
    pub fn evaluate(&self, model: &StagedTree) -> Result<f64> {
        Ok(match *self {
            Score::LogLikelihood => model.log_likelihood()?,
            Score::Aic => -model.aic()?,
            Score::Bic => -model.bic()?,
            Score::Penalized(weight) => {
                2.0 * model.log_likelihood()? - weight * model.degrees_of_freedom() as f64
            }
        })
    }
}

/// Returns the probability that you'd be making a mistake if you rejected the simpler of two
/// nested models in favor of the richer one, using the likelihood-ratio test.
///
/// Both models must be fitted to the same data. If they have the same degrees of freedom the test
/// can't tell them apart, and the result is 1.
pub fn lr_test(simpler: &StagedTree, richer: &StagedTree) -> Result<f64> {
    let ddf = richer.degrees_of_freedom() as f64 - simpler.degrees_of_freedom() as f64;
    let lr = (richer.log_likelihood()? - simpler.log_likelihood()?).abs();
    if ddf == 0.0 {
        return Ok(1.0);
    }
    Ok(ChiSquared::new(ddf.abs()).map_or(1.0, |chi2| 1.0 - chi2.cdf(2.0 * lr)))
}
