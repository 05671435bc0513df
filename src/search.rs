//! Searching for a stage assignment that scores well on the fitted data.
//!
//! Every search takes ownership of a fitted [`StagedTree`], tries candidate stage assignments one
//! variable at a time, and keeps a candidate only when it strictly improves the configured
//! [`Score`]. Candidates are applied to the working model, scored, and rolled back; only the
//! winner of each iteration is committed. When several candidates tie, the first one enumerated
//! wins: variables in tree order, stages in order of first appearance.
//!
//! A search scores its starting model, then iterates until no candidate improves the score or
//! `max_iter` runs out. The observer sees each committed change while it iterates; the returned
//! [`SearchOutcome`] records which of the two ways it stopped as a [`SearchState`].
//!
//! ```
//! use stagedtrees::search::{backward_hill_climb, SearchOptions, SearchState, Silent};
//! use stagedtrees::{Records, StagedTree};
//!
//! let mut records = Records::new(vec!["weather", "umbrella"]);
//! for (weather, umbrella, n) in vec![
//!     ("rain", "yes", 40.0),
//!     ("rain", "no", 10.0),
//!     ("sun", "yes", 5.0),
//!     ("sun", "no", 45.0),
//!     ("snow", "yes", 38.0),
//!     ("snow", "no", 12.0),
//! ] {
//!     records.push_weighted(vec![weather, umbrella], n)?;
//! }
//! let mut model = StagedTree::full(records.tree()?);
//! model.fit(&records, 0.0)?;
//!
//! let outcome = backward_hill_climb(model, &SearchOptions::default(), &mut Silent)?;
//! assert_eq!(outcome.state, SearchState::Converged);
//! // Rain and snow look alike; sun doesn't.
//! let umbrella = outcome.model.stages().labels(1);
//! assert_eq!(umbrella[0], umbrella[1]);
//! assert_ne!(umbrella[0], umbrella[2]);
//! # Ok::<(), stagedtrees::Error>(())
//! ```

use crate::distance::{bisect, hierarchical_clustering, Distance, DistanceMatrix, Linkage};
use crate::{Result, Score, StageTable, StagedTree};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use tracing::{debug, info};

// Score differences smaller than this are rounding noise, not improvements.
const TOLERANCE: f64 = 1e-10;

// Lloyd's algorithm converges long before this on stage-sized inputs.
const LLOYD_ROUNDS: usize = 100;

/// A change that a search committed to the model.
#[derive(Clone, Debug, PartialEq)]
pub enum Action {
    /// Every context of stage `drop` joined stage `keep`.
    Merge {
        /// Position of the variable in the tree's order.
        variable: usize,
        /// The surviving stage.
        keep: String,
        /// The stage that no longer exists.
        drop: String,
    },
    /// The context at 1-based `position` moved from one existing stage to another.
    Move {
        /// Position of the variable in the tree's order.
        variable: usize,
        /// 1-based position of the context.
        position: usize,
        /// The context's old stage.
        from: String,
        /// The context's new stage.
        to: String,
    },
    /// The context at 1-based `position` moved into a stage of its own.
    Split {
        /// Position of the variable in the tree's order.
        variable: usize,
        /// 1-based position of the context.
        position: usize,
        /// The new stage's label.
        label: String,
    },
    /// A clustering replaced the variable's stages with `stages` groups.
    Partition {
        /// Position of the variable in the tree's order.
        variable: usize,
        /// How many stages the variable has now, not counting the unobserved stage.
        stages: usize,
    },
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Action::Merge {
                variable,
                keep,
                drop,
            } => write!(f, "merge stage {} into {} of variable #{}", drop, keep, variable),
            Action::Move {
                variable,
                position,
                from,
                to,
            } => write!(
                f,
                "move context {} of variable #{} from stage {} to {}",
                position, variable, from, to
            ),
            Action::Split {
                variable,
                position,
                label,
            } => write!(
                f,
                "split context {} of variable #{} into new stage {}",
                position, variable, label
            ),
            Action::Partition { variable, stages } => {
                write!(f, "repartition variable #{} into {} stages", variable, stages)
            }
        }
    }
}

/// Receives a report after every committed iteration of a search.
///
/// Any `FnMut(usize, &Action, f64)` closure is an observer; so is [`Silent`], which ignores
/// everything.
pub trait Observer {
    /// Called after the `iteration`th change (counting from 1) was committed, with the model's
    /// new score.
    fn iteration(&mut self, iteration: usize, action: &Action, score: f64);
}

impl<F: FnMut(usize, &Action, f64)> Observer for F {
    fn iteration(&mut self, iteration: usize, action: &Action, score: f64) {
        self(iteration, action, score)
    }
}

/// An [`Observer`] that ignores every report.
#[derive(Clone, Copy, Debug, Default)]
pub struct Silent;

impl Observer for Silent {
    fn iteration(&mut self, _: usize, _: &Action, _: f64) {}
}

/// Why a search stopped.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum SearchState {
    /// No candidate improved the score.
    Converged,
    /// The search stopped because it ran out of iterations, not because it converged.
    MaxIterationsReached,
}

/// Settings shared by every search. Each algorithm reads the fields that apply to it and ignores
/// the rest.
///
/// ```
/// use stagedtrees::distance::{Distance, Linkage};
/// use stagedtrees::search::SearchOptions;
/// use stagedtrees::Score;
///
/// let options = SearchOptions::default()
///     .with_max_iter(5)
///     .with_score(Score::Aic)
///     .with_distance(Distance::Hellinger)
///     .with_linkage(Linkage::Average);
/// assert_eq!(options.max_iter, 5);
/// assert_eq!(options.seed, 0);
/// ```
#[derive(Clone, Debug, PartialEq)]
pub struct SearchOptions {
    /// The most changes a search commits. Searches that work through one variable at a time
    /// apply this bound to each variable separately.
    pub max_iter: usize,
    /// What the search tries to maximize.
    pub score: Score,
    /// Seed for the random choices made by randomized searches.
    pub seed: u64,
    /// How clustering searches compare stage distributions.
    pub distance: Distance,
    /// How [`hclust`] measures distances between clusters.
    pub linkage: Linkage,
    /// The number of clusters [`kmeans`] looks for.
    pub clusters: usize,
    /// How many random starting points [`kmeans`] tries.
    pub restarts: usize,
    /// How many stage pairs [`random_backward_hill_climb`] draws per iteration.
    pub samples: usize,
}

impl Default for SearchOptions {
    fn default() -> Self {
        SearchOptions {
            max_iter: 100,
            score: Score::default(),
            seed: 0,
            distance: Distance::default(),
            linkage: Linkage::default(),
            clusters: 2,
            restarts: 10,
            samples: 1,
        }
    }
}

impl SearchOptions {
    /// Sets [`max_iter`][Self::max_iter].
    pub fn with_max_iter(mut self, max_iter: usize) -> Self {
        self.max_iter = max_iter;
        self
    }

    /// Sets [`score`][Self::score].
    pub fn with_score(mut self, score: Score) -> Self {
        self.score = score;
        self
    }

    /// Sets [`seed`][Self::seed].
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Sets [`distance`][Self::distance].
    pub fn with_distance(mut self, distance: Distance) -> Self {
        self.distance = distance;
        self
    }

    /// Sets [`linkage`][Self::linkage].
    pub fn with_linkage(mut self, linkage: Linkage) -> Self {
        self.linkage = linkage;
        self
    }

    /// Sets [`clusters`][Self::clusters].
    pub fn with_clusters(mut self, clusters: usize) -> Self {
        self.clusters = clusters;
        self
    }

    /// Sets [`restarts`][Self::restarts].
    pub fn with_restarts(mut self, restarts: usize) -> Self {
        self.restarts = restarts;
        self
    }

    /// Sets [`samples`][Self::samples].
    pub fn with_samples(mut self, samples: usize) -> Self {
        self.samples = samples;
        self
    }
}

/// What a search produced.
#[derive(Clone, Debug)]
pub struct SearchOutcome {
    /// The best model found, fitted and with its stages re-estimated.
    pub model: StagedTree,
    /// The starting score followed by the score after each committed change. Never decreases.
    pub trajectory: Vec<f64>,
    /// Why the search stopped.
    pub state: SearchState,
}

impl SearchOutcome {
    /// The final model's score.
    pub fn score(&self) -> f64 {
        self.trajectory.last().copied().unwrap_or(f64::NEG_INFINITY)
    }

    /// How many changes were committed.
    pub fn iterations(&self) -> usize {
        self.trajectory.len().saturating_sub(1)
    }
}

struct Candidate {
    variable: usize,
    labels: Vec<String>,
    action: Action,
    score: f64,
}

fn beats(best: &Option<Candidate>, score: f64) -> bool {
    best.as_ref().map_or(true, |best| score > best.score)
}

fn merged(labels: &[String], keep: &str, drop: &str) -> Vec<String> {
    labels
        .iter()
        .map(|label| if label == drop { keep } else { label.as_str() })
        .map(str::to_owned)
        .collect()
}

/// Renames every label in each group to the group's first label.
fn partitioned(labels: &[String], groups: &[Vec<&str>]) -> Vec<String> {
    let mut rename: HashMap<&str, &str> = HashMap::new();
    for group in groups {
        if let Some(first) = group.first() {
            for label in group {
                rename.insert(*label, *first);
            }
        }
    }
    labels
        .iter()
        .map(|label| rename.get(label.as_str()).copied().unwrap_or(label).to_owned())
        .collect()
}

fn label_groups<'a>(labels: &'a [String], groups: &[Vec<usize>]) -> Vec<Vec<&'a str>> {
    groups
        .iter()
        .map(|rows| rows.iter().map(|row| labels[*row].as_str()).collect())
        .collect()
}

struct Search<'a, O: ?Sized> {
    algorithm: &'static str,
    model: StagedTree,
    options: &'a SearchOptions,
    observer: &'a mut O,
    score: f64,
    trajectory: Vec<f64>,
}

impl<'a, O: Observer + ?Sized> Search<'a, O> {
    fn new(
        algorithm: &'static str,
        model: StagedTree,
        options: &'a SearchOptions,
        observer: &'a mut O,
    ) -> Result<Self> {
        let score = options.score.evaluate(&model)?;
        debug!(algorithm, score, "starting search");
        Ok(Search {
            algorithm,
            model,
            options,
            observer,
            score,
            trajectory: vec![score],
        })
    }

    fn committed(&self) -> usize {
        self.trajectory.len() - 1
    }

    fn exhausted(&self) -> bool {
        self.committed() >= self.options.max_iter
    }

    fn improves(&self, score: f64) -> bool {
        score > self.score + TOLERANCE
    }

    /// The variable's stages that searches may touch, in order of first appearance.
    fn candidates(&self, variable: usize) -> Result<Vec<String>> {
        let unobserved = self.model.unobserved_label();
        Ok(self
            .model
            .estimates(variable)?
            .iter()
            .map(|estimate| &estimate.label)
            .filter(|label| label.as_str() != unobserved)
            .cloned()
            .collect())
    }

    /// Each candidate stage with its fitted distribution.
    fn distributions(&self, variable: usize) -> Result<Vec<(String, Vec<f64>)>> {
        let unobserved = self.model.unobserved_label();
        Ok(self
            .model
            .estimates(variable)?
            .iter()
            .filter(|estimate| estimate.label != unobserved)
            .map(|estimate| (estimate.label.clone(), estimate.probabilities.clone()))
            .collect())
    }

    /// Scores the model with `labels` in place of the variable's stages, then puts the old stages
    /// back. Hands `labels` back along with the score.
    fn try_labels(&mut self, variable: usize, labels: Vec<String>) -> Result<(f64, Vec<String>)> {
        let previous = self.model.assign_stages(variable, labels)?;
        let score = self.options.score.evaluate(&self.model);
        let labels = self.model.assign_stages(variable, previous)?;
        Ok((score?, labels))
    }

    fn commit(&mut self, candidate: Candidate) -> Result<()> {
        self.model.assign_stages(candidate.variable, candidate.labels)?;
        self.score = candidate.score;
        self.trajectory.push(candidate.score);
        let iteration = self.committed();
        debug!(
            algorithm = self.algorithm,
            iteration,
            action = %candidate.action,
            score = candidate.score,
            "committed"
        );
        self.observer.iteration(iteration, &candidate.action, candidate.score);
        Ok(())
    }

    fn commit_if_better(&mut self, best: Option<Candidate>) -> Result<bool> {
        match best {
            Some(candidate) if self.improves(candidate.score) => {
                self.commit(candidate)?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn best_merge(&mut self, variable: usize, best: &mut Option<Candidate>) -> Result<()> {
        let stages = self.candidates(variable)?;
        let labels = self.model.stages().labels(variable).to_vec();
        for (i, keep) in stages.iter().enumerate() {
            for drop in &stages[i + 1..] {
                let (score, proposal) = self.try_labels(variable, merged(&labels, keep, drop))?;
                if beats(best, score) {
                    *best = Some(Candidate {
                        variable,
                        labels: proposal,
                        action: Action::Merge {
                            variable,
                            keep: keep.clone(),
                            drop: drop.clone(),
                        },
                        score,
                    });
                }
            }
        }
        Ok(())
    }

    /// Tries moving each observed context to every other stage, and to a new stage of its own if
    /// it currently shares one.
    fn best_move(&mut self, variable: usize, best: &mut Option<Candidate>) -> Result<()> {
        let stages = self.candidates(variable)?;
        let unobserved = self.model.unobserved_label().to_owned();
        let mut labels = self.model.stages().expanded(self.model.tree(), variable);
        let fresh = StageTable::new_label(labels.iter().map(String::as_str));

        for position in 0..labels.len() {
            let from = labels[position].clone();
            if from == unobserved {
                continue;
            }
            let mut targets: Vec<&String> = stages.iter().filter(|stage| **stage != from).collect();
            if labels.iter().filter(|label| **label == from).count() > 1 {
                targets.push(&fresh);
            }

            for to in targets {
                labels[position] = to.clone();
                let (score, returned) = self.try_labels(variable, labels)?;
                labels = returned;
                if beats(best, score) {
                    let action = if *to == fresh {
                        Action::Split {
                            variable,
                            position: position + 1,
                            label: to.clone(),
                        }
                    } else {
                        Action::Move {
                            variable,
                            position: position + 1,
                            from: from.clone(),
                            to: to.clone(),
                        }
                    };
                    *best = Some(Candidate {
                        variable,
                        labels: labels.clone(),
                        action,
                        score,
                    });
                }
            }
            labels[position] = from;
        }
        Ok(())
    }

    /// Scores the partition of the variable's candidate stages into `groups` of rows.
    fn try_partition(
        &mut self,
        variable: usize,
        stages: &[String],
        groups: &[Vec<usize>],
        best: &mut Option<Candidate>,
    ) -> Result<()> {
        let labels = self.model.stages().labels(variable).to_vec();
        let proposal = partitioned(&labels, &label_groups(stages, groups));
        let (score, proposal) = self.try_labels(variable, proposal)?;
        if beats(best, score) {
            *best = Some(Candidate {
                variable,
                labels: proposal,
                action: Action::Partition {
                    variable,
                    stages: groups.len(),
                },
                score,
            });
        }
        Ok(())
    }

    fn finish(self, converged: bool) -> SearchOutcome {
        let state = if converged {
            SearchState::Converged
        } else {
            SearchState::MaxIterationsReached
        };
        info!(
            algorithm = self.algorithm,
            iterations = self.committed(),
            score = self.score,
            ?state,
            "search finished"
        );
        SearchOutcome {
            model: self.model,
            trajectory: self.trajectory,
            state,
        }
    }
}

/// Full hill-climbing.
///
/// Each iteration considers every merge of two stages of the same variable, every move of a
/// single context into another existing stage, and every split of a single context into a new
/// stage, across all variables. The best of them is committed if it improves the score.
pub fn hill_climb<O: Observer + ?Sized>(
    model: StagedTree,
    options: &SearchOptions,
    observer: &mut O,
) -> Result<SearchOutcome> {
    let mut search = Search::new("hc", model, options, observer)?;
    loop {
        if search.exhausted() {
            return Ok(search.finish(false));
        }
        let mut best = None;
        for variable in 0..search.model.tree().len() {
            search.best_merge(variable, &mut best)?;
            search.best_move(variable, &mut best)?;
        }
        if !search.commit_if_better(best)? {
            return Ok(search.finish(true));
        }
    }
}

/// Backward hill-climbing: like [`hill_climb`], but the only moves are merges.
///
/// Starting from the full model this is the classic way to find a compact staging.
pub fn backward_hill_climb<O: Observer + ?Sized>(
    model: StagedTree,
    options: &SearchOptions,
    observer: &mut O,
) -> Result<SearchOutcome> {
    let mut search = Search::new("bhc", model, options, observer)?;
    loop {
        if search.exhausted() {
            return Ok(search.finish(false));
        }
        let mut best = None;
        for variable in 0..search.model.tree().len() {
            search.best_merge(variable, &mut best)?;
        }
        if !search.commit_if_better(best)? {
            return Ok(search.finish(true));
        }
    }
}

/// Fast backward hill-climbing: merges within one variable until none helps, then moves on to the
/// next variable. [`max_iter`][SearchOptions::max_iter] bounds each variable separately.
pub fn fast_backward_hill_climb<O: Observer + ?Sized>(
    model: StagedTree,
    options: &SearchOptions,
    observer: &mut O,
) -> Result<SearchOutcome> {
    let mut search = Search::new("fbhc", model, options, observer)?;
    let mut capped = false;
    for variable in 0..search.model.tree().len() {
        let mut steps = 0;
        loop {
            if steps >= options.max_iter {
                capped = true;
                break;
            }
            let mut best = None;
            search.best_merge(variable, &mut best)?;
            if !search.commit_if_better(best)? {
                break;
            }
            steps += 1;
        }
    }
    Ok(search.finish(!capped))
}

/// Randomized backward hill-climbing.
///
/// Each iteration picks one variable with at least two stages at random, draws
/// [`samples`][SearchOptions::samples] random pairs of its stages, and commits the best of those
/// merges if it improves the score. Iterations that commit nothing still count towards
/// [`max_iter`][SearchOptions::max_iter]. The search converges once every variable is down to a
/// single stage. The same [`seed`][SearchOptions::seed] always gives the same result.
pub fn random_backward_hill_climb<O: Observer + ?Sized>(
    model: StagedTree,
    options: &SearchOptions,
    observer: &mut O,
) -> Result<SearchOutcome> {
    let mut search = Search::new("bhcr", model, options, observer)?;
    let mut rng = StdRng::seed_from_u64(options.seed);
    for _ in 0..options.max_iter {
        let mut eligible = Vec::new();
        for variable in 0..search.model.tree().len() {
            let stages = search.candidates(variable)?;
            if stages.len() > 1 {
                eligible.push((variable, stages));
            }
        }
        if eligible.is_empty() {
            return Ok(search.finish(true));
        }

        let (variable, stages) = &eligible[rng.gen_range(0..eligible.len())];
        let labels = search.model.stages().labels(*variable).to_vec();
        let mut best = None;
        for _ in 0..options.samples.max(1) {
            let first = rng.gen_range(0..stages.len());
            let mut second = rng.gen_range(0..stages.len() - 1);
            if second >= first {
                second += 1;
            }
            let (keep, drop) = (&stages[first.min(second)], &stages[first.max(second)]);
            let (score, proposal) = search.try_labels(*variable, merged(&labels, keep, drop))?;
            if beats(&best, score) {
                best = Some(Candidate {
                    variable: *variable,
                    labels: proposal,
                    action: Action::Merge {
                        variable: *variable,
                        keep: keep.clone(),
                        drop: drop.clone(),
                    },
                    score,
                });
            }
        }
        search.commit_if_better(best)?;
    }
    Ok(search.finish(false))
}

/// Hierarchical clustering of each variable's stages.
///
/// For every variable in turn, the stage distributions are clustered agglomeratively with
/// [`linkage`][SearchOptions::linkage] over [`distance`][SearchOptions::distance]. Every level of
/// the resulting dendrogram is scored, and the best one replaces the variable's stages if it
/// improves the score. [`max_iter`][SearchOptions::max_iter] bounds how many variables change.
pub fn hclust<O: Observer + ?Sized>(
    model: StagedTree,
    options: &SearchOptions,
    observer: &mut O,
) -> Result<SearchOutcome> {
    let mut search = Search::new("hclust", model, options, observer)?;
    for variable in 0..search.model.tree().len() {
        if search.exhausted() {
            return Ok(search.finish(false));
        }
        let distributions = search.distributions(variable)?;
        if distributions.len() < 2 {
            continue;
        }
        let matrix = DistanceMatrix::new(&distributions, options.distance)?;
        let dendrogram = hierarchical_clustering(&matrix, options.linkage);
        let mut best = None;
        for steps in 1..matrix.len() {
            search.try_partition(variable, matrix.labels(), &dendrogram.after(steps), &mut best)?;
        }
        search.commit_if_better(best)?;
    }
    Ok(search.finish(true))
}

fn squared_distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

fn nearest(point: &[f64], centers: &[Vec<f64>]) -> usize {
    let mut best = (0, f64::INFINITY);
    for (c, center) in centers.iter().enumerate() {
        let d = squared_distance(point, center);
        if d < best.1 {
            best = (c, d);
        }
    }
    best.0
}

/// One run of Lloyd's algorithm from `k` distinct random points. Returns the within-cluster sum
/// of squares and each point's cluster.
fn lloyd(points: &[&[f64]], k: usize, rng: &mut StdRng) -> (f64, Vec<usize>) {
    let mut centers: Vec<Vec<f64>> = rand::seq::index::sample(rng, points.len(), k)
        .into_vec()
        .into_iter()
        .map(|i| points[i].to_vec())
        .collect();
    let mut assignment = vec![usize::MAX; points.len()];

    for _ in 0..LLOYD_ROUNDS {
        let mut changed = false;
        for (point, cluster) in points.iter().zip(assignment.iter_mut()) {
            let closest = nearest(point, &centers);
            if *cluster != closest {
                *cluster = closest;
                changed = true;
            }
        }
        if !changed {
            break;
        }
        for (c, center) in centers.iter_mut().enumerate() {
            let members: Vec<&[f64]> = points
                .iter()
                .zip(&assignment)
                .filter(|(_, cluster)| **cluster == c)
                .map(|(point, _)| *point)
                .collect();
            if members.is_empty() {
                continue;
            }
            for (d, coordinate) in center.iter_mut().enumerate() {
                let sum: f64 = members.iter().map(|point| point[d]).sum();
                *coordinate = sum / members.len() as f64;
            }
        }
    }

    let within = points
        .iter()
        .zip(&assignment)
        .map(|(point, cluster)| squared_distance(point, &centers[*cluster]))
        .sum();
    (within, assignment)
}

/// K-means clustering of each variable's stages.
///
/// For every variable with more than [`clusters`][SearchOptions::clusters] stages, the stage
/// distributions are clustered by k-means, keeping the best of
/// [`restarts`][SearchOptions::restarts] seeded random starts. The clustering replaces the
/// variable's stages if it improves the score. [`max_iter`][SearchOptions::max_iter] bounds how
/// many variables change.
pub fn kmeans<O: Observer + ?Sized>(
    model: StagedTree,
    options: &SearchOptions,
    observer: &mut O,
) -> Result<SearchOutcome> {
    let mut search = Search::new("kmeans", model, options, observer)?;
    let mut rng = StdRng::seed_from_u64(options.seed);
    let k = options.clusters.max(1);
    for variable in 0..search.model.tree().len() {
        if search.exhausted() {
            return Ok(search.finish(false));
        }
        let distributions = search.distributions(variable)?;
        if distributions.len() <= k {
            continue;
        }
        let points: Vec<&[f64]> = distributions
            .iter()
            .map(|(_, probabilities)| probabilities.as_slice())
            .collect();

        let mut clustering: Option<(f64, Vec<usize>)> = None;
        for _ in 0..options.restarts.max(1) {
            let (within, assignment) = lloyd(&points, k, &mut rng);
            if clustering.as_ref().map_or(true, |(best, _)| within < *best) {
                clustering = Some((within, assignment));
            }
        }
        let assignment = match clustering {
            Some((_, assignment)) => assignment,
            None => continue,
        };

        let groups: Vec<Vec<usize>> = (0..k)
            .map(|c| (0..points.len()).filter(|p| assignment[*p] == c).collect())
            .filter(|group: &Vec<usize>| !group.is_empty())
            .collect();
        let stages: Vec<String> = distributions.into_iter().map(|(label, _)| label).collect();
        let mut best = None;
        search.try_partition(variable, &stages, &groups, &mut best)?;
        search.commit_if_better(best)?;
    }
    Ok(search.finish(true))
}

/// Binary join: a divisive search built on
/// [`simple_clustering`][crate::distance::simple_clustering].
///
/// For every variable, all of its stages start out merged into one group. Groups are then split
/// in two, first in first out, and each split is kept only if it improves the score over the
/// groups so far. When no group can be split usefully, the result replaces the variable's stages
/// if it beats them; otherwise the variable keeps the stages it had.
/// [`max_iter`][SearchOptions::max_iter] bounds the splits kept for each variable.
pub fn binary_join<O: Observer + ?Sized>(
    model: StagedTree,
    options: &SearchOptions,
    observer: &mut O,
) -> Result<SearchOutcome> {
    let mut search = Search::new("bj", model, options, observer)?;
    let mut capped = false;
    for variable in 0..search.model.tree().len() {
        let distributions = search.distributions(variable)?;
        if distributions.len() < 2 {
            continue;
        }
        let matrix = DistanceMatrix::new(&distributions, options.distance)?;
        let stages = matrix.labels();

        let mut groups = vec![(0..matrix.len()).collect::<Vec<usize>>()];
        let mut current = None;
        search.try_partition(variable, stages, &groups, &mut current)?;
        let mut queue = VecDeque::from(vec![0]);
        let mut splits = 0;

        while let Some(at) = queue.pop_front() {
            if groups[at].len() < 2 {
                continue;
            }
            if splits >= options.max_iter {
                capped = true;
                break;
            }
            let (first, second) = bisect(&matrix.select(&groups[at]));
            let mut proposal = groups.clone();
            proposal[at] = first.iter().map(|row| groups[at][*row]).collect();
            proposal.push(second.iter().map(|row| groups[at][*row]).collect());

            let mut candidate = None;
            search.try_partition(variable, stages, &proposal, &mut candidate)?;
            let improves = match (&candidate, &current) {
                (Some(candidate), Some(current)) => candidate.score > current.score + TOLERANCE,
                _ => false,
            };
            if improves {
                groups = proposal;
                current = candidate;
                queue.push_back(at);
                queue.push_back(groups.len() - 1);
                splits += 1;
            }
        }
        search.commit_if_better(current)?;
    }
    Ok(search.finish(!capped))
}

/// Puts every stage that no observation reached into a stage called `name`, and returns the
/// result. The log-likelihood does not change.
pub fn join_zero_counts(mut model: StagedTree, name: &str) -> Result<StagedTree> {
    model.join_zero_counts(name)?;
    debug!(name, "joined zero-count stages");
    Ok(model)
}

/// Collapses every variable to a single stage, giving the independence model with the fitted
/// counts kept.
pub fn naive(mut model: StagedTree) -> StagedTree {
    model.collapse_stages();
    debug!("collapsed every variable to one stage");
    model
}
