//! Distances between stage distributions, and the clustering routines built on them.
//!
//! Every function here takes two probability vectors over the same levels. Positions where both
//! vectors are exactly zero carry no information and are skipped. Where only one of them is zero,
//! the divergences that take a ratio (Kullback-Leibler, Rényi, Chan-Darwiche) are infinite; the
//! others stay finite.

use crate::{Error, Result};

fn check(p: &[f64], q: &[f64]) -> Result<()> {
    if p.len() == q.len() {
        Ok(())
    } else {
        Err(Error::DegenerateDistance {
            left: p.len(),
            right: q.len(),
        })
    }
}

/// Pairs of entries from `p` and `q`, without the positions where both are zero.
fn support<'a>(p: &'a [f64], q: &'a [f64]) -> impl Iterator<Item = (f64, f64)> + 'a {
    p.iter()
        .copied()
        .zip(q.iter().copied())
        .filter(|(x, y)| *x != 0.0 || *y != 0.0)
}

/// The Manhattan distance, `Σ |p - q|`.
pub fn l1(p: &[f64], q: &[f64]) -> Result<f64> {
    check(p, q)?;
    Ok(support(p, q).map(|(x, y)| (x - y).abs()).sum())
}

/// The Euclidean distance, `sqrt(Σ (p - q)²)`.
pub fn l2(p: &[f64], q: &[f64]) -> Result<f64> {
    check(p, q)?;
    Ok(support(p, q).map(|(x, y)| (x - y) * (x - y)).sum::<f64>().sqrt())
}

/// Total variation, which this crate defines to be the same as [`l1`].
pub fn total_variation(p: &[f64], q: &[f64]) -> Result<f64> {
    l1(p, q)
}

fn kl_term(x: f64, y: f64) -> f64 {
    if x == 0.0 {
        0.0
    } else if y == 0.0 {
        f64::INFINITY
    } else {
        x * (x / y).ln()
    }
}

/// The symmetrized Kullback-Leibler divergence, `KL(p || q) + KL(q || p)`.
///
/// ```
/// use stagedtrees::distance::kullback_leibler;
///
/// assert_eq!(kullback_leibler(&[0.5, 0.5], &[0.5, 0.5])?, 0.0);
/// assert!(kullback_leibler(&[0.5, 0.5], &[1.0, 0.0])?.is_infinite());
/// assert!(kullback_leibler(&[0.5, 0.5], &[1.0]).is_err());
/// # Ok::<(), stagedtrees::Error>(())
/// ```
pub fn kullback_leibler(p: &[f64], q: &[f64]) -> Result<f64> {
    check(p, q)?;
    Ok(support(p, q).map(|(x, y)| kl_term(x, y) + kl_term(y, x)).sum())
}

fn renyi2(p: &[f64], q: &[f64]) -> f64 {
    let sum: f64 = support(p, q)
        .map(|(x, y)| {
            if x == 0.0 {
                0.0
            } else if y == 0.0 {
                f64::INFINITY
            } else {
                x * x / y
            }
        })
        .sum();
    sum.ln().max(0.0)
}

/// The symmetrized Rényi divergence of order 2, `D₂(p || q) + D₂(q || p)` where
/// `D₂(p || q) = ln Σ p² / q`.
pub fn renyi(p: &[f64], q: &[f64]) -> Result<f64> {
    check(p, q)?;
    Ok(renyi2(p, q) + renyi2(q, p))
}

/// The squared Hellinger distance, `½ Σ (√p - √q)²`, which lies between 0 and 1.
pub fn hellinger(p: &[f64], q: &[f64]) -> Result<f64> {
    check(p, q)?;
    let sum: f64 = support(p, q)
        .map(|(x, y)| {
            let d = x.sqrt() - y.sqrt();
            d * d
        })
        .sum();
    Ok(sum / 2.0)
}

/// The Bhattacharyya distance, `-ln Σ √(p q)`. It is zero when `p = q` and infinite when the two
/// distributions share no support.
pub fn bhattacharyya(p: &[f64], q: &[f64]) -> Result<f64> {
    check(p, q)?;
    let coefficient: f64 = support(p, q).map(|(x, y)| (x * y).sqrt()).sum();
    Ok((-coefficient.ln()).max(0.0))
}

/// The Chan-Darwiche distance, `ln max(q / p) - ln min(q / p)`.
///
/// It is zero exactly when `p = q`, and infinite if one vector is zero somewhere the other isn't.
///
/// ```
/// use stagedtrees::distance::chan_darwiche;
///
/// assert_eq!(chan_darwiche(&[0.25, 0.75], &[0.25, 0.75])?, 0.0);
/// assert!((chan_darwiche(&[0.5, 0.5], &[0.25, 0.75])? - 3f64.ln()).abs() < 1e-12);
/// # Ok::<(), stagedtrees::Error>(())
/// ```
pub fn chan_darwiche(p: &[f64], q: &[f64]) -> Result<f64> {
    check(p, q)?;
    let mut max = f64::NEG_INFINITY;
    let mut min = f64::INFINITY;
    for (x, y) in support(p, q) {
        if x == 0.0 || y == 0.0 {
            return Ok(f64::INFINITY);
        }
        let ratio = (y / x).ln();
        max = max.max(ratio);
        min = min.min(ratio);
    }
    if max < min {
        // No support at all.
        return Ok(0.0);
    }
    Ok(max - min)
}

/// A choice among the distance functions in this module.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Distance {
    /// [`l1`]
    L1,
    /// [`l2`]
    L2,
    /// [`kullback_leibler`]
    KullbackLeibler,
    /// [`renyi`]
    Renyi,
    /// [`total_variation`]
    TotalVariation,
    /// [`hellinger`]
    Hellinger,
    /// [`bhattacharyya`]
    Bhattacharyya,
    /// [`chan_darwiche`]
    ChanDarwiche,
}

impl Distance {
    /// Every distance, for iterating over them.
    pub const ALL: [Distance; 8] = [
        Distance::L1,
        Distance::L2,
        Distance::KullbackLeibler,
        Distance::Renyi,
        Distance::TotalVariation,
        Distance::Hellinger,
        Distance::Bhattacharyya,
        Distance::ChanDarwiche,
    ];

    /// Computes this distance between `p` and `q`.
    pub fn compute(self, p: &[f64], q: &[f64]) -> Result<f64> {
        match self {
            Distance::L1 => l1(p, q),
            Distance::L2 => l2(p, q),
            Distance::KullbackLeibler => kullback_leibler(p, q),
            Distance::Renyi => renyi(p, q),
            Distance::TotalVariation => total_variation(p, q),
            Distance::Hellinger => hellinger(p, q),
            Distance::Bhattacharyya => bhattacharyya(p, q),
            Distance::ChanDarwiche => chan_darwiche(p, q),
        }
    }
}

impl Default for Distance {
    fn default() -> Self {
        Distance::KullbackLeibler
    }
}

/// Pairwise distances between labeled stages.
#[derive(Clone, Debug, PartialEq)]
pub struct DistanceMatrix {
    labels: Vec<String>,
    values: Vec<f64>,
}

impl DistanceMatrix {
    /// Computes the distance between every pair of `(label, probabilities)` stages.
    ///
    /// Only the lower triangle is computed; the diagonal is zero and the upper triangle mirrors
    /// the lower.
    pub fn new<S, P>(stages: &[(S, P)], distance: Distance) -> Result<Self>
    where
        S: AsRef<str>,
        P: AsRef<[f64]>,
    {
        let n = stages.len();
        let mut values = vec![0.0; n * n];
        for i in 0..n {
            for j in 0..i {
                let d = distance.compute(stages[i].1.as_ref(), stages[j].1.as_ref())?;
                values[i * n + j] = d;
                values[j * n + i] = d;
            }
        }
        Ok(DistanceMatrix {
            labels: stages
                .iter()
                .map(|(label, _)| label.as_ref().to_owned())
                .collect(),
            values,
        })
    }

    /// The number of stages.
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    /// Returns `true` if there are no stages.
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// The stage labels, in row order.
    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// The distance between the stages in rows `i` and `j`.
    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.values[i * self.len() + j]
    }

    /// The matrix restricted to the given rows, in the given order.
    pub fn select(&self, rows: &[usize]) -> DistanceMatrix {
        DistanceMatrix {
            labels: rows.iter().map(|row| self.labels[*row].clone()).collect(),
            values: rows
                .iter()
                .flat_map(|i| rows.iter().map(move |j| self.get(*i, *j)))
                .collect(),
        }
    }
}

/// Splits the stages of a distance matrix into two clusters.
///
/// The two stages furthest apart seed the clusters: the first pair found scanning the matrix
/// column by column. Every other stage joins the first seed's cluster if it is strictly closer to
/// that seed, and the second seed's cluster otherwise, so exact ties go to the second cluster.
///
/// With fewer than two stages, everything lands in the first cluster.
///
/// ```
/// use stagedtrees::distance::{simple_clustering, Distance, DistanceMatrix};
///
/// let stages = vec![
///     ("a", vec![0.9, 0.1]),
///     ("b", vec![0.1, 0.9]),
///     ("c", vec![0.8, 0.2]),
///     ("d", vec![0.2, 0.8]),
/// ];
/// let matrix = DistanceMatrix::new(&stages, Distance::L1)?;
/// let (first, second) = simple_clustering(&matrix);
/// assert_eq!(first, ["b", "d"]);
/// assert_eq!(second, ["a", "c"]);
/// # Ok::<(), stagedtrees::Error>(())
/// ```
pub fn simple_clustering(matrix: &DistanceMatrix) -> (Vec<String>, Vec<String>) {
    let (first, second) = bisect(matrix);
    let labels = |rows: Vec<usize>| -> Vec<String> {
        rows.into_iter()
            .map(|row| matrix.labels[row].clone())
            .collect()
    };
    (labels(first), labels(second))
}

/// [`simple_clustering`], but returning row indices instead of labels.
pub(crate) fn bisect(matrix: &DistanceMatrix) -> (Vec<usize>, Vec<usize>) {
    let n = matrix.len();
    if n < 2 {
        return ((0..n).collect(), Vec::new());
    }

    let (mut seed_i, mut seed_j) = (1, 0);
    let mut max = f64::NEG_INFINITY;
    for column in 0..n {
        for row in 0..n {
            if matrix.get(row, column) > max {
                max = matrix.get(row, column);
                seed_i = row;
                seed_j = column;
            }
        }
    }
    if seed_i == seed_j {
        // Every distance is zero, so the diagonal won. Any distinct pair is as good as another.
        seed_i = 1;
        seed_j = 0;
    }

    let mut first = Vec::new();
    let mut second = Vec::new();
    for k in 0..n {
        if k == seed_i || (k != seed_j && matrix.get(k, seed_i) < matrix.get(k, seed_j)) {
            first.push(k);
        } else {
            second.push(k);
        }
    }
    (first, second)
}

/// How [`hierarchical_clustering`] measures the distance between two clusters.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Linkage {
    /// The closest pair of members.
    Single,
    /// The furthest pair of members.
    Complete,
    /// The mean over all pairs of members.
    Average,
}

impl Default for Linkage {
    fn default() -> Self {
        Linkage::Complete
    }
}

/// The sequence of merges performed by agglomerative clustering.
#[derive(Clone, Debug, PartialEq)]
pub struct Dendrogram {
    size: usize,
    merges: Vec<(usize, usize, f64)>,
}

impl Dendrogram {
    /// Each merge as `(kept, absorbed, height)`, where the two clusters are named by their
    /// smallest member's row and `height` is the linkage distance at which they merged.
    pub fn merges(&self) -> &[(usize, usize, f64)] {
        &self.merges
    }

    /// The clusters left after the first `steps` merges, each a list of rows in ascending
    /// order, listed in order of their smallest row.
    pub fn after(&self, steps: usize) -> Vec<Vec<usize>> {
        let mut clusters: Vec<Option<Vec<usize>>> =
            (0..self.size).map(|row| Some(vec![row])).collect();
        for (kept, absorbed, _) in self.merges.iter().take(steps) {
            if let Some(mut members) = clusters[*absorbed].take() {
                if let Some(target) = clusters[*kept].as_mut() {
                    target.append(&mut members);
                    target.sort_unstable();
                }
            }
        }
        clusters.into_iter().flatten().collect()
    }

    /// The clusters left when the tree is cut into `k` groups (at least one).
    pub fn cut(&self, k: usize) -> Vec<Vec<usize>> {
        self.after(self.size.saturating_sub(k.max(1)))
    }
}

/// Agglomerative clustering: starting from one cluster per row, repeatedly merges the two closest
/// clusters until one remains. Ties go to the pair found first scanning rows in ascending order.
///
/// ```
/// use stagedtrees::distance::{hierarchical_clustering, Distance, DistanceMatrix, Linkage};
///
/// let stages = vec![("a", vec![0.9, 0.1]), ("b", vec![0.1, 0.9]), ("c", vec![0.85, 0.15])];
/// let matrix = DistanceMatrix::new(&stages, Distance::L1)?;
/// let dendrogram = hierarchical_clustering(&matrix, Linkage::Average);
/// assert_eq!(dendrogram.cut(2), [vec![0, 2], vec![1]]);
/// assert_eq!(dendrogram.cut(1), [vec![0, 1, 2]]);
/// # Ok::<(), stagedtrees::Error>(())
/// ```
pub fn hierarchical_clustering(matrix: &DistanceMatrix, linkage: Linkage) -> Dendrogram {
    let n = matrix.len();
    let mut clusters: Vec<Option<Vec<usize>>> = (0..n).map(|row| Some(vec![row])).collect();
    let mut merges = Vec::with_capacity(n.saturating_sub(1));

    let between = |a: &[usize], b: &[usize]| -> f64 {
        let pairs = a.iter().flat_map(|i| b.iter().map(move |j| matrix.get(*i, *j)));
        match linkage {
            Linkage::Single => pairs.fold(f64::INFINITY, f64::min),
            Linkage::Complete => pairs.fold(f64::NEG_INFINITY, f64::max),
            Linkage::Average => pairs.sum::<f64>() / (a.len() * b.len()) as f64,
        }
    };

    for _ in 1..n {
        let mut best: Option<(usize, usize, f64)> = None;
        for (a, members_a) in clusters.iter().enumerate() {
            let members_a = match members_a {
                Some(members) => members,
                None => continue,
            };
            for (b, members_b) in clusters.iter().enumerate().skip(a + 1) {
                let members_b = match members_b {
                    Some(members) => members,
                    None => continue,
                };
                let d = between(members_a, members_b);
                if best.map_or(true, |(_, _, height)| d < height) {
                    best = Some((a, b, d));
                }
            }
        }
        let (a, b, height) = match best {
            Some(best) => best,
            None => break,
        };
        if let Some(mut absorbed) = clusters[b].take() {
            if let Some(kept) = clusters[a].as_mut() {
                kept.append(&mut absorbed);
            }
        }
        merges.push((a, b, height));
    }

    Dendrogram { size: n, merges }
}
