use stagedtrees::distance::{Distance, Linkage};
use stagedtrees::search::*;
use stagedtrees::{Result, Score, StagedTree};

mod common;
use common::{assert_close, assert_normalized, saturated};

macro_rules! check_algorithm {
    ($($name:ident => $search:path,)*) => {
        $(
        #[test]
        fn $name() {
            check(|model, options| $search(model, options, &mut Silent));
        }
        )*
    }
}

check_algorithm! {
    hc => hill_climb,
    bhc => backward_hill_climb,
    fbhc => fast_backward_hill_climb,
    bhcr => random_backward_hill_climb,
    hclust_search => hclust,
    kmeans_search => kmeans,
    bj => binary_join,
}

fn check(search: impl Fn(StagedTree, &SearchOptions) -> Result<SearchOutcome>) {
    for lambda in vec![0.0, 1.0] {
        for score in vec![Score::Bic, Score::Aic, Score::Penalized(4.0)] {
            let start = saturated(lambda);
            let initial = score.evaluate(&start).unwrap();
            let options = SearchOptions::default().with_score(score).with_seed(42);
            let outcome = search(start, &options).unwrap();
            let model = &outcome.model;

            assert_close(
                model.recompute_log_likelihood().unwrap(),
                model.log_likelihood().unwrap(),
            );
            assert_normalized(model);

            assert_close(outcome.trajectory[0], initial);
            for pair in outcome.trajectory.windows(2) {
                assert!(pair[1] > pair[0], "score went from {} to {}", pair[0], pair[1]);
            }
            assert_close(outcome.score(), score.evaluate(model).unwrap());
            assert!(matches!(
                outcome.state,
                SearchState::Converged | SearchState::MaxIterationsReached
            ));
        }
    }
}

#[test]
fn bhc_with_five_iterations() {
    let start = saturated(0.0);
    let saturated_score = Score::Bic.evaluate(&start).unwrap();
    let options = SearchOptions::default().with_max_iter(5);

    let outcome = backward_hill_climb(start.clone(), &options, &mut Silent).unwrap();
    assert_eq!(outcome.iterations(), 5);
    assert_eq!(outcome.state, SearchState::MaxIterationsReached);
    assert!(outcome.score() >= saturated_score);
    assert!(outcome.model.degrees_of_freedom() < start.degrees_of_freedom());
    assert_close(
        outcome.model.recompute_log_likelihood().unwrap(),
        outcome.model.log_likelihood().unwrap(),
    );
}

#[test]
fn zero_iterations_changes_nothing() {
    let start = saturated(0.0);
    let options = SearchOptions::default().with_max_iter(0);
    let outcome = hill_climb(start.clone(), &options, &mut Silent).unwrap();
    assert_eq!(outcome.iterations(), 0);
    assert_eq!(outcome.state, SearchState::MaxIterationsReached);
    assert_eq!(outcome.model.stages(), start.stages());
}

#[test]
fn observer_sees_every_commit() {
    let mut seen = Vec::new();
    let outcome = backward_hill_climb(
        saturated(0.0),
        &SearchOptions::default(),
        &mut |iteration: usize, action: &Action, score: f64| {
            assert!(matches!(action, Action::Merge { .. }));
            seen.push((iteration, score));
        },
    )
    .unwrap();

    assert_eq!(seen.len(), outcome.iterations());
    for (n, (iteration, score)) in seen.into_iter().enumerate() {
        assert_eq!(iteration, n + 1);
        assert_eq!(score, outcome.trajectory[n + 1]);
    }
}

#[test]
fn observer_does_not_change_the_result() {
    let options = SearchOptions::default();
    let quiet = hill_climb(saturated(1.0), &options, &mut Silent).unwrap();
    let mut calls = 0;
    let watched = hill_climb(saturated(1.0), &options, &mut |_: usize, _: &Action, _: f64| {
        calls += 1
    })
    .unwrap();
    assert_eq!(quiet.model.stages(), watched.model.stages());
    assert_eq!(quiet.trajectory, watched.trajectory);
    assert_eq!(calls, watched.iterations());
}

#[test]
fn searches_never_touch_the_unobserved_stage() {
    let start = saturated(0.0);
    let unobserved = start.unobserved_label().to_string();
    let articles = start.tree().index_of("Articles").unwrap();
    let before = start.stages().expanded(start.tree(), articles);

    let outcome = hill_climb(start, &SearchOptions::default(), &mut Silent).unwrap();
    let after = outcome
        .model
        .stages()
        .expanded(outcome.model.tree(), articles);
    for (old, new) in before.iter().zip(after.iter()) {
        assert_eq!(old == &unobserved, new == &unobserved);
    }
}

#[test]
fn random_search_is_reproducible() {
    let options = SearchOptions::default().with_seed(7).with_samples(3);
    let first = random_backward_hill_climb(saturated(0.0), &options, &mut Silent).unwrap();
    let second = random_backward_hill_climb(saturated(0.0), &options, &mut Silent).unwrap();
    assert_eq!(first.trajectory, second.trajectory);
    assert!(first.model.compare_stages(&second.model));
}

#[test]
fn clustering_options() {
    for linkage in vec![Linkage::Single, Linkage::Complete, Linkage::Average] {
        for distance in Distance::ALL.iter() {
            let options = SearchOptions::default()
                .with_linkage(linkage)
                .with_distance(*distance);
            let start = saturated(1.0);
            let initial = Score::Bic.evaluate(&start).unwrap();
            let outcome = hclust(start, &options, &mut Silent).unwrap();
            assert!(outcome.score() >= initial);
            assert_normalized(&outcome.model);
        }
    }

    for clusters in 1..4 {
        let options = SearchOptions::default()
            .with_clusters(clusters)
            .with_restarts(3);
        let outcome = kmeans(saturated(1.0), &options, &mut Silent).unwrap();
        for variable in 0..outcome.model.tree().len() {
            let positions = outcome.model.tree().positions(variable);
            let stages = outcome.model.stages().distinct(variable).len();
            assert!(stages == positions || stages <= clusters);
        }
    }
}

#[test]
fn binary_join_keeps_better_stages() {
    // Scoring by log-likelihood alone, nothing beats the saturated model, so no variable may
    // end up with fewer stages than it started with.
    let start = saturated(0.0);
    let options = SearchOptions::default().with_score(Score::LogLikelihood);
    let outcome = binary_join(start.clone(), &options, &mut Silent).unwrap();
    assert_eq!(outcome.iterations(), 0);
    assert!(outcome.model.compare_stages(&start));
}

#[test]
fn naive_collapses_to_independence() {
    let model = naive(saturated(1.0));
    let independent = StagedTree::independent(model.tree().clone());
    assert!(model.compare_stages(&independent));
    assert_normalized(&model);
}

#[test]
fn join_zero_counts_preserves_log_likelihood() {
    for lambda in vec![0.0, 1.0] {
        let start = saturated(lambda);
        let before = start.log_likelihood().unwrap();
        let model = join_zero_counts(start, "empty").unwrap();
        assert_eq!(model.log_likelihood().unwrap(), before);

        let articles = model.tree().index_of("Articles").unwrap();
        let empty: Vec<_> = model
            .estimates(articles)
            .unwrap()
            .iter()
            .filter(|estimate| estimate.total() == 0.0)
            .map(|estimate| estimate.label.as_str())
            .collect();
        assert_eq!(empty, ["empty"]);
    }
}
