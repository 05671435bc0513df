use stagedtrees::search::{backward_hill_climb, SearchOptions, Silent};
use stagedtrees::{lr_test, Error, JointTable, Records, Score, StageTable, StagedTree, Tree};

mod common;
use common::{articles, assert_close, assert_normalized, saturated};

fn all_paths(tree: &Tree) -> Vec<Vec<String>> {
    let mut paths = vec![Vec::new()];
    for variable in 0..tree.len() {
        let mut longer = Vec::new();
        for path in paths {
            for level in tree.levels(variable) {
                let mut path: Vec<String> = path.clone();
                path.push(level.clone());
                longer.push(path);
            }
        }
        paths = longer;
    }
    paths
}

#[test]
fn label_counts() {
    let tree = articles().tree().clone();
    let independent = StageTable::independent(&tree);
    let full = StageTable::full(&tree);
    for variable in 0..tree.len() {
        assert_eq!(independent.distinct(variable).len(), 1);
        assert_eq!(full.distinct(variable).len(), tree.positions(variable));
    }
    assert_eq!(
        (0..tree.len()).map(|v| tree.positions(v)).collect::<Vec<_>>(),
        [1, 2, 4, 8]
    );
}

#[test]
fn saturated_fit() {
    let model = saturated(0.0);
    assert_eq!(model.sample_size().unwrap(), 256.0);
    assert_normalized(&model);
    assert_close(
        model.recompute_log_likelihood().unwrap(),
        model.log_likelihood().unwrap(),
    );

    // The two empty contexts share the unobserved stage and cost no parameters.
    let articles = model.tree().index_of("Articles").unwrap();
    let stages = model.stages().expanded(model.tree(), articles);
    assert_eq!(stages[2], model.unobserved_label());
    assert_eq!(stages[6], model.unobserved_label());
    assert_eq!(model.degrees_of_freedom(), 1 + 2 + 4 + 6 * 2);

    let probabilities = model
        .stage_probabilities(articles, model.unobserved_label())
        .unwrap();
    for p in probabilities {
        assert_close(*p, 1.0 / 3.0);
    }
}

#[test]
fn smoothing_keeps_every_context_observed() {
    let model = saturated(1.0);
    let articles = model.tree().index_of("Articles").unwrap();
    assert!(model
        .stages()
        .distinct(articles)
        .iter()
        .all(|label| *label != model.unobserved_label()));
    assert_eq!(model.degrees_of_freedom(), 1 + 2 + 4 + 8 * 2);
    assert_eq!(
        model.stage_probabilities(1, "1").unwrap(),
        [79.0 / 104.0, 25.0 / 104.0]
    );
    assert_normalized(&model);
}

#[test]
fn log_likelihood_by_hand() {
    let data = articles();
    let mut model = StagedTree::independent(data.tree().clone());
    model.fit(&data, 0.0).unwrap();

    // With one stage per variable the log-likelihood is the sum of the marginal ones.
    let n = 256.0f64;
    let marginal = |counts: &[f64]| -> f64 {
        counts
            .iter()
            .filter(|c| **c > 0.0)
            .map(|c| c * (c / n).ln())
            .sum()
    };
    let expected = marginal(&[102.0, 154.0])
        + marginal(&[187.0, 69.0])
        + marginal(&[95.0, 161.0])
        + marginal(&[112.0, 97.0, 47.0]);
    assert_close(model.log_likelihood().unwrap(), expected);
    assert_eq!(model.degrees_of_freedom(), 1 + 1 + 1 + 2);
}

#[test]
fn records_and_joint_tables_agree() {
    let table = articles();
    let tree = table.tree().clone();
    let mut records = Records::new(vec!["Articles", "Married", "Kids", "Gender"]);
    for (path, count) in all_paths(&tree).into_iter().zip(table.counts().iter()) {
        if *count > 0.0 {
            let reversed: Vec<&str> = path.iter().rev().map(String::as_str).collect();
            records.push_weighted(reversed, *count).unwrap();
        }
    }

    let mut from_table = StagedTree::full(tree.clone());
    from_table.fit(&table, 0.0).unwrap();
    let mut from_records = StagedTree::full(tree);
    from_records.fit(&records, 0.0).unwrap();

    assert_eq!(from_table.counts().unwrap(), from_records.counts().unwrap());
    assert_eq!(
        from_table.log_likelihood().unwrap(),
        from_records.log_likelihood().unwrap()
    );
}

#[test]
fn path_probabilities() {
    let model = saturated(1.0);
    let tree = model.tree().clone();
    let total: f64 = all_paths(&tree)
        .iter()
        .map(|path| model.prob(path).unwrap())
        .sum();
    assert_close(total, 1.0);

    // A prefix is as likely as all its extensions together.
    let prefix = model.prob(&["male", "yes"]).unwrap();
    let extensions: f64 = all_paths(&tree)
        .iter()
        .filter(|path| path[0] == "male" && path[1] == "yes")
        .map(|path| model.prob(path).unwrap())
        .sum();
    assert_close(prefix, extensions);
    assert_eq!(model.prob::<&str>(&[]).unwrap(), 1.0);
}

#[test]
fn prediction() {
    let model = saturated(0.0);
    assert_eq!(
        model
            .predict("Articles", &["male", "yes", "yes", "?"])
            .unwrap(),
        "1-2"
    );
    assert_eq!(
        model.predict("Married", &["female", "yes", "?", "0"]).unwrap(),
        "yes"
    );
    assert!(matches!(
        model.predict("Articles", &["male", "yes"]),
        Err(Error::InvalidRecord { .. })
    ));
    assert!(matches!(
        model.predict("Salary", &["male", "yes", "yes", "0"]),
        Err(Error::UnknownVariable(_))
    ));
}

#[test]
fn likelihood_ratio_test() {
    let richer = saturated(0.0);
    let mut simpler = StagedTree::independent(richer.tree().clone());
    simpler.fit(&articles(), 0.0).unwrap();

    let alpha = lr_test(&simpler, &richer).unwrap();
    assert!((0.0..=1.0).contains(&alpha));
    assert_eq!(lr_test(&richer, &richer).unwrap(), 1.0);
}

#[test]
fn scores_agree_with_criteria() {
    let model = saturated(0.0);
    assert_close(Score::Aic.evaluate(&model).unwrap(), -model.aic().unwrap());
    assert_close(Score::Bic.evaluate(&model).unwrap(), -model.bic().unwrap());
    assert_close(
        Score::Penalized(2.0).evaluate(&model).unwrap(),
        -model.aic().unwrap(),
    );
    assert_close(
        Score::LogLikelihood.evaluate(&model).unwrap(),
        model.log_likelihood().unwrap(),
    );
}

#[test]
fn stage_edits() {
    let mut model = saturated(1.0);
    let articles = model.tree().index_of("Articles").unwrap();
    let before = model.log_likelihood().unwrap();

    model.merge_stages(articles, "1", "2").unwrap();
    assert!(model.log_likelihood().unwrap() <= before);
    let merged = model.clone();

    // Splitting the second context back out reuses the freed label and undoes the merge.
    assert_eq!(model.split_stage(articles, 2).unwrap(), "2");
    assert_eq!(model.log_likelihood().unwrap(), before);
    model.merge_stages(articles, "1", "1").unwrap();
    assert_eq!(model.stages(), saturated(1.0).stages());

    let mut model = merged.clone();
    model.relabel_stages();
    assert!(model.compare_stages(&merged));
    assert_eq!(model.stages().distinct(articles), ["1", "2", "3", "4", "5", "6", "7"]);

    let previous = model
        .assign_stages(articles, vec!["a".to_string(); 8])
        .unwrap();
    assert_eq!(previous.len(), 8);
    assert!(!model.compare_stages(&merged));
    assert!(matches!(
        model.assign_stages(articles, vec!["a".to_string(); 3]),
        Err(Error::BadStageAssignment { .. })
    ));
    assert!(matches!(
        model.merge_stages(articles, "a", "b"),
        Err(Error::BadStageAssignment { .. })
    ));

    model.collapse_stages();
    let independent = StagedTree::independent(model.tree().clone());
    assert!(model.compare_stages(&independent));
}

#[test]
fn errors() {
    let data = articles();
    let model = StagedTree::full(data.tree().clone());
    assert_eq!(model.log_likelihood(), Err(Error::UnfittedModel));
    assert_eq!(Score::Bic.evaluate(&model), Err(Error::UnfittedModel));

    let mut model = model;
    assert_eq!(model.fit(&data, -1.0), Err(Error::InvalidSmoothing(-1.0)));

    let mut records = Records::new(vec!["Gender", "Kids"]);
    records.push(vec!["male", "no"]).unwrap();
    assert_eq!(
        model.fit(&records, 0.0),
        Err(Error::MissingData("Married".to_string()))
    );
    assert!(matches!(
        records.push(vec!["male"]),
        Err(Error::InvalidRecord {
            expected: 2,
            found: 1
        })
    ));

    let mut records = Records::new(vec!["Gender", "Kids", "Married", "Articles"]);
    records.push(vec!["male", "no", "no", "many"]).unwrap();
    assert!(matches!(
        model.fit(&records, 0.0),
        Err(Error::InvalidPath { .. })
    ));
}

fn two_by_two() -> Tree {
    Tree::new(vec![("a", vec!["x", "y"]), ("b", vec!["1", "2"])]).unwrap()
}

#[test]
fn refit_releases_contexts_that_gained_data() {
    let tree = two_by_two();
    let sparse = JointTable::new(tree.clone(), vec![10.0, 5.0, 0.0, 0.0]).unwrap();
    let dense = JointTable::new(tree.clone(), vec![10.0, 5.0, 1.0, 30.0]).unwrap();

    let mut model = StagedTree::full(tree.clone());
    model.fit(&sparse, 0.0).unwrap();
    assert_eq!(model.stages().labels(1)[1], model.unobserved_label());
    assert_eq!(model.degrees_of_freedom(), 2);

    model.fit(&dense, 0.0).unwrap();
    let mut fresh = StagedTree::full(tree);
    fresh.fit(&dense, 0.0).unwrap();
    assert!(model
        .stages()
        .labels(1)
        .iter()
        .all(|label| label != model.unobserved_label()));
    assert!(model.compare_stages(&fresh));
    assert_eq!(model.degrees_of_freedom(), 3);
    assert_close(model.bic().unwrap(), fresh.bic().unwrap());
    assert_normalized(&model);

    // Smoothing never tags contexts as unobserved, so a smoothed refit releases them too.
    let mut model = StagedTree::full(two_by_two());
    model.fit(&sparse, 0.0).unwrap();
    model.fit(&sparse, 1.0).unwrap();
    assert_eq!(model.stages().labels(1), ["1", "2"]);
    assert_eq!(model.degrees_of_freedom(), 3);
}

#[test]
fn refit_keeps_contexts_that_stay_empty() {
    let tree = two_by_two();
    let sparse = JointTable::new(tree.clone(), vec![10.0, 5.0, 0.0, 0.0]).unwrap();
    let mut model = StagedTree::full(tree);
    model.fit(&sparse, 0.0).unwrap();
    model.fit(&sparse, 0.0).unwrap();
    assert_eq!(model.stages().labels(1)[0], "1");
    assert_eq!(model.stages().labels(1)[1], model.unobserved_label());
    assert_eq!(model.degrees_of_freedom(), 2);
}

#[test]
fn mismatched_levels_and_names() {
    let declared = two_by_two();
    let reordered = Tree::new(vec![("a", vec!["y", "x"]), ("b", vec!["1", "2"])]).unwrap();
    let data = JointTable::new(reordered, vec![1.0, 2.0, 3.0, 4.0]).unwrap();
    let mut model = StagedTree::full(declared);
    assert!(matches!(
        model.fit(&data, 0.0),
        Err(Error::InvalidLevels { .. })
    ));
    assert_eq!(model.log_likelihood(), Err(Error::UnfittedModel));

    assert!(matches!(
        Tree::new(vec![("a", vec!["x"]), ("a", vec!["y"])]),
        Err(Error::InvalidLevels { .. })
    ));
}

#[test]
fn custom_unobserved_label() {
    let tree = two_by_two();
    let sparse = JointTable::new(tree.clone(), vec![10.0, 5.0, 0.0, 0.0]).unwrap();
    let mut model = StagedTree::full(tree.clone()).with_unobserved_label("empty");
    model.fit(&sparse, 0.0).unwrap();
    assert_eq!(model.unobserved_label(), "empty");
    assert_eq!(model.stages().expanded(&tree, 1), ["1", "empty"]);
    assert_eq!(model.degrees_of_freedom(), 2);
    for p in model.stage_probabilities(1, "empty").unwrap() {
        assert_close(*p, 0.5);
    }
}

#[test]
fn bic_needs_observations() {
    let tree = two_by_two();
    let mut model = StagedTree::full(tree.clone());
    model.fit(&JointTable::zeros(tree), 1.0).unwrap();
    assert_eq!(model.sample_size().unwrap(), 0.0);
    assert_eq!(model.bic(), Err(Error::EmptyData));
    assert_eq!(Score::Bic.evaluate(&model), Err(Error::EmptyData));
    assert!(model.aic().is_ok());
    assert_eq!(
        backward_hill_climb(model, &SearchOptions::default(), &mut Silent).map(|_| ()),
        Err(Error::EmptyData)
    );
}
