#![allow(dead_code)]

use stagedtrees::{JointTable, StagedTree, Tree};

/// Publication counts of doctoral students by gender, whether they have young children, whether
/// they are married, and how many articles they published. Two contexts for the article count
/// have no observations at all.
pub fn articles() -> JointTable {
    let tree = Tree::new(vec![
        ("Gender", vec!["female", "male"]),
        ("Kids", vec!["no", "yes"]),
        ("Married", vec!["no", "yes"]),
        ("Articles", vec!["0", "1-2", "3+"]),
    ])
    .unwrap();
    #[rustfmt::skip]
    let counts = vec![
        20.0, 15.0,  5.0, // female, no kids, unmarried
        18.0, 14.0,  6.0, // female, no kids, married
         0.0,  0.0,  0.0, // female, kids, unmarried
        12.0,  9.0,  3.0, // female, kids, married
        25.0, 20.0, 10.0, // male, no kids, unmarried
        22.0, 21.0, 11.0, // male, no kids, married
         0.0,  0.0,  0.0, // male, kids, unmarried
        15.0, 18.0, 12.0, // male, kids, married
    ];
    JointTable::new(tree, counts).unwrap()
}

pub fn saturated(lambda: f64) -> StagedTree {
    let data = articles();
    let mut model = StagedTree::full(data.tree().clone());
    model.fit(&data, lambda).unwrap();
    model
}

pub fn assert_close(actual: f64, expected: f64) {
    assert!(
        (actual - expected).abs() <= 1e-9 * expected.abs().max(1.0),
        "{} != {}",
        actual,
        expected
    );
}

/// Every fitted distribution is a probability vector.
pub fn assert_normalized(model: &StagedTree) {
    for variable in 0..model.tree().len() {
        for estimate in model.estimates(variable).unwrap() {
            assert!(estimate.probabilities.iter().all(|p| *p >= 0.0));
            assert_close(estimate.probabilities.iter().sum(), 1.0);
        }
    }
}
