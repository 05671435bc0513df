use proptest::prelude::*;
use stagedtrees::distance::Distance;
use stagedtrees::{tree_index, IndexMode, StageTable, Tree};
use std::collections::BTreeSet;

fn tree_of(cardinalities: &[usize]) -> Tree {
    Tree::new(cardinalities.iter().enumerate().map(|(v, card)| {
        (
            format!("v{}", v),
            (0..*card).map(|level| level.to_string()).collect::<Vec<_>>(),
        )
    }))
    .unwrap()
}

/// Every path of length `depth`, in lexicographic order of level indices.
fn paths(tree: &Tree, depth: usize) -> Vec<Vec<String>> {
    let mut paths = vec![Vec::new()];
    for variable in 0..depth {
        paths = paths
            .into_iter()
            .flat_map(|path: Vec<String>| {
                tree.levels(variable).iter().map(move |level| {
                    let mut path = path.clone();
                    path.push(level.clone());
                    path
                })
            })
            .collect();
    }
    paths
}

fn distribution() -> impl Strategy<Value = Vec<f64>> {
    prop::collection::vec(0.0..1.0f64, 4).prop_filter_map("all zero", |weights| {
        let total: f64 = weights.iter().sum();
        if total > 0.0 {
            Some(weights.iter().map(|w| w / total).collect())
        } else {
            None
        }
    })
}

proptest! {
    #[test]
    fn local_index_is_a_bijection(cardinalities in prop::collection::vec(1..4usize, 1..5)) {
        let tree = tree_of(&cardinalities);
        for depth in 0..=tree.len() {
            let indices: Vec<usize> = paths(&tree, depth)
                .iter()
                .map(|path| tree_index(path, &tree, IndexMode::Local).unwrap())
                .collect();
            let expected: Vec<usize> = (1..=cardinalities[..depth].iter().product()).collect();
            prop_assert_eq!(indices, expected);
        }
    }

    #[test]
    fn complete_index_numbers_every_node_once(
        cardinalities in prop::collection::vec(1..4usize, 1..5)
    ) {
        let tree = tree_of(&cardinalities);
        let mut seen = BTreeSet::new();
        let mut nodes = 0;
        for depth in 0..=tree.len() {
            for path in paths(&tree, depth) {
                nodes += 1;
                prop_assert!(seen.insert(tree_index(&path, &tree, IndexMode::Complete).unwrap()));
            }
        }
        prop_assert_eq!(seen, (1..=nodes).collect::<BTreeSet<usize>>());
    }

    #[test]
    fn stage_lookup_wraps_around(
        cardinalities in prop::collection::vec(1..4usize, 2..5),
        variable in 1..4usize,
        position in 1..100usize,
    ) {
        let tree = tree_of(&cardinalities);
        prop_assume!(variable < tree.len());
        let full = StageTable::full(&tree);
        let positions = tree.positions(variable);
        let wrapped = (position - 1) % positions + 1;
        prop_assert_eq!(full.stage_of(variable, position), full.stage_of(variable, wrapped));
        prop_assert_eq!(full.distinct(variable).len(), positions);

        let independent = StageTable::independent(&tree);
        prop_assert_eq!(independent.stage_of(variable, position), Some("1"));
    }

    #[test]
    fn merging_a_stage_with_itself_changes_nothing(
        cardinalities in prop::collection::vec(1..4usize, 2..5),
        position in 1..20usize,
    ) {
        let tree = tree_of(&cardinalities);
        let variable = tree.len() - 1;
        let mut stages = StageTable::full(&tree);
        let before = stages.clone();
        let label = stages.stage_of(variable, position).unwrap().to_string();
        stages.merge(variable, &label, &label).unwrap();
        prop_assert_eq!(stages, before);
    }

    #[test]
    fn distances_vanish_on_equal_distributions(p in distribution()) {
        for distance in Distance::ALL.iter() {
            let d = distance.compute(&p, &p).unwrap();
            prop_assert!(d.abs() < 1e-9, "{:?} gave {}", distance, d);
        }
    }

    #[test]
    fn distances_are_symmetric(p in distribution(), q in distribution()) {
        for distance in Distance::ALL.iter() {
            let forward = distance.compute(&p, &q).unwrap();
            let backward = distance.compute(&q, &p).unwrap();
            prop_assert!(
                forward == backward || (forward - backward).abs() < 1e-9,
                "{:?}: {} != {}", distance, forward, backward
            );
        }
    }
}
