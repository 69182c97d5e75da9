//! Property tests: flattening preserves per-event multiplicities and order.

use arrow::array::AsArray;
use arrow::datatypes::Float64Type;
use dl_core::JaggedColumn;
use dl_loader::{Config, EventTree, TableKind, build, flatten, get_awkward_arrays, read_branches};
use dl_tree::MemoryTree;
use proptest::prelude::*;

fn config() -> Config {
    Config::from_json_str(
        r#"{
            "tree_name": "Events",
            "branches": {
                "crystal_hits": ["CrystalEdep"],
                "primary_particles": ["PrimaryPDG"]
            },
            "column_mapping": {"hits": {"CrystalEdep": "edep"}, "primaries": {}},
            "particle_names": {}
        }"#,
    )
    .unwrap()
}

fn build_tree(hits: &[Vec<f64>], primaries: &[Vec<i64>]) -> EventTree {
    let config = config();
    let source = MemoryTree::new("Events", hits.len())
        .with_jagged("CrystalEdep", JaggedColumn::from_f64_lists(hits))
        .with_jagged("PrimaryPDG", JaggedColumn::from_i64_lists(primaries));
    let read = |names: &[String]| read_branches(&source, "Events", names).unwrap();
    build(
        read(&config.branches.event),
        read(&config.branches.crystal_hits),
        read(&config.branches.primary_particles),
        &config,
    )
    .unwrap()
}

fn events() -> impl Strategy<Value = (Vec<Vec<f64>>, Vec<Vec<i64>>)> {
    prop::collection::vec(
        (
            prop::collection::vec(0.0f64..10.0, 0..6),
            prop::collection::vec(prop::sample::select(vec![11i64, -11, 22, 2212]), 0..3),
        ),
        0..40,
    )
    .prop_map(|events| events.into_iter().unzip())
}

proptest! {
    #[test]
    fn grouping_rows_reproduces_hit_count((hits, primaries) in events()) {
        let tree = build_tree(&hits, &primaries);
        let n = tree.n_events();
        prop_assert_eq!(n, hits.len());

        let table = flatten(&tree, &config().column_mapping.hits, TableKind::Hits).unwrap();
        let counts: Vec<usize> = tree.hit_counts().iter().map(|&c| c as usize).collect();
        prop_assert_eq!(table.group_lengths(n), counts.clone());
        prop_assert_eq!(table.num_rows(), counts.iter().sum::<usize>());

        let index = table.event_index();
        prop_assert!(index.windows(2).all(|w| w[0] <= w[1]));

        let flat: Vec<f64> = hits.iter().flatten().copied().collect();
        let edep = table.column("edep").unwrap();
        let edep = edep.as_primitive::<Float64Type>();
        prop_assert_eq!(edep.values().to_vec(), flat);
    }

    #[test]
    fn nested_views_match_source_lists((hits, primaries) in events()) {
        let tree = build_tree(&hits, &primaries);
        let (events, hit_view, primary_view) = get_awkward_arrays(&tree).unwrap();
        prop_assert_eq!(events.len(), hits.len());
        for (i, expected) in hits.iter().enumerate() {
            let got = hit_view.values("CrystalEdep", i).and_then(|s| s.as_float()).unwrap();
            prop_assert_eq!(got, expected.as_slice());
            prop_assert_eq!(events.hit_counts().unwrap()[i] as usize, expected.len());
        }
        for (i, expected) in primaries.iter().enumerate() {
            prop_assert_eq!(primary_view.len_of(i), Some(expected.len()));
        }
    }
}

#[test]
fn empty_collections_give_empty_tables() {
    let tree = build_tree(&[vec![], vec![]], &[vec![], vec![22]]);
    let table = flatten(&tree, &config().column_mapping.hits, TableKind::Hits).unwrap();
    assert_eq!(table.num_rows(), 0);
    assert_eq!(table.group_lengths(2), vec![0, 0]);
}
