//! Every placement splits `[0, N)` into disjoint partitions that cover it,
//! and every plan agrees with its partitions.

use proptest::prelude::*;

use fanout_rs::bulk::{partition, BulkLaunch, BulkMode, Dispatch};
use fanout_rs::PlacementHint;

fn placement() -> impl Strategy<Value = PlacementHint> {
    proptest::sample::select(PlacementHint::ALL.to_vec())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(crate::proptest_cases(500)))]

    #[test]
    fn union_is_exact(n in 0usize..20_000, p in 1usize..128, placement in placement()) {
        let mut seen = vec![0u8; n];
        for t in 0..p {
            for i in partition(n, p, t, placement).indices() {
                prop_assert!(i < n, "index {} out of range", i);
                seen[i] += 1;
            }
        }
        prop_assert!(seen.iter().all(|&c| c == 1));
    }

    #[test]
    fn partition_sizes_differ_by_at_most_one(n in 0usize..20_000, p in 1usize..128, placement in placement()) {
        let lens: Vec<usize> = (0..p).map(|t| partition(n, p, t, placement).len).collect();
        let min = lens.iter().copied().min().unwrap_or(0);
        let max = lens.iter().copied().max().unwrap_or(0);
        prop_assert!(max - min <= 1);
        prop_assert_eq!(lens.iter().sum::<usize>(), n);
    }

    #[test]
    fn spawner_only_above_threshold(
        n in 0usize..2_000,
        workers in 1usize..16,
        threshold in 0usize..32,
        placement in placement(),
    ) {
        let desc = BulkLaunch { placement, hierarchical_threshold: threshold, ..BulkLaunch::default() }
            .resolve(workers);
        for mode in [BulkMode::Value, BulkMode::Void] {
            let plan = desc.plan(n, mode);
            prop_assert_eq!(plan.len(), workers);
            for c in &plan {
                match c.dispatch {
                    Dispatch::Empty => prop_assert!(c.partition.is_empty()),
                    Dispatch::Spawner => prop_assert!(c.partition.len > threshold),
                    Dispatch::Inline | Dispatch::InlineDirect => {
                        prop_assert!(!c.partition.is_empty())
                    }
                }
            }
            if n <= threshold {
                prop_assert!(plan.iter().all(|c| c.dispatch != Dispatch::Spawner));
            }
        }
    }
}
