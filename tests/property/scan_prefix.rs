//! The scan's fold yields exclusive prefixes of the per-chunk results, for
//! any chunking.

use std::sync::Arc;

use proptest::prelude::*;

use fanout_rs::{scan_static, Chunk, ChunkSize, ExecutionPolicy, InlineExecutor};

proptest! {
    #![proptest_config(ProptestConfig::with_cases(crate::proptest_cases(200)))]

    #[test]
    fn prefixes_are_exclusive_sums(
        data in proptest::collection::vec(0u64..1_000, 0..300),
        chunk in 1usize..40,
        init in 0u64..100,
    ) {
        let data = Arc::new(data);
        let d = Arc::clone(&data);
        let policy = ExecutionPolicy::new(InlineExecutor).with_chunk_size(ChunkSize::Static(chunk));

        let (prefixes, sums) = scan_static(
            &policy,
            0,
            data.len(),
            init,
            move |c: Chunk| d[c.range()].iter().sum::<u64>(),
            |acc, v| acc + v,
            |_c: Chunk, &p| p,
            |prefixes, finals| (prefixes, finals),
        )
        .unwrap();

        let chunk_sums: Vec<u64> = data.chunks(chunk).map(|c| c.iter().sum()).collect();
        let mut expected = Vec::with_capacity(chunk_sums.len());
        let mut acc = init;
        for s in &chunk_sums {
            expected.push(acc);
            acc += s;
        }
        prop_assert_eq!(&prefixes, &expected);
        prop_assert_eq!(&sums, &expected);
    }
}
