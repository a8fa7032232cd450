//! Concurrent claimers on both ends of an index queue see every index
//! exactly once.

use std::sync::Arc;
use std::thread;

use proptest::prelude::*;

use fanout_rs::bulk::IndexQueue;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(crate::proptest_cases(64)))]

    #[test]
    fn both_ends_claim_each_index_once(
        begin in 0usize..1_000,
        len in 0usize..4_000,
        stride in 1usize..8,
        claimers in 1usize..6,
    ) {
        let queue = Arc::new(IndexQueue::new(begin, len, stride).unwrap());
        let handles: Vec<_> = (0..claimers)
            .map(|k| {
                let q = Arc::clone(&queue);
                thread::spawn(move || {
                    let mut got = Vec::new();
                    loop {
                        let next = if k % 2 == 0 { q.pop_left() } else { q.pop_right() };
                        match next {
                            Some(i) => got.push(i),
                            None => break,
                        }
                    }
                    got
                })
            })
            .collect();

        let mut all: Vec<usize> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        all.sort_unstable();
        let expected: Vec<usize> = (0..len).map(|k| begin + k * stride).collect();
        prop_assert_eq!(all, expected);
        prop_assert!(queue.is_empty());
    }
}
