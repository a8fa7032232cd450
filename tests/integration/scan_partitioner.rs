//! Scan partitioner on a real pool.

use std::sync::Arc;

use fanout_rs::error::{raise, ErrorKind};
use fanout_rs::{
    scan_partitioner, scan_static, scan_task, Chunk, ChunkSize, ExecutionPolicy, LaunchMode,
    PoolExecutor,
};

use crate::pool;

/// Running sum of `data`, inclusive, computed through the scan.
fn prefix_sums(policy: &ExecutionPolicy<PoolExecutor>, data: &Arc<Vec<u64>>) -> Vec<u64> {
    let (d1, d3) = (Arc::clone(data), Arc::clone(data));
    scan_static(
        policy,
        0,
        data.len(),
        0u64,
        move |c: Chunk| d1[c.range()].iter().sum::<u64>(),
        |acc, v| acc + v,
        move |c: Chunk, &base| {
            let mut acc = base;
            d3[c.range()]
                .iter()
                .map(|x| {
                    acc += x;
                    acc
                })
                .collect::<Vec<_>>()
        },
        |_, parts| parts.concat(),
    )
    .unwrap()
}

#[test]
fn four_chunks_give_exclusive_prefixes() {
    let pool = pool(4);
    let data = Arc::new(vec![1u64, 9, 5, 15, 12, 18, 30, 10]);
    let policy =
        ExecutionPolicy::new(PoolExecutor::new(&pool)).with_chunk_size(ChunkSize::Static(2));
    let d = Arc::clone(&data);

    let (prefixes, finals) = scan_static(
        &policy,
        0,
        data.len(),
        0u64,
        move |c: Chunk| d[c.range()].iter().sum::<u64>(),
        |acc, v| acc + v,
        |c: Chunk, &p| (c.start, p),
        |prefixes, finals| (prefixes, finals),
    )
    .unwrap();

    assert_eq!(prefixes, vec![0, 10, 30, 60]);
    assert_eq!(finals, vec![(0, 0), (2, 10), (4, 30), (6, 60)]);
    let _ = pool.join();
}

#[test]
fn running_sum_matches_sequential() {
    let pool = pool(4);
    let data: Arc<Vec<u64>> = Arc::new((0..10_007).map(|i| (i * 7 + 3) % 101).collect());
    let policy = ExecutionPolicy::new(PoolExecutor::new(&pool));

    let expected: Vec<u64> = data
        .iter()
        .scan(0u64, |acc, x| {
            *acc += x;
            Some(*acc)
        })
        .collect();
    assert_eq!(prefix_sums(&policy, &data), expected);
    let _ = pool.join();
}

#[test]
fn static_and_task_variants_agree() {
    let pool = pool(3);
    let policy =
        ExecutionPolicy::new(PoolExecutor::new(&pool)).with_chunk_size(ChunkSize::Static(7));

    let run_static = scan_static(
        &policy,
        5,
        200,
        1u64,
        |c: Chunk| c.range().map(|i| i as u64).sum::<u64>(),
        |acc, v| acc.wrapping_mul(31).wrapping_add(v),
        |c: Chunk, &p| p ^ c.start as u64,
        |prefixes, finals| (prefixes, finals),
    )
    .unwrap();

    let run_task = scan_task(
        &policy,
        5,
        200,
        1u64,
        |c: Chunk| c.range().map(|i| i as u64).sum::<u64>(),
        |acc, v| acc.wrapping_mul(31).wrapping_add(v),
        |c: Chunk, &p| p ^ c.start as u64,
        |prefixes, finals| (prefixes, finals),
    )
    .get()
    .unwrap();

    assert_eq!(run_static, run_task);
    let _ = pool.join();
}

#[test]
fn task_scan_on_a_single_worker() {
    let pool = pool(1);
    let policy = ExecutionPolicy::new(PoolExecutor::new(&pool))
        .with_chunk_size(ChunkSize::Static(10))
        .with_launch(LaunchMode::Async);

    let fut = scan_partitioner(
        &policy,
        0,
        100,
        0usize,
        |c: Chunk| c.len,
        |acc, v| acc + v,
        |_, &p| p,
        |prefixes, finals| {
            assert_eq!(prefixes, finals);
            prefixes
        },
    );
    assert_eq!(fut.get().unwrap(), (0..10).map(|i| i * 10).collect::<Vec<_>>());
    let _ = pool.join();
}

#[test]
fn failing_phase_is_reported_through_the_future() {
    let pool = pool(2);
    let policy = ExecutionPolicy::new(PoolExecutor::new(&pool))
        .with_chunk_size(ChunkSize::Static(4))
        .task();

    let err = scan_partitioner(
        &policy,
        0,
        32,
        0u32,
        |_c: Chunk| 1u32,
        |acc, v| acc + v,
        |c: Chunk, &p| {
            if c.start == 16 {
                raise(ErrorKind::NoSuccess, "f3", "chunk at 16");
            }
            p
        },
        |_, finals: Vec<u32>| finals,
    )
    .get()
    .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::NoSuccess);
    assert_eq!(err.message(), "chunk at 16");
    assert_eq!(err.diagnostics().function, Some("f3"));
    let _ = pool.join();
}
