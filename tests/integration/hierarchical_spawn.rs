//! Hierarchical bulk spawning on a real pool: dispatch shape, exactly-once
//! execution, failure aggregation, nested waits.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use fanout_rs::bulk::{bulk_sync_execute, bulk_then_execute};
use fanout_rs::error::{raise, ErrorKind};
use fanout_rs::scheduler::UNRESTRICTED_HELP_DEPTH;
use fanout_rs::{
    BulkLaunch, ExecutionPolicy, Executor, PlacementHint, PoolExecutor, ScheduleHint,
};

use crate::pool;

fn counters(n: usize) -> Arc<Vec<AtomicUsize>> {
    Arc::new((0..n).map(|_| AtomicUsize::new(0)).collect())
}

fn assert_each_once(hits: &[AtomicUsize]) {
    for (i, h) in hits.iter().enumerate() {
        assert_eq!(h.load(Ordering::Relaxed), 1, "item {i}");
    }
}

#[test]
fn sixteen_items_four_workers_spawn_per_context() {
    let pool = pool(4);
    let policy = ExecutionPolicy::new(PoolExecutor::new(&pool))
        .with_placement(PlacementHint::DepthFirst)
        .with_hierarchical_threshold(2);
    let launch = BulkLaunch::from_policy(&policy);
    let shape: Vec<usize> = (0..16).collect();

    let futures = policy
        .executor()
        .bulk_async_execute(&launch, |&i| i + 100, &shape)
        .unwrap();
    let got: Vec<_> = futures.into_iter().map(|f| f.get().unwrap()).collect();
    assert_eq!(got, (100..116).collect::<Vec<_>>());

    let metrics = pool.join();
    assert_eq!(metrics.small_stack_tasks, 4);
    assert!(metrics.tasks_executed >= 16 + 4);
}

#[test]
fn void_mode_keeps_the_last_context_on_the_caller() {
    let pool = pool(4);
    let exec = PoolExecutor::new(&pool);
    let launch = BulkLaunch {
        hierarchical_threshold: 2,
        ..BulkLaunch::default()
    };
    let hits = counters(16);
    let h = Arc::clone(&hits);

    bulk_sync_execute(
        &exec,
        &launch,
        move |&i: &usize| {
            h[i].fetch_add(1, Ordering::Relaxed);
        },
        &(0..16).collect::<Vec<_>>(),
    )
    .unwrap();

    assert_each_once(&hits);
    assert_eq!(pool.join().small_stack_tasks, 3);
}

#[test]
fn more_workers_than_items() {
    let pool = pool(8);
    let exec = PoolExecutor::new(&pool);
    let shape = vec![0usize, 1, 2];

    for placement in PlacementHint::ALL {
        let launch = BulkLaunch {
            placement,
            ..BulkLaunch::default()
        };
        let futures = exec.bulk_async_execute(&launch, |&i| i * 2, &shape).unwrap();
        assert_eq!(futures.len(), 3);
        let got: Vec<_> = futures.into_iter().map(|f| f.get().unwrap()).collect();
        assert_eq!(got, vec![0, 2, 4], "{placement:?}");

        let hits = counters(3);
        let h = Arc::clone(&hits);
        exec.bulk_post(
            &launch,
            move |&i: &usize| {
                h[i].fetch_add(1, Ordering::Relaxed);
            },
            &shape,
        )
        .get()
        .unwrap();
        assert_each_once(&hits);
    }

    assert_eq!(pool.join().small_stack_tasks, 0);
}

#[test]
fn at_or_below_threshold_no_spawner_is_created() {
    let pool = pool(4);
    let exec = PoolExecutor::new(&pool);
    let launch = BulkLaunch::default();

    for n in 0..=launch.hierarchical_threshold {
        let shape: Vec<usize> = (0..n).collect();
        let futures = exec.bulk_async_execute(&launch, |&i| i, &shape).unwrap();
        assert_eq!(futures.len(), n);
        for f in futures {
            f.get().unwrap();
        }
        exec.bulk_post(&launch, |_: &usize| {}, &shape).get().unwrap();
    }

    assert_eq!(pool.join().small_stack_tasks, 0);
}

#[test]
fn void_mode_drains_everything_on_success() {
    let pool = pool(4);
    let exec = PoolExecutor::new(&pool);
    let hits = counters(10_000);

    for placement in PlacementHint::ALL {
        let h = Arc::clone(&hits);
        let launch = BulkLaunch {
            placement,
            ..BulkLaunch::default()
        };
        exec.bulk_post(
            &launch,
            move |&i: &usize| {
                h[i].fetch_add(1, Ordering::Relaxed);
            },
            &(0..10_000).collect::<Vec<_>>(),
        )
        .get()
        .unwrap();
    }

    for h in hits.iter() {
        assert_eq!(h.load(Ordering::Relaxed), PlacementHint::ALL.len());
    }
    let _ = pool.join();
}

#[test]
fn single_failing_item_is_the_reported_error() {
    let pool = pool(4);
    let exec = PoolExecutor::new(&pool);
    let ran = Arc::new(AtomicUsize::new(0));
    let r = Arc::clone(&ran);

    let err = exec
        .bulk_post(
            &BulkLaunch::default(),
            move |&i: &usize| {
                r.fetch_add(1, Ordering::Relaxed);
                if i == 37 {
                    raise(ErrorKind::NoSuccess, "item", "item 37");
                }
            },
            &(0..200).collect::<Vec<_>>(),
        )
        .get()
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::NoSuccess);
    assert_eq!(err.message(), "item 37");
    assert_eq!(ran.load(Ordering::Relaxed), 200);
    let _ = pool.join();
}

#[test]
fn many_failing_items_report_one_error() {
    let pool = pool(4);
    let exec = PoolExecutor::new(&pool);

    let err = exec
        .bulk_post(
            &BulkLaunch::default(),
            |&i: &usize| {
                if i % 3 == 0 {
                    panic!("item {i}");
                }
            },
            &(0..300).collect::<Vec<_>>(),
        )
        .get()
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Panicked);
    assert!(err.message().starts_with("item "));
    let _ = pool.join();
}

#[test]
fn nested_bulk_calls_do_not_starve_a_small_pool() {
    let pool = pool(2);
    let exec = PoolExecutor::new(&pool);
    let total = Arc::new(AtomicUsize::new(0));

    let inner_exec = exec.clone();
    let t = Arc::clone(&total);
    exec.bulk_post(
        &BulkLaunch::default(),
        move |_: &usize| {
            let t = Arc::clone(&t);
            bulk_sync_execute(
                &inner_exec,
                &BulkLaunch::default(),
                move |_: &usize| {
                    t.fetch_add(1, Ordering::Relaxed);
                },
                &(0..16).collect::<Vec<_>>(),
            )
            .unwrap();
        },
        &(0..8).collect::<Vec<_>>(),
    )
    .get()
    .unwrap();

    assert_eq!(total.load(Ordering::Relaxed), 8 * 16);
    let _ = pool.join();
}

#[test]
fn many_blocking_nested_bulk_calls_keep_helping_depth_bounded() {
    let pool = pool(4);
    let exec = PoolExecutor::new(&pool);
    let total = Arc::new(AtomicUsize::new(0));
    const OUTER: usize = 20_000;
    const INNER: usize = 8;

    let inner_exec = exec.clone();
    let t = Arc::clone(&total);
    exec.bulk_post(
        &BulkLaunch::default(),
        move |_: &usize| {
            let t = Arc::clone(&t);
            bulk_sync_execute(
                &inner_exec,
                &BulkLaunch::default(),
                move |_: &usize| {
                    thread::sleep(Duration::from_micros(50));
                    t.fetch_add(1, Ordering::Relaxed);
                },
                &(0..INNER).collect::<Vec<_>>(),
            )
            .unwrap();
        },
        &(0..OUTER).collect::<Vec<_>>(),
    )
    .get()
    .unwrap();

    let metrics = pool.join();
    assert_eq!(total.load(Ordering::Relaxed), OUTER * INNER);
    assert!(
        metrics.max_help_depth <= u64::from(UNRESTRICTED_HELP_DEPTH) + 4,
        "helping depth grew to {}",
        metrics.max_help_depth
    );
}

#[test]
fn bulk_then_fans_out_after_the_predecessor() {
    let pool = pool(3);
    let exec = PoolExecutor::new(&pool);
    let base = exec.async_execute(ScheduleHint::NONE, || 1_000u64);

    let out = bulk_then_execute(
        &exec,
        &BulkLaunch::default(),
        |&i: &u64, &b: &u64| b + i,
        &(0..50u64).collect::<Vec<_>>(),
        base,
    )
    .get()
    .unwrap();

    assert_eq!(out, (1_000..1_050).collect::<Vec<_>>());
    let _ = pool.join();
}

#[test]
fn worker_window_still_covers_every_item() {
    let pool = pool(4);
    let exec = PoolExecutor::new(&pool);
    let launch = BulkLaunch {
        first_worker: 1,
        num_workers: Some(2),
        hierarchical_threshold: 1,
        ..BulkLaunch::default()
    };
    let hits = counters(64);
    let h = Arc::clone(&hits);

    bulk_sync_execute(
        &exec,
        &launch,
        move |&i: &usize| {
            h[i].fetch_add(1, Ordering::Relaxed);
        },
        &(0..64).collect::<Vec<_>>(),
    )
    .unwrap();

    assert_each_once(&hits);
    // Two contexts: one spawner, one run by the caller.
    assert_eq!(pool.join().small_stack_tasks, 1);
}
