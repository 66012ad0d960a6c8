//! Stateless-worker behavior: ordering, unordered delivery, argument
//! conventions, bounded and unbounded dispatch, and length advertising.

use taskmill::{
    ArgumentKind, ErrorPolicy, Kwargs, Pool, PoolConfig, WorkerSpec, from_fn, keyed, spread,
};

fn square_pool(config: PoolConfig) -> Pool<u64, u64> {
    Pool::new(WorkerSpec::replicated(|| from_fn(|x: u64| x * x)), config)
        .expect("pool construction")
}

fn expected_squares(n: u64) -> Vec<u64> {
    (0..n).map(|x| x * x).collect()
}

#[test]
fn ordered_results_match_submission_order() {
    for n_items in [0u64, 1, 5, 20] {
        for workers in [1usize, 3, 4] {
            for chunk_size in [1usize, 2, 4] {
                let config = PoolConfig {
                    workers,
                    chunk_size,
                    ..PoolConfig::default()
                };
                let mut pool = square_pool(config);
                let results: Vec<u64> = pool
                    .run(0..n_items)
                    .unwrap()
                    .map(Result::unwrap)
                    .collect();
                assert_eq!(
                    results,
                    expected_squares(n_items),
                    "n_items={n_items} workers={workers} chunk_size={chunk_size}"
                );
            }
        }
    }
}

#[test]
fn unordered_results_cover_the_input() {
    for prefill_ratio in [1usize, 2, 4] {
        let config = PoolConfig {
            workers: 4,
            chunk_size: 2,
            prefill_ratio,
            unordered: true,
            ..PoolConfig::default()
        };
        let mut pool = square_pool(config);
        let mut results: Vec<u64> = pool.run(0..20u64).unwrap().map(Result::unwrap).collect();
        results.sort_unstable();
        assert_eq!(results, expected_squares(20));
    }
}

#[test]
fn more_workers_than_in_flight_tasks_still_order() {
    let config = PoolConfig {
        workers: 7,
        chunk_size: 1,
        ..PoolConfig::default()
    };
    let mut pool = square_pool(config);
    let results: Vec<u64> = pool.run(0..20u64).unwrap().map(Result::unwrap).collect();
    assert_eq!(results, expected_squares(20));
}

#[test]
fn unbounded_dispatch_submits_everything_up_front() {
    for unordered in [false, true] {
        let config = PoolConfig {
            workers: 4,
            bounded: false,
            unordered,
            ..PoolConfig::default()
        };
        let mut pool = square_pool(config);
        let mut results: Vec<u64> = pool.run(0..50u64).unwrap().map(Result::unwrap).collect();
        if unordered {
            results.sort_unstable();
        }
        assert_eq!(results, expected_squares(50));
    }
}

#[test]
fn unbounded_dispatch_accepts_unsized_inputs() {
    let config = PoolConfig {
        workers: 3,
        bounded: false,
        ..PoolConfig::default()
    };
    let mut pool = square_pool(config);
    let input = (0..10u64).filter(|_| true);
    let stream = pool.run(input).unwrap();
    assert_eq!(stream.expected_len(), None);
    let results: Vec<u64> = stream.map(Result::unwrap).collect();
    assert_eq!(results, expected_squares(10));
}

#[test]
fn unsized_input_yields_in_order_with_unknown_length() {
    let config = PoolConfig {
        workers: 3,
        ..PoolConfig::default()
    };
    let mut pool = square_pool(config);
    let input = (0..5u64).filter(|_| true);
    let stream = pool.run(input).unwrap();
    assert_eq!(stream.expected_len(), None);
    assert_eq!(stream.size_hint(), (0, None));
    let results: Vec<u64> = stream.map(Result::unwrap).collect();
    assert_eq!(results, expected_squares(5));
}

#[test]
fn sized_input_advertises_its_length() {
    let config = PoolConfig {
        workers: 2,
        error_policy: ErrorPolicy::Ignore,
        ..PoolConfig::default()
    };
    let mut pool = square_pool(config);
    let mut stream = pool.run(vec![1u64, 2, 3]).unwrap();
    assert_eq!(stream.expected_len(), Some(3));
    assert_eq!(stream.size_hint(), (3, Some(3)));
    let first = stream.next().unwrap().unwrap();
    assert_eq!(first, 1);
    assert_eq!(stream.size_hint(), (2, Some(2)));
}

#[test]
fn positional_payloads_spread_across_parameters() {
    let config = PoolConfig {
        workers: 4,
        argument_kind: ArgumentKind::Positional,
        ..PoolConfig::default()
    };
    let spec = WorkerSpec::replicated(|| spread(|a: i64, b: i64, c: i64| (a, b, c)));
    let mut pool: Pool<(i64, i64, i64), (i64, i64, i64)> = Pool::new(spec, config).unwrap();
    let results: Vec<(i64, i64, i64)> = pool
        .run(vec![(1i64, 2i64, 3i64)])
        .unwrap()
        .map(Result::unwrap)
        .collect();
    assert_eq!(results, vec![(1, 2, 3)]);
}

#[test]
fn positional_squares_keep_their_order() {
    let config = PoolConfig {
        workers: 3,
        argument_kind: ArgumentKind::Positional,
        ..PoolConfig::default()
    };
    let spec = WorkerSpec::replicated(|| spread(|a: u64| a * a));
    let mut pool: Pool<(u64,), u64> = Pool::new(spec, config).unwrap();
    let results: Vec<u64> = pool
        .run((0..20u64).map(|x| (x,)))
        .unwrap()
        .map(Result::unwrap)
        .collect();
    assert_eq!(results, expected_squares(20));
}

#[test]
fn keyed_payloads_resolve_by_name() {
    let config = PoolConfig {
        workers: 4,
        argument_kind: ArgumentKind::Keyed,
        ..PoolConfig::default()
    };
    let spec = WorkerSpec::replicated(|| {
        keyed(|kwargs: &Kwargs<i64>| {
            Ok((
                *kwargs.require("a")?,
                *kwargs.require("b")?,
                *kwargs.require("c")?,
            ))
        })
    });
    let mut pool: Pool<Kwargs<i64>, (i64, i64, i64)> = Pool::new(spec, config).unwrap();
    let payload: Kwargs<i64> = [("a", 1i64), ("b", 2), ("c", 3)].into_iter().collect();
    let results: Vec<(i64, i64, i64)> = pool
        .run(vec![payload])
        .unwrap()
        .map(Result::unwrap)
        .collect();
    assert_eq!(results, vec![(1, 2, 3)]);
}
