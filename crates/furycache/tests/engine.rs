mod common;

use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

use bytes::Bytes;
use common::{
    init_tracing, CountingOrigin, DelayedOrigin, ExpiringOrigin, SizedOrigin, StuckOrigin,
    ZeroesOrigin,
};
use furycache::{Engine, Error, Options, NO_TTL};

fn options() -> Options {
    Options::default()
        .with_expected_len(100_000)
        .with_max_payload_total_bytes(10 * 1000 * 1000)
        .with_seed(42)
}

fn config_error(opts: Options) -> String {
    match Engine::new(opts, Arc::new(CountingOrigin::default())) {
        Err(Error::Config(msg)) => msg,
        other => panic!("expected config error, got {:?}", other),
    }
}

#[test]
fn test_rejects_bad_options() {
    init_tracing();
    let ms = Duration::from_millis;

    assert_eq!(
        config_error(options().with_expected_len(10)),
        "expected_len must be >= 1024"
    );
    assert_eq!(
        config_error(options().with_max_payload_total_bytes(1000)),
        "max_payload_total_bytes must be >= 10*1000*1000"
    );
    assert_eq!(
        config_error(options().with_fetch_timeout(ms(1))),
        "fetch_timeout must be >= 10ms"
    );
    assert_eq!(
        config_error(options().with_ttl_tick(Duration::ZERO)),
        "ttl_tick must be >= 1ms"
    );
    assert_eq!(
        config_error(
            options()
                .with_stats_relevance_window(ms(200))
                .with_stats_tick(ms(300))
        ),
        "stats_tick must be >= 1ms and <= stats_relevance_window"
    );
    assert_eq!(
        config_error(
            options()
                .with_stats_relevance_window(ms(50))
                .with_stats_tick(ms(10))
        ),
        "stats_relevance_window must be >= 100ms"
    );
}

#[test]
fn test_simple_get() {
    init_tracing();
    let origin = Arc::new(DelayedOrigin::new(Duration::from_millis(100)));
    let opts = options().with_fetch_timeout(Duration::from_millis(200));
    let engine = Engine::new(opts, origin.clone()).unwrap();

    assert_eq!(engine.get("foo").unwrap(), Bytes::from_static(b"foo"));
    assert!(engine.contains("foo"));
    assert_eq!(engine.payload_total(), 3);

    // Served from memory
    assert_eq!(engine.get("foo").unwrap(), Bytes::from_static(b"foo"));
    assert_eq!(origin.calls(), 1);
    assert_eq!(engine.metrics().hits(), 1);
    assert_eq!(engine.metrics().misses(), 1);
    assert_eq!(engine.metrics().fetches(), 1);
}

#[test]
fn test_failed_fetch_is_not_cached() {
    init_tracing();
    let origin = Arc::new(DelayedOrigin::new(Duration::from_millis(10)));
    let opts = options().with_fetch_timeout(Duration::from_millis(200));
    let engine = Engine::new(opts, origin.clone()).unwrap();

    for _ in 0..2 {
        let err = engine.get("error").unwrap_err();
        assert!(matches!(err, Error::Origin(_)), "{:?}", err);
        assert!(err.to_string().contains("fake error"));
    }

    assert!(!engine.contains("error"));
    assert_eq!(engine.payload_total(), 0);
    assert_eq!(origin.calls(), 2);
    assert_eq!(engine.metrics().fetch_errors(), 2);
}

#[test]
fn test_coalesced_callers_share_failure() {
    init_tracing();
    let origin = Arc::new(DelayedOrigin::new(Duration::from_millis(200)));
    let opts = options().with_fetch_timeout(Duration::from_millis(500));
    let engine = Arc::new(Engine::new(opts, origin.clone()).unwrap());
    let barrier = Arc::new(Barrier::new(8));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let engine = Arc::clone(&engine);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                engine.get("error")
            })
        })
        .collect();

    for handle in handles {
        let err = handle.join().unwrap().unwrap_err();
        assert!(matches!(err, Error::Origin(_)));
    }
    assert_eq!(origin.calls(), 1);
    assert_eq!(engine.metrics().coalesced(), 7);
    assert!(!engine.contains("error"));
}

#[test]
fn test_fetch_timeout() {
    init_tracing();
    let ms = Duration::from_millis;

    let origin = Arc::new(DelayedOrigin::new(ms(100)));
    let engine = Engine::new(options().with_fetch_timeout(ms(90)), origin).unwrap();
    let err = engine.get("foo").unwrap_err();
    assert!(err.is_timeout(), "{:?}", err);
    assert!(!engine.contains("foo"));

    let origin = Arc::new(DelayedOrigin::new(ms(100)));
    let engine = Engine::new(options().with_fetch_timeout(ms(110)), origin).unwrap();
    assert_eq!(engine.get("foo").unwrap(), Bytes::from_static(b"foo"));
}

#[test]
fn test_stuck_fetch_times_out_every_waiter() {
    init_tracing();
    let ms = Duration::from_millis;
    let origin = Arc::new(StuckOrigin::new(ms(500)));
    let opts = options().with_fetch_timeout(ms(100));
    let engine = Arc::new(Engine::new(opts, origin.clone()).unwrap());
    let barrier = Arc::new(Barrier::new(4));

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let engine = Arc::clone(&engine);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                let started = Instant::now();
                (engine.get("slow"), started.elapsed())
            })
        })
        .collect();

    // Joins after most of the deadline has passed and only waits out the rest
    thread::sleep(ms(100));
    let started = Instant::now();
    let late = engine.get("slow");
    let late_wait = started.elapsed();

    for handle in handles {
        let (outcome, waited) = handle.join().unwrap();
        assert!(outcome.unwrap_err().is_timeout());
        assert!(waited < ms(400), "waited {:?}", waited);
    }
    assert!(late.unwrap_err().is_timeout());
    assert!(late_wait < ms(120), "late caller waited {:?}", late_wait);

    assert_eq!(origin.calls(), 1);
    assert!(!engine.contains("slow"));
    assert!(format!("{:?}", engine).contains("fills: 0"));

    // A new miss starts a new fetch instead of joining the stuck one
    assert!(engine.get("slow").unwrap_err().is_timeout());
    assert_eq!(origin.calls(), 2);

    // The stuck fetches finish later and are discarded
    thread::sleep(ms(600));
    assert!(!engine.contains("slow"));
    assert_eq!(engine.payload_total(), 0);
    assert!(format!("{:?}", engine).contains("fills: 0"));
}

#[test]
fn test_hot_key_single_fetch() {
    init_tracing();
    const CALLERS: usize = 10_000;

    let origin = Arc::new(CountingOrigin::default());
    let opts = options().with_fetch_timeout(Duration::from_secs(5));
    let engine = Arc::new(Engine::new(opts, origin.clone()).unwrap());
    let barrier = Arc::new(Barrier::new(CALLERS));

    let handles: Vec<_> = (0..CALLERS)
        .map(|_| {
            let engine = Arc::clone(&engine);
            let barrier = Arc::clone(&barrier);
            thread::Builder::new()
                .stack_size(64 * 1024)
                .spawn(move || {
                    barrier.wait();
                    engine.get("hot key")
                })
                .unwrap()
        })
        .collect();

    for handle in handles {
        assert_eq!(
            handle.join().unwrap().unwrap(),
            Bytes::from_static(b"hot key")
        );
    }

    assert_eq!(origin.calls(), 1);
    let metrics = engine.metrics();
    assert_eq!(metrics.fetches(), 1);
    assert_eq!(metrics.hits() + metrics.misses(), CALLERS as u64);
}

#[test]
fn test_expiry_from_origin() {
    init_tracing();
    let ms = Duration::from_millis;
    let opts = options().with_ttl_tick(ms(1));
    let engine = Engine::new(opts, Arc::new(ExpiringOrigin { ttl: ms(50) })).unwrap();

    assert_eq!(engine.get("k").unwrap(), Bytes::from_static(b"k"));
    engine.sync_stats();
    assert!(engine.contains("k"));

    let ttl = engine.get_ttl(&["k", "other"]);
    assert!(ttl[0] > 0.0 && ttl[0] <= 0.05, "{}", ttl[0]);
    assert_eq!(ttl[1], NO_TTL);

    thread::sleep(ms(150));

    assert!(!engine.contains("k"));
    assert_eq!(engine.payload_total(), 0);
    assert_eq!(engine.get_ttl(&["k"]), vec![NO_TTL]);
    assert!(!engine.access_stats().is_relevant("k"));
    assert!(!engine.access_stats().is_irrelevant("k"));
    assert_eq!(engine.metrics().expirations(), 1);

    // Expired keys are fetched again
    engine.get("k").unwrap();
    assert_eq!(engine.metrics().fetches(), 2);
}

#[test]
fn test_evicts_irrelevant_keys_first() {
    init_tracing();
    let ms = Duration::from_millis;
    let opts = options()
        .with_stats_relevance_window(ms(500))
        .with_stats_tick(ms(10));
    let engine = Engine::new(opts, Arc::new(ZeroesOrigin { len: 10_000 })).unwrap();

    for i in 0..1000 {
        assert_eq!(engine.get(&i.to_string()).unwrap().len(), 10_000);
    }
    engine.sync_stats();

    // Exactly at the budget; nothing evicted yet
    assert_eq!(engine.payload_total(), 10 * 1000 * 1000);
    assert_eq!(engine.len(), 1000);
    assert_eq!(engine.metrics().evictions(), 0);

    thread::sleep(ms(700));
    assert_eq!(engine.access_stats().irrelevant_len(), 1000);
    assert_eq!(engine.access_stats().relevant_len(), 0);

    // Bring a few keys back into the window
    for i in 0..10 {
        engine.get(&i.to_string()).unwrap();
    }
    engine.sync_stats();
    assert_eq!(engine.access_stats().relevant_len(), 10);

    engine.get("abc").unwrap();

    // Room for twice the new payload was made
    assert_eq!(engine.metrics().evictions(), 2);
    assert_eq!(engine.payload_total(), 10 * 1000 * 1000 - 10_000);
    assert_eq!(engine.len(), 999);
    assert!(engine.contains("abc"));
    for i in 0..10 {
        assert!(engine.contains(&i.to_string()), "hot key {} evicted", i);
    }

    for i in 0..150 {
        engine.get(&format!("more-{}", i)).unwrap();
    }
    assert!(engine.payload_total() <= engine.max_payload_total());
    assert_eq!(engine.payload_total(), engine.len() as u64 * 10_000);
}

#[test]
fn test_budget_holds_under_concurrency() {
    init_tracing();
    let engine = Arc::new(Engine::new(options(), Arc::new(SizedOrigin)).unwrap());

    let handles: Vec<_> = (0..8)
        .map(|t| {
            let engine = Arc::clone(&engine);
            thread::spawn(move || {
                for i in 0..50 {
                    let key = format!("t{}-{}/{}", t, i, 50_000 + i * 1000);
                    let body = engine.get(&key).unwrap();
                    assert_eq!(body.len(), 50_000 + i * 1000);
                    assert!(engine.payload_total() <= engine.max_payload_total());
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    assert!(engine.payload_total() <= engine.max_payload_total());
    assert!(engine.metrics().evictions() > 0);
}

#[test]
fn test_oversized_payload_served_uncached() {
    init_tracing();
    let engine = Engine::new(options(), Arc::new(SizedOrigin)).unwrap();
    let key = format!("big/{}", 10 * 1000 * 1000 + 1);

    assert_eq!(engine.get(&key).unwrap().len(), 10 * 1000 * 1000 + 1);
    assert!(!engine.contains(&key));
    assert_eq!(engine.payload_total(), 0);
}

#[test]
fn test_invalidate() {
    init_tracing();
    let origin = Arc::new(CountingOrigin::default());
    let engine = Engine::new(options(), origin.clone()).unwrap();

    engine.get("a").unwrap();
    engine.get("b").unwrap();
    engine.sync_stats();

    engine.invalidate(&["a", "never-cached"]);

    assert!(!engine.contains("a"));
    assert!(engine.contains("b"));
    assert_eq!(engine.payload_total(), 1);
    assert!(!engine.access_stats().is_relevant("a"));
    assert_eq!(engine.access_stats().count("a"), 0);
    assert_eq!(engine.metrics().invalidations(), 1);

    engine.get("a").unwrap();
    assert_eq!(origin.calls(), 3);
}
