use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, Mutex};
use std::thread;
use std::time::Duration;

use async_trait::async_trait;
use store_dispatch::prelude::*;
use store_dispatch::{assert_dispatched, assert_not_dispatched, count_dispatched, LifecycleState, TestHarness};

#[derive(Action, Debug, Clone, PartialEq)]
enum CounterAction {
    Increment,
    Add(i64),
}

#[derive(Action, Debug)]
struct Seq {
    producer: usize,
    index: usize,
}

#[derive(Action, Debug)]
struct Blocked;

fn reduce(count: &mut i64, action: &CounterAction) -> bool {
    match action {
        CounterAction::Increment => *count += 1,
        CounterAction::Add(n) => *count += n,
    }
    true
}

fn counter() -> Arc<StateFeature<i64>> {
    Arc::new(StateFeature::new("Counter", 0i64).on(reduce))
}

/// Records the names of processed actions and tracks drain overlap.
#[derive(Default)]
struct Probe {
    names: Mutex<Vec<&'static str>>,
    inside: AtomicUsize,
    max_inside: AtomicUsize,
    hold: Option<Duration>,
}

impl Probe {
    fn holding(hold: Duration) -> Self {
        Self {
            hold: Some(hold),
            ..Self::default()
        }
    }
}

impl Middleware for Probe {
    fn before_dispatch(&self, action: &dyn Action) {
        let now = self.inside.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_inside.fetch_max(now, Ordering::SeqCst);
        self.names.lock().unwrap().push(action.name());
        if let Some(hold) = self.hold {
            thread::sleep(hold);
        }
    }

    fn after_dispatch(&self, _action: &dyn Action) {
        self.inside.fetch_sub(1, Ordering::SeqCst);
    }
}

struct VetoBlocked;

impl Middleware for VetoBlocked {
    fn may_dispatch(&self, action: &dyn Action) -> bool {
        !action.is::<Blocked>()
    }
}

#[test]
fn test_concurrent_submissions_wait_then_keep_order() {
    const PRODUCERS: usize = 4;
    const PER_PRODUCER: usize = 50;

    let dispatcher = Dispatcher::new();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let store = Store::builder().dispatcher(dispatcher.clone()).build().unwrap();
    {
        let seen = Arc::clone(&seen);
        store.subscribe::<Seq, _>(SubscriberId::new(), move |action| {
            seen.lock().unwrap().push((action.producer, action.index));
        });
    }

    let handles: Vec<_> = (0..PRODUCERS)
        .map(|producer| {
            let dispatcher = dispatcher.clone();
            thread::spawn(move || {
                for index in 0..PER_PRODUCER {
                    dispatcher.dispatch(Seq { producer, index });
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert!(seen.lock().unwrap().is_empty());
    assert_eq!(store.queued(), PRODUCERS * PER_PRODUCER + 1);

    futures::executor::block_on(store.initialize());

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), PRODUCERS * PER_PRODUCER);
    for producer in 0..PRODUCERS {
        let indices: Vec<usize> = seen
            .iter()
            .filter(|(p, _)| *p == producer)
            .map(|(_, i)| *i)
            .collect();
        assert_eq!(indices, (0..PER_PRODUCER).collect::<Vec<_>>());
    }
}

#[test]
fn test_single_producer_is_fifo() {
    let dispatcher = Dispatcher::new();
    let probe = Arc::new(Probe::default());
    let store = Store::builder()
        .dispatcher(dispatcher.clone())
        .middleware_arc(probe.clone())
        .build()
        .unwrap();

    dispatcher.dispatch(CounterAction::Add(1));
    dispatcher.dispatch(Blocked);
    dispatcher.dispatch(CounterAction::Increment);
    futures::executor::block_on(store.initialize());
    dispatcher.dispatch(CounterAction::Add(2));

    assert_eq!(
        *probe.names.lock().unwrap(),
        vec!["StoreInitializedAction", "Add", "Blocked", "Increment", "Add"]
    );
}

#[test]
fn test_at_most_one_drain_at_a_time() {
    const THREADS: usize = 8;
    const PER_THREAD: usize = 20;

    let dispatcher = Dispatcher::new();
    let feature = counter();
    let probe = Arc::new(Probe::holding(Duration::from_micros(200)));
    let store = Store::builder()
        .dispatcher(dispatcher.clone())
        .feature(feature.clone())
        .middleware_arc(probe.clone())
        .build()
        .unwrap();
    futures::executor::block_on(store.initialize());

    let barrier = Arc::new(Barrier::new(THREADS));
    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let dispatcher = dispatcher.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                for _ in 0..PER_THREAD {
                    dispatcher.dispatch(CounterAction::Increment);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(probe.max_inside.load(Ordering::SeqCst), 1);
    assert_eq!(feature.state(), (THREADS * PER_THREAD) as i64);
    assert_eq!(store.queued(), 0);
}

#[tokio::test]
async fn test_veto_skips_one_action_only() {
    let feature = counter();
    let hits = Arc::new(AtomicUsize::new(0));
    let h = Arc::clone(&hits);
    let harness = TestHarness::start(
        Store::builder()
            .feature(feature.clone())
            .middleware(VetoBlocked)
            .effect(sync_effect_fn(move |_: &Blocked, _: &Dispatcher| {
                h.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })),
    )
    .await
    .unwrap();

    let subscribed = Arc::new(AtomicUsize::new(0));
    let s = Arc::clone(&subscribed);
    harness
        .store()
        .subscribe::<Blocked, _>(SubscriberId::new(), move |_| {
            s.fetch_add(1, Ordering::SeqCst);
        });

    harness.dispatch(Blocked);
    harness.dispatch(CounterAction::Add(3));

    let actions = harness.drain_dispatched();
    assert_not_dispatched!(actions, Blocked);
    assert_dispatched!(actions, CounterAction, CounterAction::Add(3));
    assert_eq!(hits.load(Ordering::SeqCst), 0);
    assert_eq!(subscribed.load(Ordering::SeqCst), 0);
    assert_eq!(feature.state(), 3);
}

#[tokio::test]
async fn test_veto_in_same_batch_spares_next_action() {
    let dispatcher = Dispatcher::new();
    let feature = counter();
    let probe = Arc::new(Probe::default());
    let effect_hits = Arc::new(AtomicUsize::new(0));
    let h = Arc::clone(&effect_hits);
    let store = Store::builder()
        .dispatcher(dispatcher.clone())
        .feature(feature.clone())
        .middleware(VetoBlocked)
        .middleware_arc(probe.clone())
        .effect(sync_effect_fn(move |_: &Blocked, _: &Dispatcher| {
            h.fetch_add(1, Ordering::SeqCst);
            Ok::<(), EffectError>(())
        }))
        .build()
        .unwrap();

    let subscribed = Arc::new(Mutex::new(Vec::new()));
    let s = Arc::clone(&subscribed);
    store.subscribe::<Blocked, _>(SubscriberId::new(), move |_| {
        s.lock().unwrap().push("Blocked");
    });
    let s = Arc::clone(&subscribed);
    store.subscribe::<CounterAction, _>(SubscriberId::new(), move |_| {
        s.lock().unwrap().push("CounterAction");
    });

    // Both wait in the queue and drain together on activation.
    dispatcher.dispatch(Blocked);
    dispatcher.dispatch(CounterAction::Add(3));
    assert_eq!(feature.state(), 0);
    store.initialize().await;

    assert_eq!(*subscribed.lock().unwrap(), vec!["CounterAction"]);
    assert_eq!(effect_hits.load(Ordering::SeqCst), 0);
    assert_eq!(feature.state(), 3);
    let names = probe.names.lock().unwrap().clone();
    assert!(!names.contains(&"Blocked"));
    assert_eq!(names.last(), Some(&"Add"));
}

#[test]
fn test_duplicate_feature_names() {
    let store = Store::new(Dispatcher::new());
    store.add_feature(counter()).unwrap();
    store
        .add_feature(Arc::new(StateFeature::new("Other", String::new())))
        .unwrap();

    let err = store
        .add_feature(Arc::new(StateFeature::new("counter", 0i64)))
        .unwrap_err();
    assert!(matches!(err, StoreError::DuplicateFeature { ref name } if name == "counter"));

    assert!(store.feature("COUNTER").is_some());
    assert!(store.feature("other").is_some());
    assert_eq!(store.features().len(), 2);
}

#[tokio::test]
async fn test_failing_effects_are_reported_once_each() {
    let ran = Arc::new(AtomicUsize::new(0));
    let r = Arc::clone(&ran);
    let harness = TestHarness::start(
        Store::builder()
            .effect(sync_effect_fn(|_: &CounterAction, _: &Dispatcher| {
                Err(EffectError::failed("first"))
            }))
            .effect(effect_fn(move |_: &CounterAction, _| {
                let r = Arc::clone(&r);
                async move {
                    r.fetch_add(1, Ordering::SeqCst);
                    Ok::<(), EffectError>(())
                }
            }))
            .effect(effect_fn(|_: &CounterAction, _| async {
                tokio::time::sleep(Duration::from_millis(5)).await;
                Err::<(), _>(EffectError::Aggregate(vec![
                    EffectError::failed("second"),
                    EffectError::failed("third"),
                ]))
            })),
    )
    .await
    .unwrap();
    let mut errors = harness.store().unhandled_errors();

    harness.dispatch(CounterAction::Increment);

    let mut messages = Vec::new();
    for _ in 0..3 {
        let failure = tokio::time::timeout(Duration::from_secs(1), errors.recv())
            .await
            .expect("timed out waiting for effect failure")
            .unwrap();
        assert!(failure.action.is::<CounterAction>());
        messages.push(failure.error.to_string());
    }
    messages.sort();
    assert_eq!(
        messages,
        vec!["effect failed: first", "effect failed: second", "effect failed: third"]
    );
    assert_eq!(ran.load(Ordering::SeqCst), 1);

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(errors.try_recv().is_err());
}

#[tokio::test]
async fn test_nested_change_scopes() {
    let feature = counter();
    let harness = TestHarness::start(Store::builder().feature(feature.clone()))
        .await
        .unwrap();
    let store = harness.store();

    let outer = store.begin_internal_middleware_change();
    let inner = store.begin_internal_middleware_change();

    drop(inner);
    harness.dispatch(CounterAction::Increment);
    assert_eq!(feature.state(), 0);

    drop(outer);
    harness.dispatch(CounterAction::Increment);
    assert_eq!(feature.state(), 1);
    assert_eq!(count_dispatched!(harness.drain_dispatched(), CounterAction), 1);
}

#[tokio::test]
async fn test_subscription_fires_once_after_unsubscribe() {
    let harness = TestHarness::new().await;
    let store = harness.store();
    let fired = Arc::new(AtomicUsize::new(0));
    let id = SubscriberId::new();

    let f = Arc::clone(&fired);
    store.subscribe::<CounterAction, _>(id, move |action| {
        if *action == CounterAction::Increment {
            f.fetch_add(1, Ordering::SeqCst);
        }
    });

    harness.dispatch(CounterAction::Increment);
    store.unsubscribe_all(id);
    harness.dispatch(CounterAction::Increment);

    assert_eq!(fired.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_subscription_guard_scope() {
    let harness = TestHarness::new().await;
    let fired = Arc::new(AtomicUsize::new(0));
    let id = SubscriberId::new();
    {
        let f = Arc::clone(&fired);
        harness.store().subscribe::<CounterAction, _>(id, move |_| {
            f.fetch_add(1, Ordering::SeqCst);
        });
        let _guard = harness.store().unsubscriber(id);
        harness.dispatch(CounterAction::Increment);
    }
    harness.dispatch(CounterAction::Increment);

    assert_eq!(fired.load(Ordering::SeqCst), 1);
}

struct Ordered {
    tag: &'static str,
    log: Arc<Mutex<Vec<String>>>,
    fail: bool,
}

#[async_trait]
impl Middleware for Ordered {
    async fn initialize(&self, _: &Dispatcher, _: &Store) -> Result<(), MiddlewareError> {
        tokio::task::yield_now().await;
        self.log.lock().unwrap().push(format!("init:{}", self.tag));
        if self.fail {
            return Err(MiddlewareError::new("nope"));
        }
        Ok(())
    }

    fn after_all_initialized(&self) {
        self.log.lock().unwrap().push(format!("ready:{}", self.tag));
    }
}

#[tokio::test]
async fn test_initialization_order_and_failures() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let ordered = |tag, fail| Ordered {
        tag,
        log: Arc::clone(&log),
        fail,
    };
    let store = Store::builder()
        .dispatcher(Dispatcher::new())
        .middleware(ordered("a", false))
        .middleware(ordered("b", true))
        .middleware(ordered("c", false))
        .build()
        .unwrap();

    store.initialize().await;
    store.initialize().await;

    assert_eq!(store.lifecycle(), LifecycleState::Active);
    assert_eq!(
        *log.lock().unwrap(),
        vec!["init:a", "init:b", "init:c", "ready:a", "ready:c"]
    );
}

#[tokio::test]
async fn test_late_middleware_is_initialized() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let harness = TestHarness::new().await;

    harness.store().add_middleware(Ordered {
        tag: "late",
        log: Arc::clone(&log),
        fail: false,
    });
    assert_eq!(harness.store().middleware_count(), 1);

    tokio::time::timeout(Duration::from_secs(1), async {
        while log.lock().unwrap().len() < 2 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("late middleware never initialized");
    assert_eq!(*log.lock().unwrap(), vec!["init:late", "ready:late"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_initialize_runs_once() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let store = Store::builder()
        .dispatcher(Dispatcher::new())
        .middleware(Ordered {
            tag: "only",
            log: Arc::clone(&log),
            fail: false,
        })
        .build()
        .unwrap();

    let a = tokio::spawn({
        let store = store.clone();
        async move { store.initialize().await }
    });
    let b = tokio::spawn({
        let store = store.clone();
        async move { store.initialize().await }
    });
    a.await.unwrap();
    b.await.unwrap();

    assert!(matches!(store.lifecycle(), LifecycleState::Active));
    assert_eq!(*log.lock().unwrap(), vec!["init:only", "ready:only"]);
    tokio::time::timeout(Duration::from_secs(1), store.initialized())
        .await
        .unwrap();
}

#[tokio::test]
async fn test_reducer_dispatch_chain_completes() {
    let feature = counter();
    let harness = TestHarness::start(Store::builder().feature(feature.clone()))
        .await
        .unwrap();
    let dispatcher = harness.dispatcher().clone();
    harness
        .store()
        .subscribe::<CounterAction, _>(SubscriberId::new(), move |action| {
            if let CounterAction::Add(n) = action {
                if *n > 1 {
                    dispatcher.dispatch(CounterAction::Add(n - 1));
                }
            }
        });

    harness.dispatch(CounterAction::Add(4));
    assert_eq!(feature.state(), 4 + 3 + 2 + 1);
}
