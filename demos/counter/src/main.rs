//! Counter - Minimal store-dispatch example
//!
//! Shows the whole pipeline without a UI:
//! - Feature: a named counter with typed reducers
//! - Actions: dispatched from several tasks at once
//! - Middleware: action logging, plus a veto on negative steps
//! - Effect: dispatches a milestone every tenth count
//! - Persistence: state survives restarts in a JSON file
//!
//! Run it twice to see the count rehydrate from `--state-file`.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use clap::Parser;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use store_dispatch::prelude::*;
use store_dispatch::{ActionLogConfig, ActionLoggerConfig};

/// Counter - store-dispatch framework example
#[derive(Parser, Debug)]
#[command(name = "counter")]
#[command(about = "A headless counter demonstrating store-dispatch patterns")]
struct Args {
    /// Where the counter state is saved between runs
    #[arg(long, short, default_value = "counter-state.json")]
    state_file: PathBuf,

    /// Number of concurrent producers
    #[arg(long, short, default_value = "4")]
    producers: usize,

    /// Increments dispatched by each producer
    #[arg(long, default_value = "25")]
    steps: i64,

    /// Start from zero instead of the saved count
    #[arg(long)]
    reset: bool,

    /// Log every processed action (sets the default filter to debug)
    #[arg(long)]
    debug: bool,
}

// ============================================================================
// State and actions
// ============================================================================

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct CounterState {
    count: i64,
    milestones: u32,
}

#[derive(Action, Clone, Debug)]
enum CounterAction {
    Step(i64),
    Reset,
}

#[derive(Action, Clone, Debug)]
struct MilestoneReached {
    count: i64,
}

fn step(state: &mut CounterState, action: &CounterAction) -> bool {
    match action {
        CounterAction::Step(by) => state.count += by,
        CounterAction::Reset => {
            if state.count == 0 {
                return false;
            }
            state.count = 0;
        }
    }
    true
}

fn milestone(state: &mut CounterState, _: &MilestoneReached) -> bool {
    state.milestones += 1;
    true
}

// ============================================================================
// Middleware and persistence
// ============================================================================

/// Rejects steps that would count down.
struct NoNegativeSteps;

impl Middleware for NoNegativeSteps {
    fn may_dispatch(&self, action: &dyn Action) -> bool {
        !matches!(
            action.downcast_ref::<CounterAction>(),
            Some(CounterAction::Step(by)) if *by < 0
        )
    }
}

/// Keeps the exported document in a JSON file.
struct FilePersistence {
    path: PathBuf,
}

#[async_trait]
impl PersistenceProvider for FilePersistence {
    async fn load(&self) -> Result<Option<Value>, StoreError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| StoreError::Persistence(format!("{}: {e}", self.path.display()))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::Persistence(format!("{}: {e}", self.path.display()))),
        }
    }

    async fn save(&self, document: Value) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(&document)
            .map_err(|e| StoreError::Persistence(e.to_string()))?;
        tokio::fs::write(&self.path, bytes)
            .await
            .map_err(|e| StoreError::Persistence(format!("{}: {e}", self.path.display())))
    }
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> Result<(), StoreError> {
    let args = Args::parse();

    let default_filter = if args.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .with_target(false)
        .init();

    let dispatcher = Dispatcher::new();
    let counter = Arc::new(
        StateFeature::new("Counter", CounterState::default())
            .on(step)
            .on(milestone),
    );
    let logger = Arc::new(
        LoggingMiddleware::with_log(ActionLogConfig::new(
            32,
            ActionLoggerConfig::new(None, Some("Store*")),
        ))
        .active(args.debug),
    );

    let store = Store::builder()
        .dispatcher(dispatcher.clone())
        .config(StoreConfig::from_env())
        .persistence(Arc::new(FilePersistence {
            path: args.state_file.clone(),
        }))
        .feature(counter.clone())
        .middleware_arc(logger.clone())
        .middleware(NoNegativeSteps)
        .effect(effect_fn({
            let counter = counter.clone();
            move |action: &CounterAction, dispatcher: Dispatcher| {
                // Reducers already ran, so this is the post-step count.
                let count = counter.state().count;
                let stepped = matches!(action, CounterAction::Step(_));
                async move {
                    if stepped && count > 0 && count % 10 == 0 {
                        dispatcher.dispatch(MilestoneReached { count });
                    }
                    Ok::<(), EffectError>(())
                }
            }
        }))
        .build()?;

    store.subscribe::<MilestoneReached, _>(SubscriberId::new(), |action| {
        tracing::info!(count = action.count, "milestone reached");
    });

    let mut errors = store.unhandled_errors();
    tokio::spawn(async move {
        while let Ok(failure) = errors.recv().await {
            tracing::warn!(action = failure.action.name(), error = %failure.error, "effect failed");
        }
    });

    store.initialize().await;
    // Let the rehydration effect settle before counting.
    tokio::time::sleep(Duration::from_millis(50)).await;
    if args.reset {
        dispatcher.dispatch(CounterAction::Reset);
    }
    tracing::info!(count = counter.state().count, "starting count");

    let producers: Vec<_> = (0..args.producers)
        .map(|producer| {
            let dispatcher = dispatcher.clone();
            let steps = args.steps;
            tokio::spawn(async move {
                for i in 0..steps {
                    // Every seventh step tries to count down and is vetoed.
                    let by = if (i + producer as i64) % 7 == 6 { -1 } else { 1 };
                    dispatcher.dispatch(CounterAction::Step(by));
                    tokio::task::yield_now().await;
                }
            })
        })
        .collect();
    for producer in producers {
        if let Err(e) = producer.await {
            tracing::error!(error = %e, "producer task failed");
        }
    }

    // Give effects and the final save a moment.
    tokio::time::sleep(Duration::from_millis(100)).await;

    let state = counter.state();
    tracing::info!(
        count = state.count,
        milestones = state.milestones,
        file = %args.state_file.display(),
        "done"
    );
    if args.debug {
        for entry in logger.recent(10) {
            tracing::debug!(
                seq = entry.sequence,
                action = entry.name,
                elapsed = %entry.elapsed_display(),
                "recent action"
            );
        }
    }

    store.shutdown();
    Ok(())
}
