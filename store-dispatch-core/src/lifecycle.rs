//! Store activation state machine
//!
//! `Uninitialized -> Activating -> Active`, monotonic. The queue only drains
//! once the store is `Active`.

use std::sync::atomic::{AtomicU8, Ordering};

use tokio::sync::watch;

/// Where the store is in its one-way activation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum LifecycleState {
    /// Built, middlewares not yet initialized. Actions queue up.
    Uninitialized = 0,
    /// `initialize()` is running.
    Activating = 1,
    /// Draining normally.
    Active = 2,
}

impl LifecycleState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => LifecycleState::Uninitialized,
            1 => LifecycleState::Activating,
            _ => LifecycleState::Active,
        }
    }
}

/// Outcome of trying to start activation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Activation {
    /// The caller won the race and must run activation.
    Started,
    /// Another caller is activating.
    InProgress,
    /// Nothing to do.
    AlreadyActive,
}

pub(crate) struct Lifecycle {
    state: AtomicU8,
    signal: watch::Sender<LifecycleState>,
}

impl Lifecycle {
    pub(crate) fn new() -> Self {
        let (signal, _rx) = watch::channel(LifecycleState::Uninitialized);
        Self {
            state: AtomicU8::new(LifecycleState::Uninitialized as u8),
            signal,
        }
    }

    pub(crate) fn state(&self) -> LifecycleState {
        LifecycleState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub(crate) fn is_active(&self) -> bool {
        self.state() == LifecycleState::Active
    }

    pub(crate) fn begin_activation(&self) -> Activation {
        match self.state.compare_exchange(
            LifecycleState::Uninitialized as u8,
            LifecycleState::Activating as u8,
            Ordering::SeqCst,
            Ordering::SeqCst,
        ) {
            Ok(_) => {
                self.signal.send_replace(LifecycleState::Activating);
                Activation::Started
            }
            Err(current) if current == LifecycleState::Active as u8 => Activation::AlreadyActive,
            Err(_) => Activation::InProgress,
        }
    }

    /// Only called once, by the caller that got [`Activation::Started`].
    pub(crate) fn mark_active(&self) {
        self.state
            .store(LifecycleState::Active as u8, Ordering::SeqCst);
        self.signal.send_replace(LifecycleState::Active);
    }

    /// Resolves once the store is active.
    pub(crate) async fn wait_active(&self) {
        let mut rx = self.signal.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = rx.wait_for(|s| *s == LifecycleState::Active).await;
    }
}

impl std::fmt::Debug for Lifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lifecycle")
            .field("state", &self.state())
            .finish()
    }
}
