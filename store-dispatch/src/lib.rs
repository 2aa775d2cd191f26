//! store-dispatch: ordered action dispatch for in-process state
//!
//! Producers dispatch actions from any thread; the store processes them
//! one at a time, in order, through middlewares, features, subscribers and
//! effects.
//!
//! # Example
//! ```ignore
//! use store_dispatch::prelude::*;
//!
//! #[derive(Action, Debug)]
//! enum CounterAction {
//!     Increment,
//!     Add(i64),
//! }
//!
//! fn reduce(count: &mut i64, action: &CounterAction) -> bool {
//!     match action {
//!         CounterAction::Increment => *count += 1,
//!         CounterAction::Add(n) => *count += n,
//!     }
//!     true
//! }
//!
//! let dispatcher = Dispatcher::new();
//! let counter = Arc::new(StateFeature::new("Counter", 0i64).on(reduce));
//! let store = Store::builder()
//!     .dispatcher(dispatcher.clone())
//!     .feature(counter.clone())
//!     .build()?;
//! store.initialize().await;
//!
//! dispatcher.dispatch(CounterAction::Add(41));
//! dispatcher.dispatch(CounterAction::Increment);
//! assert_eq!(counter.state(), 42);
//! ```

// Re-export everything from core
pub use store_dispatch_core::*;

// Re-export derive macros
pub use store_dispatch_macros::Action;

/// Prelude for convenient imports
pub mod prelude {
    pub use store_dispatch_core::prelude::*;

    // Derive macros
    pub use store_dispatch_macros::Action;
}
