//! # Studio Credits Runtime
//!
//! The [`Store`](store::Store) owns a reducer's state and is the transaction
//! boundary of the engine.
//!
//! ## Execution model
//!
//! - Every action is reduced while holding the state's write lock, so
//!   "check capacity, then increment" and "check balance, then debit" can
//!   never interleave across callers.
//! - A rejected action leaves the state untouched (reducers validate before
//!   they mutate) and its error is returned to the caller.
//! - Effects run only after the write lock is released. `Dispatch` effects
//!   re-enter the store as independent transactions; `Future` effects are
//!   detached tasks tracked so that [`Store::settle`](store::Store::settle)
//!   and [`Store::shutdown`](store::Store::shutdown) can wait for them.
//!
//! ## Example
//!
//! ```ignore
//! use studio_credits_runtime::Store;
//!
//! let store = Store::new(initial_state, reducer, environment);
//! let output = store.send(Action::DoSomething).await?;
//! let value = store.state(|s| s.some_field).await;
//! ```

use studio_credits_core::{effect::Effect, reducer::Reducer};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, RwLock};

/// Prometheus metrics for observability
pub mod metrics;

/// Error types for the Store runtime
pub mod error {
    use thiserror::Error;

    /// Errors raised by the Store itself (as opposed to reducer rejections)
    #[derive(Error, Debug, Clone, PartialEq, Eq)]
    pub enum StoreError {
        /// Store is shutting down and not accepting new actions
        #[error("Store is shutting down")]
        ShutdownInProgress,

        /// Shutdown timed out waiting for effects to complete
        #[error("Shutdown timed out with {0} effects still running")]
        ShutdownTimeout(usize),
    }
}

pub use error::StoreError;

/// Decrements the pending-effect counter when a detached effect finishes,
/// waking `settle()` callers once the store is idle.
struct PendingGuard {
    pending: Arc<AtomicUsize>,
    idle: Arc<Notify>,
}

impl PendingGuard {
    fn acquire(pending: &Arc<AtomicUsize>, idle: &Arc<Notify>) -> Self {
        pending.fetch_add(1, Ordering::AcqRel);
        Self {
            pending: Arc::clone(pending),
            idle: Arc::clone(idle),
        }
    }
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        if self.pending.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.idle.notify_waiters();
        }
    }
}

/// Store runtime for coordinating reducer execution and effect handling.
pub mod store {
    use super::{
        Arc, AtomicBool, AtomicUsize, Duration, Effect, Notify, Ordering, PendingGuard, Reducer,
        RwLock, StoreError,
    };
    use std::future::Future;
    use std::pin::Pin;

    /// The Store - runtime coordinator for a reducer
    ///
    /// Cloning a `Store` is cheap; clones share the same state, reducer and
    /// environment.
    ///
    /// # Type Parameters
    ///
    /// - `S`: State type
    /// - `A`: Action type
    /// - `E`: Environment type
    /// - `R`: Reducer implementation
    pub struct Store<S, A, E, R>
    where
        R: Reducer<State = S, Action = A, Environment = E>,
    {
        state: Arc<RwLock<S>>,
        reducer: Arc<R>,
        environment: Arc<E>,
        shutdown: Arc<AtomicBool>,
        pending_effects: Arc<AtomicUsize>,
        idle: Arc<Notify>,
    }

    impl<S, A, E, R> Clone for Store<S, A, E, R>
    where
        R: Reducer<State = S, Action = A, Environment = E>,
    {
        fn clone(&self) -> Self {
            Self {
                state: Arc::clone(&self.state),
                reducer: Arc::clone(&self.reducer),
                environment: Arc::clone(&self.environment),
                shutdown: Arc::clone(&self.shutdown),
                pending_effects: Arc::clone(&self.pending_effects),
                idle: Arc::clone(&self.idle),
            }
        }
    }

    impl<S, A, E, R> Store<S, A, E, R>
    where
        R: Reducer<State = S, Action = A, Environment = E> + Send + Sync + 'static,
        R::Output: Send,
        R::Error: From<StoreError> + std::fmt::Display + Send,
        A: Send + std::fmt::Debug + 'static,
        S: Send + Sync + 'static,
        E: Send + Sync + 'static,
    {
        /// Create a new store with initial state, reducer, and environment
        #[must_use]
        pub fn new(initial_state: S, reducer: R, environment: E) -> Self {
            Self {
                state: Arc::new(RwLock::new(initial_state)),
                reducer: Arc::new(reducer),
                environment: Arc::new(environment),
                shutdown: Arc::new(AtomicBool::new(false)),
                pending_effects: Arc::new(AtomicUsize::new(0)),
                idle: Arc::new(Notify::new()),
            }
        }

        /// Injected environment shared with the reducer
        #[must_use]
        pub fn environment(&self) -> &E {
            &self.environment
        }

        /// Send an action through the reducer as one atomic unit.
        ///
        /// The returned future resolves once the state change has committed
        /// and all `Dispatch` effects (and their own dispatches) have been
        /// applied. Detached `Future` effects may still be running; use
        /// [`settle`](Self::settle) to wait for them.
        ///
        /// # Errors
        ///
        /// - The reducer's rejection, with state unchanged
        /// - [`StoreError::ShutdownInProgress`] (converted) after `shutdown()`
        #[tracing::instrument(skip(self, action), name = "store_send")]
        pub async fn send(&self, action: A) -> Result<R::Output, R::Error> {
            if self.shutdown.load(Ordering::Acquire) {
                tracing::warn!("Rejected action: store is shutting down");
                metrics::counter!("store_shutdown_rejected_actions_total").increment(1);
                return Err(StoreError::ShutdownInProgress.into());
            }

            metrics::counter!("store_commands_total").increment(1);

            let reduced = {
                let mut state = self.state.write().await;
                tracing::trace!("Acquired write lock on state");

                let start = std::time::Instant::now();
                let result = self.reducer.reduce(&mut state, action, &self.environment);
                metrics::histogram!("store_reducer_duration_seconds")
                    .record(start.elapsed().as_secs_f64());
                result
            };

            let reduced = match reduced {
                Ok(reduced) => reduced,
                Err(error) => {
                    tracing::debug!(%error, "Action rejected by reducer");
                    metrics::counter!("store_commands_rejected_total").increment(1);
                    return Err(error);
                },
            };

            tracing::trace!("Executing {} effects", reduced.effects.len());
            for effect in reduced.effects {
                self.execute_effect(effect).await;
            }

            Ok(reduced.output)
        }

        /// Read current state via a closure
        ///
        /// ```ignore
        /// let booking_count = store.state(|s| s.bookings.len()).await;
        /// ```
        pub async fn state<F, T>(&self, f: F) -> T
        where
            F: FnOnce(&S) -> T,
        {
            let state = self.state.read().await;
            f(&state)
        }

        /// Number of detached effects still running
        #[must_use]
        pub fn pending_effects(&self) -> usize {
            self.pending_effects.load(Ordering::Acquire)
        }

        /// Wait until every detached effect has finished.
        pub async fn settle(&self) {
            loop {
                let notified = self.idle.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();

                if self.pending_effects.load(Ordering::Acquire) == 0 {
                    return;
                }
                notified.await;
            }
        }

        /// Stop accepting actions and wait for in-flight effects.
        ///
        /// # Errors
        ///
        /// Returns [`StoreError::ShutdownTimeout`] if effects are still
        /// running when `timeout` elapses.
        pub async fn shutdown(&self, timeout: Duration) -> Result<(), StoreError> {
            self.shutdown.store(true, Ordering::Release);
            tracing::info!(
                pending = self.pending_effects(),
                "Store shutting down, waiting for effects"
            );

            if tokio::time::timeout(timeout, self.settle()).await.is_err() {
                let remaining = self.pending_effects();
                tracing::error!(remaining, "Shutdown timed out");
                return Err(StoreError::ShutdownTimeout(remaining));
            }

            tracing::info!("Store shutdown complete");
            Ok(())
        }

        fn execute_effect(&self, effect: Effect<A>) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
            Box::pin(async move {
                match effect {
                    Effect::None => {},
                    Effect::Sequential(effects) => {
                        for effect in effects {
                            self.execute_effect(effect).await;
                        }
                    },
                    Effect::Parallel(effects) => {
                        futures::future::join_all(
                            effects.into_iter().map(|effect| self.execute_effect(effect)),
                        )
                        .await;
                    },
                    Effect::Dispatch(action) => {
                        metrics::counter!("store_effects_executed_total", "kind" => "dispatch")
                            .increment(1);
                        let action = *action;
                        let description = format!("{action:?}");
                        if let Err(error) = self.send(action).await {
                            metrics::counter!("store_effects_failed_total").increment(1);
                            tracing::warn!(
                                %error,
                                action = %description,
                                "Dispatched action was rejected"
                            );
                        }
                    },
                    Effect::Future(fut) => {
                        metrics::counter!("store_effects_executed_total", "kind" => "future")
                            .increment(1);
                        let guard = PendingGuard::acquire(&self.pending_effects, &self.idle);
                        let store = self.clone();
                        tokio::spawn(async move {
                            let _guard = guard;
                            if let Some(action) = fut.await {
                                if let Err(error) = store.send(action).await {
                                    metrics::counter!("store_effects_failed_total").increment(1);
                                    tracing::warn!(%error, "Feedback action was rejected");
                                }
                            }
                        });
                    },
                }
            })
        }
    }
}

pub use store::Store;
