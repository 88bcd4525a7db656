//! # Studio Credits Core
//!
//! Core traits and types shared by every crate in the workspace.
//!
//! Business logic is written as reducers: a reducer receives the current
//! state, an action, and its injected environment, validates the action,
//! mutates the state, and returns descriptions of the side effects that must
//! run *after* the change has been committed.
//!
//! ## Core Concepts
//!
//! - **State**: Owned domain data guarded by the runtime
//! - **Action**: Every input a reducer accepts (commands and feedback)
//! - **Reducer**: `(State, Action, Environment) → Result<(Output, Effects), Error>`
//! - **Effect**: Side effect descriptions (not execution)
//! - **Environment**: Injected dependencies (clock, notifier, policy)
//!
//! ## Example
//!
//! ```
//! use studio_credits_core::effect::Effect;
//! use studio_credits_core::reducer::{Reduced, Reducer};
//!
//! struct Counter;
//!
//! impl Reducer for Counter {
//!     type State = u32;
//!     type Action = u32;
//!     type Environment = ();
//!     type Output = u32;
//!     type Error = String;
//!
//!     fn reduce(
//!         &self,
//!         state: &mut u32,
//!         action: u32,
//!         _env: &(),
//!     ) -> Result<Reduced<u32, u32>, String> {
//!         let next = state.checked_add(action).ok_or("overflow")?;
//!         *state = next;
//!         Ok(Reduced::new(next).with_effect(Effect::None))
//!     }
//! }
//!
//! let mut state = 1;
//! let reduced = Counter.reduce(&mut state, 2, &()).unwrap();
//! assert_eq!(reduced.output, 3);
//! ```

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use serde::{Deserialize, Serialize};
pub use smallvec::{smallvec, SmallVec};

/// Inline capacity for effect lists returned by reducers.
pub const EFFECT_CAPACITY: usize = 4;

/// Effects produced by a single reduction.
pub type Effects<Action> = SmallVec<[effect::Effect<Action>; EFFECT_CAPACITY]>;

/// Reducer module - The core trait for business logic
pub mod reducer {
    use super::{effect::Effect, Effects};

    /// The Reducer trait - core abstraction for business logic
    ///
    /// A reducer either accepts an action, producing an `Output` for the
    /// caller plus a list of effects, or rejects it with an `Error`.
    ///
    /// # Atomicity
    ///
    /// Implementations must leave `state` untouched when they return `Err`.
    /// The idiomatic way to honor this is validate-then-apply: run every
    /// precondition check against `&State` first and only mutate once all of
    /// them have passed. The runtime relies on this to give each action
    /// all-or-nothing semantics.
    pub trait Reducer {
        /// The state type this reducer operates on
        type State;

        /// The action type this reducer processes
        type Action;

        /// The environment type with injected dependencies
        type Environment;

        /// Value handed back to the caller when an action is accepted
        type Output;

        /// Rejection reason when an action is refused
        type Error;

        /// Reduce an action into state changes and effects
        ///
        /// # Errors
        ///
        /// Returns `Self::Error` when the action violates a precondition. The
        /// state must not have been modified in that case.
        fn reduce(
            &self,
            state: &mut Self::State,
            action: Self::Action,
            env: &Self::Environment,
        ) -> Result<Reduced<Self::Output, Self::Action>, Self::Error>;
    }

    /// Result of an accepted action: the caller-visible output and the
    /// effects to run once the state change is committed.
    #[derive(Debug)]
    pub struct Reduced<Output, Action> {
        /// Value returned to the caller
        pub output: Output,
        /// Post-commit effects
        pub effects: Effects<Action>,
    }

    impl<Output, Action> Reduced<Output, Action> {
        /// Creates a reduction with no effects
        #[must_use]
        pub fn new(output: Output) -> Self {
            Self {
                output,
                effects: Effects::new(),
            }
        }

        /// Appends one effect, skipping `Effect::None`
        #[must_use]
        pub fn with_effect(mut self, effect: Effect<Action>) -> Self {
            if !effect.is_none() {
                self.effects.push(effect);
            }
            self
        }

        /// Appends several effects, skipping `Effect::None`
        #[must_use]
        pub fn with_effects<I>(mut self, effects: I) -> Self
        where
            I: IntoIterator<Item = Effect<Action>>,
        {
            self.effects
                .extend(effects.into_iter().filter(|effect| !effect.is_none()));
            self
        }

        /// Transforms the output, keeping the effects
        #[must_use]
        pub fn map<O, F>(self, f: F) -> Reduced<O, Action>
        where
            F: FnOnce(Output) -> O,
        {
            Reduced {
                output: f(self.output),
                effects: self.effects,
            }
        }
    }
}

/// Effect module - Side effect descriptions
///
/// Effects are values returned from reducers. The runtime executes them only
/// after the state change that produced them is visible to other callers.
pub mod effect {
    use std::future::Future;
    use std::pin::Pin;

    /// Effect type - describes a side effect to be executed
    pub enum Effect<Action> {
        /// No-op effect
        None,

        /// Run effects in parallel
        Parallel(Vec<Effect<Action>>),

        /// Run effects sequentially
        Sequential(Vec<Effect<Action>>),

        /// Feed an action back into the same store once the current action
        /// has committed. The follow-up runs in its own transaction.
        Dispatch(Box<Action>),

        /// Arbitrary async computation, detached from the caller
        ///
        /// Returns `Option<Action>` - if Some, the action is fed back into the reducer
        Future(Pin<Box<dyn Future<Output = Option<Action>> + Send>>),
    }

    // Manual Debug implementation since Future doesn't implement Debug
    impl<Action> std::fmt::Debug for Effect<Action>
    where
        Action: std::fmt::Debug,
    {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            match self {
                Effect::None => write!(f, "Effect::None"),
                Effect::Parallel(effects) => {
                    f.debug_tuple("Effect::Parallel").field(effects).finish()
                },
                Effect::Sequential(effects) => {
                    f.debug_tuple("Effect::Sequential").field(effects).finish()
                },
                Effect::Dispatch(action) => {
                    f.debug_tuple("Effect::Dispatch").field(action).finish()
                },
                Effect::Future(_) => write!(f, "Effect::Future(<future>)"),
            }
        }
    }

    impl<Action> Effect<Action> {
        /// Combine effects to run in parallel
        #[must_use]
        pub const fn merge(effects: Vec<Effect<Action>>) -> Effect<Action> {
            Effect::Parallel(effects)
        }

        /// Chain effects to run sequentially
        #[must_use]
        pub const fn chain(effects: Vec<Effect<Action>>) -> Effect<Action> {
            Effect::Sequential(effects)
        }

        /// Wrap an action for post-commit dispatch
        #[must_use]
        pub fn dispatch(action: Action) -> Effect<Action> {
            Effect::Dispatch(Box::new(action))
        }

        /// Returns true for `Effect::None`
        #[must_use]
        pub const fn is_none(&self) -> bool {
            matches!(self, Effect::None)
        }

        /// Returns the dispatched action, if this is a `Dispatch` effect
        #[must_use]
        pub fn as_dispatch(&self) -> Option<&Action> {
            match self {
                Effect::Dispatch(action) => Some(action),
                _ => None,
            }
        }
    }
}

/// Environment module - Dependency injection traits
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// Grace periods, refund tiers and discount windows are all computed
    /// against an injected clock so that batch jobs can be exercised at an
    /// arbitrary "now" without sleeping.
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Production clock backed by the system time
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::effect::Effect;
    use super::reducer::Reduced;

    #[test]
    fn reduced_skips_none_effects() {
        let reduced: Reduced<(), u8> = Reduced::new(())
            .with_effect(Effect::None)
            .with_effects([Effect::None, Effect::dispatch(7)]);

        assert_eq!(reduced.effects.len(), 1);
        assert_eq!(reduced.effects[0].as_dispatch(), Some(&7));
    }

    #[test]
    fn reduced_map_keeps_effects() {
        let reduced: Reduced<u8, u8> = Reduced::new(2).with_effect(Effect::dispatch(1));
        let mapped = reduced.map(|n| u32::from(n) * 10);

        assert_eq!(mapped.output, 20);
        assert_eq!(mapped.effects.len(), 1);
    }

    #[test]
    fn future_effect_yields_its_follow_up() {
        let effect: Effect<u8> = Effect::Future(Box::pin(async { Some(3) }));
        let Effect::Future(fut) = effect else {
            unreachable!("constructed as a future");
        };
        assert_eq!(tokio_test::block_on(fut), Some(3));
    }

    #[test]
    fn effect_debug_hides_futures() {
        let effect: Effect<u8> = Effect::Future(Box::pin(async { None }));
        assert_eq!(format!("{effect:?}"), "Effect::Future(<future>)");
    }
}
