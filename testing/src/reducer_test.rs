//! Ergonomic testing utilities for reducers
//!
//! This module provides a fluent API for testing reducers with readable
//! Given-When-Then syntax. Because reducers may reject an action, a test
//! asserts either on the accepted output (`then_output`) or on the rejection
//! (`then_error`); in the rejected case the harness also checks that the
//! state was left untouched.

#![allow(clippy::module_name_repetitions)] // ReducerTest is the natural name

use studio_credits_core::{effect::Effect, reducer::Reducer};

/// Type alias for state assertion functions
type StateAssertion<S> = Box<dyn FnOnce(&S)>;

/// Type alias for effect assertion functions
type EffectAssertion<A> = Box<dyn FnOnce(&[Effect<A>])>;

/// Type alias for output assertion functions
type OutputAssertion<O> = Box<dyn FnOnce(&O)>;

/// Type alias for error assertion functions
type ErrorAssertion<Err> = Box<dyn FnOnce(&Err)>;

/// Fluent API for testing reducers with Given-When-Then syntax
///
/// # Example
///
/// ```ignore
/// use studio_credits_testing::ReducerTest;
///
/// ReducerTest::new(CreditsReducer::new())
///     .with_env(test_environment())
///     .given_state(state_with_class())
///     .when_action(CreditsAction::BookClass { .. })
///     .then_output(|booked| assert!(booked.transaction_id.is_some()))
///     .then_state(|state| assert_eq!(state.bookings.len(), 1))
///     .run();
/// ```
pub struct ReducerTest<R>
where
    R: Reducer,
{
    reducer: R,
    environment: Option<R::Environment>,
    initial_state: Option<R::State>,
    action: Option<R::Action>,
    state_assertions: Vec<StateAssertion<R::State>>,
    effect_assertions: Vec<EffectAssertion<R::Action>>,
    output_assertions: Vec<OutputAssertion<R::Output>>,
    error_assertions: Vec<ErrorAssertion<R::Error>>,
}

impl<R> ReducerTest<R>
where
    R: Reducer,
    R::State: Clone + PartialEq + std::fmt::Debug,
    R::Error: std::fmt::Debug,
    R::Output: std::fmt::Debug,
{
    /// Create a new reducer test with the given reducer
    #[must_use]
    pub const fn new(reducer: R) -> Self {
        Self {
            reducer,
            environment: None,
            initial_state: None,
            action: None,
            state_assertions: Vec::new(),
            effect_assertions: Vec::new(),
            output_assertions: Vec::new(),
            error_assertions: Vec::new(),
        }
    }

    /// Set the environment for the test
    #[must_use]
    pub fn with_env(mut self, env: R::Environment) -> Self {
        self.environment = Some(env);
        self
    }

    /// Set the initial state (Given)
    #[must_use]
    pub fn given_state(mut self, state: R::State) -> Self {
        self.initial_state = Some(state);
        self
    }

    /// Set the action to test (When)
    #[must_use]
    pub fn when_action(mut self, action: R::Action) -> Self {
        self.action = Some(action);
        self
    }

    /// Add an assertion about the resulting state (Then)
    #[must_use]
    pub fn then_state<F>(mut self, assertion: F) -> Self
    where
        F: FnOnce(&R::State) + 'static,
    {
        self.state_assertions.push(Box::new(assertion));
        self
    }

    /// Add an assertion about the resulting effects (Then)
    #[must_use]
    pub fn then_effects<F>(mut self, assertion: F) -> Self
    where
        F: FnOnce(&[Effect<R::Action>]) + 'static,
    {
        self.effect_assertions.push(Box::new(assertion));
        self
    }

    /// Expect the action to be accepted and inspect its output (Then)
    #[must_use]
    pub fn then_output<F>(mut self, assertion: F) -> Self
    where
        F: FnOnce(&R::Output) + 'static,
    {
        self.output_assertions.push(Box::new(assertion));
        self
    }

    /// Expect the action to be rejected and inspect the error (Then)
    #[must_use]
    pub fn then_error<F>(mut self, assertion: F) -> Self
    where
        F: FnOnce(&R::Error) + 'static,
    {
        self.error_assertions.push(Box::new(assertion));
        self
    }

    /// Run the test and execute all assertions
    ///
    /// # Panics
    ///
    /// Panics if initial state, action, or environment is not set, if the
    /// reducer's verdict does not match the expectations, or if any
    /// assertion fails.
    #[allow(clippy::panic)] // Test code can panic
    #[allow(clippy::expect_used)] // Test code can use expect
    pub fn run(self) {
        let initial = self
            .initial_state
            .expect("Initial state must be set with given_state()");
        let action = self.action.expect("Action must be set with when_action()");
        let env = self
            .environment
            .expect("Environment must be set with with_env()");

        let mut state = initial.clone();
        let expects_error = !self.error_assertions.is_empty();

        match self.reducer.reduce(&mut state, action, &env) {
            Ok(reduced) => {
                assert!(
                    !expects_error,
                    "Expected the action to be rejected, but it was accepted with {:?}",
                    reduced.output
                );
                for assertion in self.output_assertions {
                    assertion(&reduced.output);
                }
                for assertion in self.effect_assertions {
                    assertion(&reduced.effects[..]);
                }
            },
            Err(error) => {
                assert!(
                    expects_error,
                    "Expected the action to be accepted, but it was rejected with {error:?}"
                );
                assert_eq!(
                    state, initial,
                    "A rejected action must leave the state unchanged"
                );
                for assertion in self.error_assertions {
                    assertion(&error);
                }
            },
        }

        for assertion in self.state_assertions {
            assertion(&state);
        }
    }
}

/// Helper assertions for effects
pub mod assertions {
    use studio_credits_core::effect::Effect;

    /// Assert that there are no effects
    ///
    /// # Panics
    ///
    /// Panics if effects is not empty.
    #[allow(clippy::panic)] // Test assertion
    pub fn assert_no_effects<A: std::fmt::Debug>(effects: &[Effect<A>]) {
        assert!(
            effects.is_empty() || matches!(effects, [Effect::None]),
            "Expected no effects, but found {}: {:?}",
            effects.len(),
            effects
        );
    }

    /// Assert the number of effects
    ///
    /// # Panics
    ///
    /// Panics if the number of effects doesn't match expected.
    #[allow(clippy::panic)] // Test assertion
    pub fn assert_effects_count<A>(effects: &[Effect<A>], expected: usize) {
        assert_eq!(
            effects.len(),
            expected,
            "Expected {} effects, but found {}",
            expected,
            effects.len()
        );
    }

    /// Assert that effects contain at least one Future effect
    ///
    /// # Panics
    ///
    /// Panics if no Future effect is found.
    #[allow(clippy::panic)] // Test assertion
    pub fn assert_has_future_effect<A>(effects: &[Effect<A>]) {
        assert!(
            effects.iter().any(|e| matches!(e, Effect::Future(_))),
            "Expected at least one Future effect, but none found"
        );
    }

    /// Collect every action dispatched by the effects, descending into
    /// `Parallel` and `Sequential` groups.
    #[must_use]
    pub fn dispatched_actions<A>(effects: &[Effect<A>]) -> Vec<&A> {
        let mut found = Vec::new();
        for effect in effects {
            match effect {
                Effect::Dispatch(action) => found.push(action.as_ref()),
                Effect::Parallel(inner) | Effect::Sequential(inner) => {
                    found.extend(dispatched_actions(inner));
                },
                Effect::None | Effect::Future(_) => {},
            }
        }
        found
    }

    /// Assert that some dispatched action satisfies `predicate`
    ///
    /// # Panics
    ///
    /// Panics if no dispatched action matches.
    #[allow(clippy::panic)] // Test assertion
    pub fn assert_dispatches<A, P>(effects: &[Effect<A>], predicate: P)
    where
        A: std::fmt::Debug,
        P: Fn(&A) -> bool,
    {
        let actions = dispatched_actions(effects);
        assert!(
            actions.iter().any(|action| predicate(action)),
            "Expected a matching dispatched action, found {actions:?}"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use studio_credits_core::reducer::Reduced;

    #[derive(Clone, Debug, PartialEq)]
    struct TestState {
        count: i32,
    }

    #[derive(Clone, Debug)]
    enum TestAction {
        Increment,
        Decrement,
    }

    struct TestReducer;

    struct TestEnv;

    impl Reducer for TestReducer {
        type State = TestState;
        type Action = TestAction;
        type Environment = TestEnv;
        type Output = i32;
        type Error = String;

        fn reduce(
            &self,
            state: &mut Self::State,
            action: Self::Action,
            _env: &Self::Environment,
        ) -> Result<Reduced<i32, TestAction>, String> {
            match action {
                TestAction::Increment => {
                    state.count += 1;
                    Ok(Reduced::new(state.count)
                        .with_effect(Effect::dispatch(TestAction::Decrement)))
                },
                TestAction::Decrement => {
                    if state.count == 0 {
                        return Err("count is already zero".to_string());
                    }
                    state.count -= 1;
                    Ok(Reduced::new(state.count))
                },
            }
        }
    }

    #[test]
    fn test_reducer_test_increment() {
        ReducerTest::new(TestReducer)
            .with_env(TestEnv)
            .given_state(TestState { count: 0 })
            .when_action(TestAction::Increment)
            .then_output(|count| assert_eq!(*count, 1))
            .then_state(|state| {
                assert_eq!(state.count, 1);
            })
            .then_effects(|effects| {
                assertions::assert_effects_count(effects, 1);
                assertions::assert_dispatches(effects, |a| {
                    matches!(a, TestAction::Decrement)
                });
            })
            .run();
    }

    #[test]
    fn test_reducer_test_rejection() {
        ReducerTest::new(TestReducer)
            .with_env(TestEnv)
            .given_state(TestState { count: 0 })
            .when_action(TestAction::Decrement)
            .then_error(|error| assert!(error.contains("zero")))
            .then_state(|state| assert_eq!(state.count, 0))
            .run();
    }

    #[test]
    fn test_assertions_no_effects() {
        assertions::assert_no_effects::<TestAction>(&[Effect::None]);
        assertions::assert_no_effects::<TestAction>(&[]);
    }

    #[test]
    fn test_dispatched_actions_descends_into_groups() {
        let effects = vec![Effect::chain(vec![
            Effect::dispatch(TestAction::Increment),
            Effect::merge(vec![Effect::dispatch(TestAction::Decrement)]),
        ])];
        assert_eq!(assertions::dispatched_actions(&effects).len(), 2);
    }
}
