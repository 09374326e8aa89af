//! Given-When-Then harness for reducers.
//!
//! ```ignore
//! ReducerTest::new(SelectionReducer)
//!     .with_env(env)
//!     .given_state(SelectionState::default())
//!     .given_actions([select(seat_a)])
//!     .when_action(select(seat_b))
//!     .then_state(|s| assert_eq!(s.selected_seats(), vec![seat_a]))
//!     .then_effects(assertions::assert_no_effects)
//!     .run();
//! ```

#![allow(clippy::module_name_repetitions)]

use seatbook_core::{effect::Effect, reducer::Reducer};

type StateAssertion<S> = Box<dyn FnOnce(&S)>;

type EffectAssertion<A> = Box<dyn FnOnce(&[Effect<A>])>;

/// Fluent reducer test.
///
/// Actions passed to [`ReducerTest::given_actions`] are reduced first and
/// their effects discarded; only the effects of the `when` action are
/// asserted on.
pub struct ReducerTest<R, S, A, E>
where
    R: Reducer<State = S, Action = A, Environment = E>,
{
    reducer: R,
    environment: Option<E>,
    initial_state: Option<S>,
    setup: Vec<A>,
    action: Option<A>,
    state_assertions: Vec<StateAssertion<S>>,
    effect_assertions: Vec<EffectAssertion<A>>,
}

impl<R, S, A, E> ReducerTest<R, S, A, E>
where
    R: Reducer<State = S, Action = A, Environment = E>,
{
    /// Start a test for `reducer`.
    #[must_use]
    pub const fn new(reducer: R) -> Self {
        Self {
            reducer,
            environment: None,
            initial_state: None,
            setup: Vec::new(),
            action: None,
            state_assertions: Vec::new(),
            effect_assertions: Vec::new(),
        }
    }

    /// Environment passed to every reduction.
    #[must_use]
    pub fn with_env(mut self, env: E) -> Self {
        self.environment = Some(env);
        self
    }

    /// Starting state.
    #[must_use]
    pub fn given_state(mut self, state: S) -> Self {
        self.initial_state = Some(state);
        self
    }

    /// Actions that bring the state into position before the `when` action.
    #[must_use]
    pub fn given_actions(mut self, actions: impl IntoIterator<Item = A>) -> Self {
        self.setup.extend(actions);
        self
    }

    /// The action under test.
    #[must_use]
    pub fn when_action(mut self, action: A) -> Self {
        self.action = Some(action);
        self
    }

    /// Assert on the state after the `when` action.
    #[must_use]
    pub fn then_state<F>(mut self, assertion: F) -> Self
    where
        F: FnOnce(&S) + 'static,
    {
        self.state_assertions.push(Box::new(assertion));
        self
    }

    /// Assert on the effects of the `when` action.
    #[must_use]
    pub fn then_effects<F>(mut self, assertion: F) -> Self
    where
        F: FnOnce(&[Effect<A>]) + 'static,
    {
        self.effect_assertions.push(Box::new(assertion));
        self
    }

    /// Execute the test.
    ///
    /// # Panics
    ///
    /// Panics when state, environment or action were not set, or when an
    /// assertion fails.
    #[allow(clippy::expect_used)]
    pub fn run(self) {
        let mut state = self
            .initial_state
            .expect("initial state must be set with given_state()");
        let env = self
            .environment
            .expect("environment must be set with with_env()");
        let action = self.action.expect("action must be set with when_action()");

        for setup in self.setup {
            let _ = self.reducer.reduce(&mut state, setup, &env);
        }

        let effects = self.reducer.reduce(&mut state, action, &env);

        for assertion in self.state_assertions {
            assertion(&state);
        }
        for assertion in self.effect_assertions {
            assertion(&effects);
        }
    }
}

/// Effect assertions.
pub mod assertions {
    use seatbook_core::effect::Effect;

    /// No effect other than `Effect::None`.
    ///
    /// # Panics
    ///
    /// When a real effect is present.
    pub fn assert_no_effects<A: std::fmt::Debug>(effects: &[Effect<A>]) {
        assert!(
            effects.iter().all(Effect::is_none),
            "expected no effects, found {effects:?}"
        );
    }

    /// At least one `Effect::Future`.
    ///
    /// # Panics
    ///
    /// When no future effect is present.
    pub fn assert_has_future_effect<A>(effects: &[Effect<A>]) {
        assert!(
            effects.iter().any(|e| matches!(e, Effect::Future(_))),
            "expected at least one Future effect"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use seatbook_core::reducer::Effects;
    use seatbook_core::smallvec;

    #[derive(Clone, Debug, Default)]
    struct Tally {
        count: i32,
    }

    #[derive(Clone, Debug)]
    enum TallyAction {
        Add(i32),
        Flush,
    }

    struct TallyReducer;

    impl Reducer for TallyReducer {
        type State = Tally;
        type Action = TallyAction;
        type Environment = ();

        fn reduce(
            &self,
            state: &mut Tally,
            action: TallyAction,
            _env: &(),
        ) -> Effects<TallyAction> {
            match action {
                TallyAction::Add(n) => {
                    state.count += n;
                    smallvec![Effect::None]
                },
                TallyAction::Flush => {
                    smallvec![Effect::future(async { Some(TallyAction::Add(0)) })]
                },
            }
        }
    }

    #[test]
    fn setup_actions_run_before_the_action_under_test() {
        ReducerTest::new(TallyReducer)
            .with_env(())
            .given_state(Tally::default())
            .given_actions([TallyAction::Add(2), TallyAction::Add(3)])
            .when_action(TallyAction::Add(1))
            .then_state(|s| assert_eq!(s.count, 6))
            .then_effects(assertions::assert_no_effects)
            .run();
    }

    #[test]
    fn future_effects_are_visible() {
        ReducerTest::new(TallyReducer)
            .with_env(())
            .given_state(Tally::default())
            .when_action(TallyAction::Flush)
            .then_effects(assertions::assert_has_future_effect)
            .run();
    }
}
