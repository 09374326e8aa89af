//! # Seatbook Core
//!
//! Domain model and contracts for the seatbook reservation engine.
//!
//! The engine keeps every diner's seat map consistent with the authoritative
//! seat state while many diners and staff members mutate it concurrently.
//! This crate holds everything that is pure data or pure contract:
//!
//! - [`types`]: identifiers, status enumerations, versions and records
//! - [`seat_map`]: the snapshot returned by the state store
//! - [`mutation`]: the closed set of writes accepted by the state store
//! - [`change`]: change events delivered through the change feed
//! - [`error`]: the error taxonomy shared by every layer
//! - [`store`], [`change_feed`], [`identity`]: the collaborator traits
//! - [`reducer`], [`effect`], [`environment`]: the functional-core primitives
//!   used by per-viewer state machines
//!
//! ## Architecture
//!
//! - Functional Core, Imperative Shell
//! - All seat writes go through [`store::SeatStore::apply_mutation`]
//! - Every table and seat carries a [`types::Version`]; consumers merge by
//!   version, never by arrival order

pub mod change;
pub mod change_feed;
pub mod error;
pub mod identity;
pub mod mutation;
pub mod seat_map;
pub mod store;
pub mod types;

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use serde::{Deserialize, Serialize};
pub use smallvec::{SmallVec, smallvec};

/// Reducer module - the core trait for per-viewer business logic
///
/// Reducers are pure functions: `(State, Action, Environment) → (State, Effects)`.
pub mod reducer {
    use super::effect::Effect;
    use smallvec::SmallVec;

    /// Effects returned by a single reduction.
    ///
    /// Most reductions produce zero or one effect, so four inline slots avoid
    /// a heap allocation on the hot path.
    pub type Effects<Action> = SmallVec<[Effect<Action>; 4]>;

    /// The Reducer trait
    ///
    /// # Example
    ///
    /// ```ignore
    /// impl Reducer for SelectionReducer {
    ///     type State = SelectionState;
    ///     type Action = SelectionAction;
    ///     type Environment = SelectionEnvironment;
    ///
    ///     fn reduce(
    ///         &self,
    ///         state: &mut SelectionState,
    ///         action: SelectionAction,
    ///         env: &SelectionEnvironment,
    ///     ) -> Effects<SelectionAction> {
    ///         smallvec![Effect::None]
    ///     }
    /// }
    /// ```
    pub trait Reducer {
        /// The state type this reducer operates on
        type State;

        /// The action type this reducer processes
        type Action;

        /// The environment type with injected dependencies
        type Environment;

        /// Reduce an action into state changes and effects.
        ///
        /// Validates the action, updates state in place and returns effect
        /// descriptions for the runtime to execute.
        fn reduce(
            &self,
            state: &mut Self::State,
            action: Self::Action,
            env: &Self::Environment,
        ) -> Effects<Self::Action>;
    }
}

/// Effect module - side effect descriptions
///
/// Effects are values returned by reducers. The runtime executes them and
/// feeds any resulting action back into the reducer.
pub mod effect {
    use std::future::Future;
    use std::pin::Pin;
    use std::time::Duration;

    /// A side effect to be executed by the runtime.
    pub enum Effect<Action> {
        /// No-op effect
        None,

        /// Run effects concurrently
        Parallel(Vec<Effect<Action>>),

        /// Run effects one after another
        Sequential(Vec<Effect<Action>>),

        /// Dispatch an action after a delay
        Delay {
            /// How long to wait
            duration: Duration,
            /// Action to dispatch after the delay
            action: Box<Action>,
        },

        /// Arbitrary async computation.
        ///
        /// If it resolves to `Some(action)`, the action is fed back into the reducer.
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
                Effect::Delay { duration, action } => f
                    .debug_struct("Effect::Delay")
                    .field("duration", duration)
                    .field("action", action)
                    .finish(),
                Effect::Future(_) => write!(f, "Effect::Future(<future>)"),
            }
        }
    }

    impl<Action> Effect<Action> {
        /// Wrap an async computation that may produce a follow-up action.
        pub fn future<F>(fut: F) -> Self
        where
            F: Future<Output = Option<Action>> + Send + 'static,
        {
            Effect::Future(Box::pin(fut))
        }

        /// Whether this effect does nothing.
        #[must_use]
        pub const fn is_none(&self) -> bool {
            matches!(self, Effect::None)
        }
    }
}

/// Environment module - injected time source
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time for testability.
    ///
    /// Booking validation ("not in the past") and slot expiry both read the
    /// clock, so tests pin it with a fixed implementation.
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Wall-clock time.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}
