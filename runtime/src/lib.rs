//! # Seatbook Runtime
//!
//! The imperative shell around reducers.
//!
//! - [`Store`]: owns a state value, runs the reducer for every action and
//!   executes the returned effects, feeding produced actions back in
//! - [`EffectHandle`]: lets a caller wait until an action and every action it
//!   cascaded into have been fully processed
//! - [`retry`]: exponential backoff for transient storage failures
//! - [`metrics`]: Prometheus exporter for the engine's counters

use seatbook_core::effect::Effect;
use seatbook_core::reducer::Reducer;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{RwLock, broadcast, watch};

pub mod metrics;
pub mod retry;

pub use retry::{RetryPolicy, RetryPolicyBuilder, retry_if};

/// Default capacity of the action broadcast channel.
const ACTION_BROADCAST_CAPACITY: usize = 64;

/// Handle to the effects started by one [`Store::send`].
///
/// Effects that produce actions feed them back into the store under the same
/// handle, so [`EffectHandle::wait`] returns only once the whole cascade has
/// settled.
///
/// # Example
///
/// ```ignore
/// let mut handle = store.send(SelectionAction::Submit { .. }).await;
/// handle.wait().await;
/// // the submission result has been reduced
/// ```
#[derive(Clone)]
pub struct EffectHandle {
    pending: Arc<AtomicUsize>,
    completion: watch::Receiver<()>,
}

impl EffectHandle {
    fn new() -> (Self, EffectTracking) {
        let pending = Arc::new(AtomicUsize::new(0));
        let (notifier, completion) = watch::channel(());

        let handle = Self {
            pending: Arc::clone(&pending),
            completion,
        };
        let tracking = EffectTracking { pending, notifier };

        (handle, tracking)
    }

    /// Number of effects still running.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Wait for every effect in the cascade to complete.
    pub async fn wait(&mut self) {
        while self.pending.load(Ordering::SeqCst) > 0 {
            if self.completion.changed().await.is_err() {
                break;
            }
        }
    }

    /// Wait with an upper bound.
    ///
    /// # Errors
    ///
    /// Returns `Err(())` if the timeout expires first.
    pub async fn wait_with_timeout(&mut self, timeout: Duration) -> Result<(), ()> {
        tokio::time::timeout(timeout, self.wait())
            .await
            .map_err(|_| ())
    }
}

impl std::fmt::Debug for EffectHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EffectHandle")
            .field("pending_effects", &self.pending())
            .finish_non_exhaustive()
    }
}

/// Internal: counter shared by every effect of one cascade.
#[derive(Clone)]
struct EffectTracking {
    pending: Arc<AtomicUsize>,
    notifier: watch::Sender<()>,
}

impl EffectTracking {
    fn increment(&self) {
        self.pending.fetch_add(1, Ordering::SeqCst);
    }

    fn decrement(&self) {
        if self.pending.fetch_sub(1, Ordering::SeqCst) == 1 {
            let _ = self.notifier.send(());
        }
    }
}

/// Internal: decrements the cascade counter when an effect task ends.
struct DecrementGuard(EffectTracking);

impl Drop for DecrementGuard {
    fn drop(&mut self) {
        self.0.decrement();
    }
}

/// Runtime for a reducer.
///
/// State lives behind an async `RwLock`; the write lock is held only while the
/// reducer runs, never while an effect awaits I/O.
pub struct Store<S, A, E, R>
where
    R: Reducer<State = S, Action = A, Environment = E>,
{
    state: Arc<RwLock<S>>,
    reducer: Arc<R>,
    environment: Arc<E>,
    /// Every action produced by an effect is broadcast to observers.
    action_broadcast: broadcast::Sender<A>,
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
            action_broadcast: self.action_broadcast.clone(),
        }
    }
}

impl<S, A, E, R> Store<S, A, E, R>
where
    R: Reducer<State = S, Action = A, Environment = E> + Send + Sync + 'static,
    A: Send + Clone + std::fmt::Debug + 'static,
    S: Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    /// Create a store.
    #[must_use]
    pub fn new(initial_state: S, reducer: R, environment: E) -> Self {
        let (action_broadcast, _) = broadcast::channel(ACTION_BROADCAST_CAPACITY);

        Self {
            state: Arc::new(RwLock::new(initial_state)),
            reducer: Arc::new(reducer),
            environment: Arc::new(environment),
            action_broadcast,
        }
    }

    /// Reduce an action and start its effects.
    #[tracing::instrument(skip(self, action), name = "store_send")]
    pub async fn send(&self, action: A) -> EffectHandle {
        let (handle, tracking) = EffectHandle::new();
        self.dispatch(action, &tracking).await;
        handle
    }

    /// Read from the current state.
    pub async fn state<F, T>(&self, f: F) -> T
    where
        F: FnOnce(&S) -> T,
    {
        let state = self.state.read().await;
        f(&state)
    }

    /// Observe actions produced by effects.
    #[must_use]
    pub fn subscribe_actions(&self) -> broadcast::Receiver<A> {
        self.action_broadcast.subscribe()
    }

    async fn dispatch(&self, action: A, tracking: &EffectTracking) {
        tracing::trace!(?action, "reducing action");
        let effects = {
            let mut state = self.state.write().await;
            self.reducer.reduce(&mut state, action, &self.environment)
        };

        for effect in effects {
            self.execute(effect, tracking.clone());
        }
    }

    fn feed_back(&self, action: A, tracking: EffectTracking) {
        let store = self.clone();
        let _ = store.action_broadcast.send(action.clone());
        tracking.increment();
        tokio::spawn(async move {
            let _guard = DecrementGuard(tracking.clone());
            store.dispatch(action, &tracking).await;
        });
    }

    fn execute(&self, effect: Effect<A>, tracking: EffectTracking) {
        match effect {
            Effect::None => {
                ::metrics::counter!("store.effects.executed", "type" => "none").increment(1);
            },
            Effect::Future(fut) => {
                ::metrics::counter!("store.effects.executed", "type" => "future").increment(1);
                tracking.increment();
                let store = self.clone();
                tokio::spawn(async move {
                    let _guard = DecrementGuard(tracking.clone());
                    if let Some(action) = fut.await {
                        store.feed_back(action, tracking.clone());
                    }
                });
            },
            Effect::Delay { duration, action } => {
                ::metrics::counter!("store.effects.executed", "type" => "delay").increment(1);
                tracking.increment();
                let store = self.clone();
                tokio::spawn(async move {
                    let _guard = DecrementGuard(tracking.clone());
                    tokio::time::sleep(duration).await;
                    store.feed_back(*action, tracking.clone());
                });
            },
            Effect::Parallel(effects) => {
                ::metrics::counter!("store.effects.executed", "type" => "parallel").increment(1);
                for effect in effects {
                    self.execute(effect, tracking.clone());
                }
            },
            Effect::Sequential(effects) => {
                ::metrics::counter!("store.effects.executed", "type" => "sequential").increment(1);
                tracking.increment();
                let store = self.clone();
                tokio::spawn(async move {
                    let _guard = DecrementGuard(tracking.clone());
                    for effect in effects {
                        let (mut step, step_tracking) = EffectHandle::new();
                        store.execute(effect, step_tracking);
                        step.wait().await;
                    }
                });
            },
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use seatbook_core::reducer::Effects;
    use seatbook_core::smallvec;

    #[derive(Clone, Debug, PartialEq)]
    enum Action {
        Start,
        Step(u32),
        Done,
    }

    #[derive(Default)]
    struct Log {
        seen: Vec<String>,
    }

    struct Chain;

    impl Reducer for Chain {
        type State = Log;
        type Action = Action;
        type Environment = ();

        fn reduce(&self, state: &mut Log, action: Action, _env: &()) -> Effects<Action> {
            state.seen.push(format!("{action:?}"));
            match action {
                Action::Start => smallvec![Effect::future(async { Some(Action::Step(1)) })],
                Action::Step(n) if n < 3 => smallvec![Effect::Delay {
                    duration: Duration::from_millis(1),
                    action: Box::new(Action::Step(n + 1)),
                }],
                Action::Step(_) => smallvec![Effect::Sequential(vec![
                    Effect::None,
                    Effect::future(async { Some(Action::Done) }),
                ])],
                Action::Done => smallvec![Effect::None],
            }
        }
    }

    #[tokio::test]
    async fn wait_covers_the_whole_cascade() {
        let store = Store::new(Log::default(), Chain, ());
        let mut handle = store.send(Action::Start).await;
        handle.wait().await;

        let seen = store.state(|s| s.seen.clone()).await;
        assert_eq!(seen, vec!["Start", "Step(1)", "Step(2)", "Step(3)", "Done"]);
        assert_eq!(handle.pending(), 0);
    }

    #[tokio::test]
    async fn produced_actions_are_broadcast() {
        let store = Store::new(Log::default(), Chain, ());
        let mut rx = store.subscribe_actions();

        let mut handle = store.send(Action::Start).await;
        handle.wait().await;

        let mut produced = Vec::new();
        while let Ok(action) = rx.try_recv() {
            produced.push(action);
        }
        assert_eq!(produced.first(), Some(&Action::Step(1)));
        assert_eq!(produced.last(), Some(&Action::Done));
    }
}
