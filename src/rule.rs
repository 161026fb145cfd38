//! Reactive rules: "whenever one of these conditions fires and the guard
//! holds, run this action".
//!
//! A [`Rule`] is a [`Supervised`] loop whose body races on all of the
//! rule's conditions, evaluates the guard, and runs the action while the
//! race is still held. The notifier that woke the rule therefore returns
//! only after the action finished.
//!
//! Each iteration registers from scratch before it suspends, and the next
//! iteration begins in the same poll in which the previous one released
//! its notifier, so consecutive broadcasts are never missed.
//!
//! ```ignore
//! let rule = Rule::builder()
//!     .on(&dirty)
//!     .on(&tick)
//!     .guard(move || enabled.load(Ordering::SeqCst))
//!     .named("flush")
//!     .build(move |_firing| {
//!         let store = store.clone();
//!         async move { store.flush().await.context("flush failed") }
//!     })?;
//!
//! let _handle = rule.start().await;
//! ```

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{Error, ErrorKind, Result};
use crate::runtime::{CancelHandle, TaskHandle};
use crate::supervision::{LoopConfig, LoopStats, Supervised};
use crate::sync::{Condition, Race, WaiterToken};
use crate::tracing_compat::{debug, trace};

type Guard = dyn Fn() -> bool + Send + Sync;

/// What woke a rule, handed to its action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Firing {
    /// Index of the condition that fired, in the order they were added.
    pub index: usize,
    /// The rule's registration for this iteration.
    ///
    /// A broadcast made by the action itself skips this registration
    /// automatically. Pass the token to
    /// [`ConditionGuard::notify_all_except`](crate::sync::ConditionGuard::notify_all_except)
    /// when the action hands the broadcast to another task.
    pub token: WaiterToken,
}

/// A supervised loop reacting to a set of conditions.
pub struct Rule {
    conditions: Arc<[Condition]>,
    looped: Supervised,
    instances: Mutex<Vec<CancelHandle>>,
}

impl Rule {
    /// Starts building a rule.
    #[must_use]
    pub fn builder() -> RuleBuilder {
        RuleBuilder::default()
    }

    /// Starts one more instance of the rule.
    ///
    /// Returns once the instance is registered on every condition.
    pub async fn start(&self) -> TaskHandle {
        let handle = self.looped.start().await;
        let mut instances = self.instances.lock();
        instances.retain(|instance| !instance.is_finished());
        instances.push(handle.cancel_handle());
        handle
    }

    /// Cancels every instance started so far.
    pub fn stop(&self) {
        let instances = std::mem::take(&mut *self.instances.lock());
        debug!(
            rule = %self.looped.config().display_name(),
            instances = instances.len(),
            "stopping rule"
        );
        for instance in instances {
            instance.cancel();
        }
    }

    /// Instances started and not yet terminated.
    #[must_use]
    pub fn instances(&self) -> usize {
        self.instances
            .lock()
            .iter()
            .filter(|instance| !instance.is_finished())
            .count()
    }

    /// The conditions this rule reacts to.
    #[must_use]
    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    /// Loop counters summed over every instance.
    ///
    /// Iterations stopped by a false guard count as completed.
    #[must_use]
    pub fn stats(&self) -> LoopStats {
        self.looped.stats()
    }
}

impl fmt::Debug for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rule")
            .field("name", &self.looped.config().display_name())
            .field("conditions", &self.conditions.len())
            .field("instances", &self.instances())
            .finish()
    }
}

/// Builder for [`Rule`].
#[derive(Default)]
#[must_use = "a rule builder does nothing until built"]
pub struct RuleBuilder {
    conditions: Vec<Condition>,
    guard: Option<Arc<Guard>>,
    config: LoopConfig,
}

impl RuleBuilder {
    /// Adds a condition the rule reacts to.
    pub fn on(mut self, condition: &Condition) -> Self {
        self.conditions.push(condition.clone());
        self
    }

    /// Sets the predicate checked after every wake. Defaults to always true.
    ///
    /// The guard should be quick and side-effect free; it runs while the
    /// notifier is waiting.
    pub fn guard<G>(mut self, guard: G) -> Self
    where
        G: Fn() -> bool + Send + Sync + 'static,
    {
        self.guard = Some(Arc::new(guard));
        self
    }

    /// Sets the name used in log events.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.config.name = Some(name.into());
        self
    }

    /// Replaces the loop configuration.
    pub fn with_config(mut self, config: LoopConfig) -> Self {
        self.config = config;
        self
    }

    /// Builds the rule around `action`.
    ///
    /// # Errors
    ///
    /// [`ErrorKind::InvalidRule`] if no condition was added.
    pub fn build<F, Fut>(self, action: F) -> Result<Rule>
    where
        F: Fn(Firing) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        if self.conditions.is_empty() {
            return Err(Error::new(ErrorKind::InvalidRule)
                .with_message("a rule needs at least one condition"));
        }
        let conditions: Arc<[Condition]> = self.conditions.into();
        let guard = self.guard;
        let action = Arc::new(action);

        let body_conditions = Arc::clone(&conditions);
        let looped = Supervised::new(move || {
            let race = Race::register(&body_conditions);
            let guard = guard.clone();
            let action = Arc::clone(&action);
            async move {
                let woken = race.wait().await;
                if !guard.as_ref().is_none_or(|guard| guard()) {
                    trace!(index = woken.index(), "rule guard rejected wake");
                    return Ok(());
                }
                let firing = Firing {
                    index: woken.index(),
                    token: woken.token(),
                };
                trace!(index = firing.index, "rule fired");
                let result = action(firing).await;
                drop(woken);
                result
            }
        })
        .with_config(self.config);

        Ok(Rule {
            conditions,
            looped,
            instances: Mutex::new(Vec::new()),
        })
    }
}

impl fmt::Debug for RuleBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuleBuilder")
            .field("conditions", &self.conditions.len())
            .field("guarded", &self.guard.is_some())
            .field("config", &self.config)
            .finish()
    }
}
