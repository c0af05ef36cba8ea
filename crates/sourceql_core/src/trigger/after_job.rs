use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use super::registry::{JobRegistry, SubscriptionId};
use super::{Trigger, TriggerContext, activate_guarded};
use crate::errors::Result;

/// Activates its context each time a named job finishes.
///
/// Job names are compared case insensitively. Enabling an armed trigger
/// drops the existing subscription before subscribing again, so there is
/// never more than one subscription per trigger.
#[derive(Debug)]
pub struct AfterJobTrigger {
    job_name: String,
    subscription: Mutex<Option<(JobRegistry, SubscriptionId)>>,
}

impl AfterJobTrigger {
    pub fn new(job_name: impl Into<String>) -> Self {
        AfterJobTrigger {
            job_name: job_name.into(),
            subscription: Mutex::new(None),
        }
    }

    pub fn job_name(&self) -> &str {
        &self.job_name
    }
}

impl fmt::Display for AfterJobTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "after job '{}'", self.job_name)
    }
}

impl Trigger for AfterJobTrigger {
    fn enable(&self, context: Arc<dyn TriggerContext>) -> Result<()> {
        let mut subscription = self.subscription.lock();
        if let Some((registry, id)) = subscription.take() {
            registry.unsubscribe(id);
        }

        let registry = context.job_registry().clone();
        let watched = self.job_name.clone();
        let description = self.to_string();
        let id = registry.subscribe(Arc::new(move |job_name: &str| {
            if job_name.eq_ignore_ascii_case(&watched) {
                activate_guarded(context.as_ref(), &description);
            }
        }));
        debug!(job_name = %self.job_name, "after job trigger armed");

        *subscription = Some((registry, id));
        Ok(())
    }

    fn disable(&self) {
        if let Some((registry, id)) = self.subscription.lock().take() {
            registry.unsubscribe(id);
            debug!(job_name = %self.job_name, "after job trigger disabled");
        }
    }

    fn is_armed(&self) -> bool {
        self.subscription.lock().is_some()
    }
}

impl Drop for AfterJobTrigger {
    fn drop(&mut self) {
        self.disable();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trigger::testutil::CountingContext;

    #[test]
    fn matches_job_name_case_insensitively() {
        let context = Arc::new(CountingContext::default());
        let trigger = AfterJobTrigger::new("Foo");
        trigger.enable(context.clone()).unwrap();

        context.registry.job_executed("foo");
        context.registry.job_executed("FOO");
        context.registry.job_executed("Bar");
        assert_eq!(2, context.count());
    }

    #[test]
    fn reenable_does_not_duplicate_subscription() {
        let context = Arc::new(CountingContext::default());
        let trigger = AfterJobTrigger::new("foo");
        trigger.enable(context.clone()).unwrap();
        trigger.enable(context.clone()).unwrap();

        assert_eq!(1, context.registry.subscription_count());
        context.registry.job_executed("foo");
        assert_eq!(1, context.count());
    }

    #[test]
    fn disable_unsubscribes() {
        let context = Arc::new(CountingContext::default());
        let trigger = AfterJobTrigger::new("foo");
        trigger.enable(context.clone()).unwrap();
        trigger.disable();
        trigger.disable();

        assert!(!trigger.is_armed());
        assert_eq!(0, context.registry.subscription_count());
        context.registry.job_executed("foo");
        assert_eq!(0, context.count());
    }

    #[test]
    fn never_matching_job_never_activates() {
        let context = Arc::new(CountingContext::default());
        let trigger = AfterJobTrigger::new("foo");
        trigger.enable(context.clone()).unwrap();
        for name in ["bar", "fooo", "fo", ""] {
            context.registry.job_executed(name);
        }
        assert_eq!(0, context.count());
    }

    #[test]
    fn activation_errors_are_contained() {
        let context = Arc::new(CountingContext {
            fail: true,
            ..Default::default()
        });
        let trigger = AfterJobTrigger::new("foo");
        trigger.enable(context.clone()).unwrap();
        context.registry.job_executed("foo");
        context.registry.job_executed("foo");
        assert_eq!(2, context.count());
    }
}
