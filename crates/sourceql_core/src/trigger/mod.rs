//! Triggers decide when a scheduled job runs.
//!
//! A trigger is either disabled or armed. [`Trigger::enable`] arms it against
//! a [`TriggerContext`], [`Trigger::disable`] tears down whatever it set up.
//! Activation errors and panics are logged and never escape the trigger.

pub mod after_job;
pub mod interval;
pub mod registry;

use std::fmt::{Debug, Display};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use registry::JobRegistry;
use tracing::error;

use crate::errors::Result;

pub use after_job::AfterJobTrigger;
pub use interval::IntervalTrigger;

/// What a trigger acts on when it fires.
pub trait TriggerContext: Send + Sync + Debug {
    /// Request a run of the job owning the trigger.
    fn activate(&self) -> Result<()>;

    /// Registry raising job completion notifications.
    fn job_registry(&self) -> &JobRegistry;
}

pub trait Trigger: Send + Sync + Debug + Display {
    /// Arm the trigger.
    fn enable(&self, context: Arc<dyn TriggerContext>) -> Result<()>;

    /// Disarm the trigger. Does nothing if already disabled.
    fn disable(&self);

    fn is_armed(&self) -> bool;
}

/// Call `activate`, logging errors and panics.
pub(crate) fn activate_guarded(context: &dyn TriggerContext, trigger: &dyn Display) {
    match catch_unwind(AssertUnwindSafe(|| context.activate())) {
        Ok(Ok(())) => (),
        Ok(Err(e)) => error!(%trigger, %e, "trigger activation failed"),
        Err(_) => error!(%trigger, "trigger activation panicked"),
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::errors::SourceQlError;

    /// Context counting activations.
    #[derive(Debug, Default)]
    pub struct CountingContext {
        pub activations: AtomicUsize,
        pub registry: JobRegistry,
        pub fail: bool,
    }

    impl CountingContext {
        pub fn count(&self) -> usize {
            self.activations.load(Ordering::SeqCst)
        }
    }

    impl TriggerContext for CountingContext {
        fn activate(&self) -> Result<()> {
            self.activations.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(SourceQlError::Runtime("activation failed".to_string()));
            }
            Ok(())
        }

        fn job_registry(&self) -> &JobRegistry {
            &self.registry
        }
    }
}
