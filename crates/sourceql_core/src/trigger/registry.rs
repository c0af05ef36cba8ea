use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, error};

pub type JobListener = Arc<dyn Fn(&str) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

#[derive(Default)]
struct RegistryState {
    next_id: u64,
    listeners: Vec<(SubscriptionId, JobListener)>,
}

/// Observer registry for job completion.
///
/// Cloning gives another handle to the same registry.
#[derive(Clone, Default)]
pub struct JobRegistry {
    state: Arc<Mutex<RegistryState>>,
}

impl fmt::Debug for JobRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobRegistry")
            .field("subscriptions", &self.subscription_count())
            .finish()
    }
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, listener: JobListener) -> SubscriptionId {
        let mut state = self.state.lock();
        let id = SubscriptionId(state.next_id);
        state.next_id += 1;
        state.listeners.push((id, listener));
        id
    }

    /// Remove a subscription, returning if it existed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut state = self.state.lock();
        let before = state.listeners.len();
        state.listeners.retain(|(existing, _)| *existing != id);
        before != state.listeners.len()
    }

    pub fn subscription_count(&self) -> usize {
        self.state.lock().listeners.len()
    }

    /// Notify all listeners that a job finished running.
    ///
    /// Listeners are called synchronously without holding the registry lock,
    /// so they may subscribe or unsubscribe. A panicking listener does not
    /// prevent the others from being called.
    pub fn job_executed(&self, job_name: &str) {
        let listeners: Vec<JobListener> = self
            .state
            .lock()
            .listeners
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();

        debug!(%job_name, listeners = listeners.len(), "job executed");
        for listener in listeners {
            if catch_unwind(AssertUnwindSafe(|| listener(job_name))).is_err() {
                error!(%job_name, "job completion listener panicked");
            }
        }
    }
}
