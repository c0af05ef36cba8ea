use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, debug_span};

use super::{Trigger, TriggerContext, activate_guarded};
use crate::errors::{Result, SourceQlError};

#[derive(Debug)]
enum IntervalState {
    Disabled,
    Armed {
        cancel: CancellationToken,
        _task: JoinHandle<()>,
    },
}

/// Activates its context every `interval` while armed.
///
/// Enabling an armed trigger does nothing. After `disable` returns no new
/// wait begins, though an activation that already started may still finish.
#[derive(Debug)]
pub struct IntervalTrigger {
    interval: Duration,
    state: Mutex<IntervalState>,
}

impl IntervalTrigger {
    pub fn new(interval: Duration) -> Self {
        IntervalTrigger {
            interval,
            state: Mutex::new(IntervalState::Disabled),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    async fn run(interval: Duration, cancel: CancellationToken, context: Arc<dyn TriggerContext>) {
        let name = format!("every {interval:?}");
        loop {
            if cancel.is_cancelled() {
                break;
            }
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(interval) => (),
            }
            if cancel.is_cancelled() {
                break;
            }
            activate_guarded(context.as_ref(), &name);
        }
        debug!(?interval, "interval trigger stopped");
    }
}

impl fmt::Display for IntervalTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "every {:?}", self.interval)
    }
}

impl Trigger for IntervalTrigger {
    fn enable(&self, context: Arc<dyn TriggerContext>) -> Result<()> {
        let mut state = self.state.lock();
        if matches!(*state, IntervalState::Armed { .. }) {
            return Ok(());
        }

        let handle = Handle::try_current().map_err(|e| {
            SourceQlError::Runtime(format!("Interval trigger requires a tokio runtime: {e}"))
        })?;

        let cancel = CancellationToken::new();
        let span = debug_span!("interval_trigger", interval = ?self.interval);
        let task = handle.spawn(Self::run(self.interval, cancel.clone(), context).instrument(span));
        debug!(interval = ?self.interval, "interval trigger armed");

        *state = IntervalState::Armed {
            cancel,
            _task: task,
        };
        Ok(())
    }

    fn disable(&self) {
        let prev = std::mem::replace(&mut *self.state.lock(), IntervalState::Disabled);
        if let IntervalState::Armed { cancel, .. } = prev {
            cancel.cancel();
            debug!(interval = ?self.interval, "interval trigger disabled");
        }
    }

    fn is_armed(&self) -> bool {
        matches!(*self.state.lock(), IntervalState::Armed { .. })
    }
}

impl Drop for IntervalTrigger {
    fn drop(&mut self) {
        self.disable();
    }
}
