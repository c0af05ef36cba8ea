//! Runs named jobs whenever one of their triggers fires.

use std::collections::HashMap;
use std::fmt::Debug;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{Instrument, debug, debug_span, error, info, warn};

use crate::config::SchedulerConfig;
use crate::context::ExecutionContext;
use crate::engine::{Engine, PreparedStatement};
use crate::errors::{Result, SourceQlError};
use crate::trigger::registry::JobRegistry;
use crate::trigger::{IntervalTrigger, Trigger, TriggerContext};

#[async_trait]
pub trait Job: Debug + Send + Sync {
    /// Name of the job, unique within a scheduler ignoring case.
    fn name(&self) -> &str;

    /// Run the job once.
    async fn run(&self) -> Result<()>;
}

/// Executes a prepared statement each time it runs.
#[derive(Debug)]
pub struct QueryJob {
    name: String,
    engine: Arc<Engine>,
    prepared: PreparedStatement,
    context: Arc<dyn ExecutionContext>,
}

impl QueryJob {
    pub fn new(
        name: impl Into<String>,
        engine: Arc<Engine>,
        prepared: PreparedStatement,
        context: Arc<dyn ExecutionContext>,
    ) -> Self {
        QueryJob {
            name: name.into(),
            engine,
            prepared,
            context,
        }
    }
}

#[async_trait]
impl Job for QueryJob {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self) -> Result<()> {
        let rows = self
            .engine
            .execute_prepared(&self.prepared, self.context.clone(), None)
            .await?
            .into_rows()
            .await?;
        debug!(job_name = %self.name, rows = rows.len(), "query job produced rows");
        Ok(())
    }
}

#[derive(Debug)]
enum SchedulerMessage {
    Activate(String),
    RunComplete(String),
    HealthCheck,
    Close,
}

#[derive(Debug)]
struct ScheduledJob {
    job: Arc<dyn Job>,
    triggers: Vec<Arc<dyn Trigger>>,
}

impl ScheduledJob {
    fn disable_triggers(&self) {
        for trigger in &self.triggers {
            trigger.disable();
        }
    }
}

/// Context handed to the triggers of one job.
#[derive(Debug)]
struct JobTriggerContext {
    job_name: String,
    sender: mpsc::UnboundedSender<SchedulerMessage>,
    registry: JobRegistry,
}

impl TriggerContext for JobTriggerContext {
    fn activate(&self) -> Result<()> {
        self.sender
            .send(SchedulerMessage::Activate(self.job_name.clone()))
            .map_err(|_| SourceQlError::Runtime(format!("Scheduler closed, cannot run '{}'", self.job_name)))
    }

    fn job_registry(&self) -> &JobRegistry {
        &self.registry
    }
}

/// Collection of triggered jobs.
///
/// A job never overlaps with itself: an activation arriving while the job is
/// still running is dropped. Every run, failed or not, is announced on the
/// job registry so that after-job triggers can chain off it.
#[derive(Debug, Clone)]
pub struct Scheduler {
    sender: mpsc::UnboundedSender<SchedulerMessage>,
    jobs: Arc<Mutex<HashMap<String, ScheduledJob>>>,
    registry: JobRegistry,
    default_interval: Duration,
    listen: Arc<Mutex<Option<JoinHandle<()>>>>,
    /// Set under the jobs lock once close has started.
    closed: Arc<AtomicBool>,
}

impl Scheduler {
    /// Create a scheduler. Must be called from within a tokio runtime.
    pub fn try_new(config: &SchedulerConfig) -> Result<Self> {
        let handle = Handle::try_current()
            .map_err(|e| SourceQlError::Runtime(format!("Scheduler requires a tokio runtime: {e}")))?;

        let (sender, receiver) = mpsc::unbounded_channel();
        let jobs = Arc::new(Mutex::new(HashMap::new()));
        let registry = JobRegistry::new();

        let health_sender = sender.clone();
        let health_check_interval = config.health_check_interval();
        handle.spawn(async move {
            let mut ticker = tokio::time::interval(health_check_interval);
            loop {
                ticker.tick().await;
                if health_sender.send(SchedulerMessage::HealthCheck).is_err() {
                    debug!("exiting scheduler health checker");
                    return;
                }
            }
        });

        let listen = handle.spawn(Self::listen(
            jobs.clone(),
            registry.clone(),
            sender.clone(),
            receiver,
        ));

        Ok(Scheduler {
            sender,
            jobs,
            registry,
            default_interval: config.default_interval(),
            listen: Arc::new(Mutex::new(Some(listen))),
            closed: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    pub fn job_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self
            .jobs
            .lock()
            .values()
            .map(|scheduled| scheduled.job.name().to_string())
            .collect();
        names.sort();
        names
    }

    /// Add a job and arm its triggers.
    ///
    /// If any trigger fails to arm, the ones already armed are disabled and
    /// the job is not added.
    pub fn add_job(&self, job: Arc<dyn Job>, triggers: Vec<Arc<dyn Trigger>>) -> Result<()> {
        let key = job.name().to_lowercase();
        let mut jobs = self.jobs.lock();
        if self.is_closed() {
            return Err(SourceQlError::Runtime("Scheduler is closed".to_string()));
        }
        if jobs.contains_key(&key) {
            return Err(SourceQlError::Runtime(format!(
                "Job '{}' is already scheduled",
                job.name()
            )));
        }

        let context: Arc<dyn TriggerContext> = Arc::new(JobTriggerContext {
            job_name: job.name().to_string(),
            sender: self.sender.clone(),
            registry: self.registry.clone(),
        });
        for (idx, trigger) in triggers.iter().enumerate() {
            if let Err(e) = trigger.enable(context.clone()) {
                triggers[..idx].iter().for_each(|t| t.disable());
                return Err(e);
            }
        }

        info!(job_name = %job.name(), triggers = triggers.len(), "scheduled job");
        jobs.insert(key, ScheduledJob { job, triggers });
        Ok(())
    }

    /// Add a job run on an interval, falling back to the configured default
    /// interval.
    pub fn add_interval_job(&self, job: Arc<dyn Job>, interval: Option<Duration>) -> Result<()> {
        let trigger = IntervalTrigger::new(interval.unwrap_or(self.default_interval));
        self.add_job(job, vec![Arc::new(trigger)])
    }

    /// Remove a job and disable its triggers. A run already in flight is
    /// left to finish.
    pub fn remove_job(&self, name: &str) -> bool {
        match self.jobs.lock().remove(&name.to_lowercase()) {
            Some(scheduled) => {
                scheduled.disable_triggers();
                info!(job_name = %name, "removed job");
                true
            }
            None => false,
        }
    }

    /// Request a run of a job regardless of its triggers.
    pub fn run_now(&self, name: &str) -> Result<()> {
        let job_name = {
            let jobs = self.jobs.lock();
            if self.is_closed() {
                return Err(SourceQlError::Runtime("Scheduler is closed".to_string()));
            }
            match jobs.get(&name.to_lowercase()) {
                Some(scheduled) => scheduled.job.name().to_string(),
                None => return Err(SourceQlError::Runtime(format!("Unknown job '{name}'"))),
            }
        };
        self.sender
            .send(SchedulerMessage::Activate(job_name))
            .map_err(|_| SourceQlError::Runtime("Scheduler is closed".to_string()))
    }

    /// If close was called. Jobs can no longer be added or run.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst) || self.sender.is_closed()
    }

    /// Disable every trigger and wait for in-flight runs to finish.
    pub async fn close(&self) -> Result<()> {
        let scheduled: Vec<_> = {
            let mut jobs = self.jobs.lock();
            self.closed.store(true, Ordering::SeqCst);
            jobs.drain().map(|(_, job)| job).collect()
        };
        for job in &scheduled {
            job.disable_triggers();
        }

        let handle = match self.listen.lock().take() {
            Some(handle) => handle,
            None => return Ok(()),
        };
        if self.sender.send(SchedulerMessage::Close).is_err() {
            warn!("scheduler listener exited before close");
        }
        handle
            .await
            .map_err(|e| SourceQlError::Runtime(format!("Scheduler listener failed: {e}")))?;

        Ok(())
    }

    async fn listen(
        jobs: Arc<Mutex<HashMap<String, ScheduledJob>>>,
        registry: JobRegistry,
        sender: mpsc::UnboundedSender<SchedulerMessage>,
        mut receiver: mpsc::UnboundedReceiver<SchedulerMessage>,
    ) {
        let mut running: HashMap<String, JoinHandle<()>> = HashMap::new();

        while let Some(msg) = receiver.recv().await {
            debug!(?msg, "scheduler received a message");

            match msg {
                SchedulerMessage::Activate(job_name) => {
                    let key = job_name.to_lowercase();
                    if running.get(&key).is_some_and(|run| !run.is_finished()) {
                        debug!(%job_name, "job still running, skipping activation");
                        continue;
                    }
                    let job = match jobs.lock().get(&key) {
                        Some(scheduled) => scheduled.job.clone(),
                        None => {
                            warn!(%job_name, "activation for unknown job");
                            continue;
                        }
                    };

                    let span = debug_span!("job_run", %job_name);
                    let run = tokio::spawn(
                        Self::run_job(job, registry.clone(), sender.clone()).instrument(span),
                    );
                    running.insert(key, run);
                }
                SchedulerMessage::RunComplete(job_name) => {
                    let key = job_name.to_lowercase();
                    if running.get(&key).is_some_and(|run| run.is_finished()) {
                        running.remove(&key);
                    }
                }
                SchedulerMessage::HealthCheck => {
                    running.retain(|_, run| !run.is_finished());
                }
                SchedulerMessage::Close => {
                    info!(in_flight = running.len(), "closing scheduler, waiting for running jobs");
                    receiver.close();
                    for (job_name, run) in running.drain() {
                        if let Err(e) = run.await {
                            error!(%job_name, %e, "job task failed");
                        }
                    }
                    info!("scheduler closed");
                    break;
                }
            }
        }
    }

    async fn run_job(
        job: Arc<dyn Job>,
        registry: JobRegistry,
        sender: mpsc::UnboundedSender<SchedulerMessage>,
    ) {
        let job_name = job.name().to_string();
        let start = Instant::now();

        match AssertUnwindSafe(job.run()).catch_unwind().await {
            Ok(Ok(())) => info!(%job_name, elapsed = ?start.elapsed(), "job completed"),
            Ok(Err(error)) => error!(%job_name, %error, "job exited with error"),
            Err(_) => error!(%job_name, "job panicked"),
        }

        registry.job_executed(&job_name);
        // Fails once the scheduler is closing, which is fine.
        let _ = sender.send(SchedulerMessage::RunComplete(job_name));
    }
}
