//! Scheduler: cron and interval triggers fanned out to subscribed bots.
//!
//! Every enabled workflow with `trigger_type = "schedule"` gets one
//! background job (`workflow_<id>`). Jobs are rebuilt wholesale on reload.
//! Ticks run at most one instance per job (the job task awaits each run
//! inline, which also coalesces missed fires into one), and fires observed
//! more than the misfire grace after their scheduled time are skipped.
//!
//! Each tick resolves the workflow's subscribed users, then those users'
//! active bots, and runs the engine once per bot against a synthetic
//! [`ScheduledEvent`] carrying no message, user, or group.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use chrono_tz::Tz;
use cron::Schedule;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use trellis_core::{
    AdapterManager, Bot, BoxedEvent, RecordStore, ScheduleSpec, ScheduledEvent, TriggerType,
};
use trellis_engine::{CachedWorkflow, WorkflowCache};

/// Late fires inside this window still run; later ones are skipped.
pub const MISFIRE_GRACE: Duration = Duration::from_secs(60);

/// Info about one installed job, for the admin surface.
#[derive(Debug, Clone)]
pub struct JobInfo {
    /// Owning workflow.
    pub workflow_id: i64,
    /// Job id (`workflow_<id>`).
    pub job_id: String,
    /// Human-readable schedule description.
    pub schedule: String,
}

struct Job {
    info: JobInfo,
    cancel: CancellationToken,
}

/// When the next fire happens.
enum Trigger {
    Cron(Box<Schedule>),
    Interval(Duration),
}

impl Trigger {
    fn from_spec(spec: &ScheduleSpec) -> Result<Self, String> {
        match spec {
            ScheduleSpec::Cron { cron } => {
                let fields: Vec<&str> = cron.split_whitespace().collect();
                if fields.len() != 5 {
                    return Err(format!(
                        "cron expression needs 5 fields, found {}",
                        fields.len()
                    ));
                }
                // The cron crate wants a seconds field in front.
                let with_seconds = format!("0 {cron}");
                let schedule = Schedule::from_str(&with_seconds).map_err(|e| e.to_string())?;
                Ok(Trigger::Cron(Box::new(schedule)))
            }
            ScheduleSpec::Interval { interval_minutes } => {
                if *interval_minutes == 0 {
                    return Err("interval must be at least one minute".into());
                }
                Ok(Trigger::Interval(Duration::from_secs(interval_minutes * 60)))
            }
        }
    }

    /// Seconds until the next fire, from now.
    fn next_delay(&self, tz: Tz) -> Option<Duration> {
        match self {
            Trigger::Cron(schedule) => {
                let now = Utc::now().with_timezone(&tz);
                let next = schedule.after(&now).next()?;
                (next - now).to_std().ok()
            }
            Trigger::Interval(interval) => Some(*interval),
        }
    }

    fn describe(&self, spec: &ScheduleSpec) -> String {
        match spec {
            ScheduleSpec::Cron { cron } => format!("cron: {cron}"),
            ScheduleSpec::Interval { interval_minutes } => {
                if interval_minutes % 60 == 0 && *interval_minutes >= 60 {
                    format!("every {} hour(s)", interval_minutes / 60)
                } else {
                    format!("every {interval_minutes} minute(s)")
                }
            }
        }
    }
}

/// Background scheduler for timed workflows.
pub struct Scheduler {
    store: Arc<dyn RecordStore>,
    cache: Arc<WorkflowCache>,
    manager: Arc<AdapterManager>,
    timezone: Tz,
    jobs: Mutex<HashMap<i64, Job>>,
}

impl Scheduler {
    /// Creates a scheduler.
    pub fn new(
        store: Arc<dyn RecordStore>,
        cache: Arc<WorkflowCache>,
        manager: Arc<AdapterManager>,
        timezone: Tz,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            cache,
            manager,
            timezone,
            jobs: Mutex::new(HashMap::new()),
        })
    }

    /// Rebuilds all jobs from the current workflow cache snapshot.
    /// Returns the number of installed jobs.
    pub fn reload(&self) -> usize {
        // Drop every prior job before installing the new set.
        self.stop();

        let mut installed = 0usize;
        for workflow in self.cache.snapshot().iter() {
            if workflow.trigger_type != TriggerType::Schedule {
                continue;
            }
            let Some(spec) = &workflow.spec.schedule else {
                warn!(workflow = %workflow.name, "Schedule workflow without a schedule");
                continue;
            };
            let trigger = match Trigger::from_spec(spec) {
                Ok(trigger) => trigger,
                Err(reason) => {
                    // Config errors surface once and are never retried.
                    error!(workflow = %workflow.name, reason = %reason, "Invalid schedule");
                    continue;
                }
            };

            let job_id = format!("workflow_{}", workflow.id);
            let description = trigger.describe(spec);
            let cancel = CancellationToken::new();

            tokio::spawn(run_job(
                Arc::clone(&self.store),
                Arc::clone(&self.manager),
                self.timezone,
                Arc::clone(workflow),
                trigger,
                cancel.clone(),
            ));

            info!(job_id = %job_id, schedule = %description, "Scheduled job installed");
            self.jobs.lock().insert(
                workflow.id,
                Job {
                    info: JobInfo {
                        workflow_id: workflow.id,
                        job_id,
                        schedule: description,
                    },
                    cancel,
                },
            );
            installed += 1;
        }

        info!(count = installed, "Scheduler reloaded");
        installed
    }

    /// Cancels all jobs.
    pub fn stop(&self) {
        let mut jobs = self.jobs.lock();
        for (_, job) in jobs.drain() {
            job.cancel.cancel();
        }
    }

    /// Removes one workflow's job.
    pub fn remove_job(&self, workflow_id: i64) -> bool {
        match self.jobs.lock().remove(&workflow_id) {
            Some(job) => {
                job.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Lists the installed jobs.
    pub fn jobs_info(&self) -> Vec<JobInfo> {
        let mut info: Vec<JobInfo> = self.jobs.lock().values().map(|j| j.info.clone()).collect();
        info.sort_by_key(|j| j.workflow_id);
        info
    }

    /// Runs one tick: engine execution per subscribed, active bot. Returns
    /// the number of bots whose run handled the event.
    pub async fn fan_out(&self, workflow: &Arc<CachedWorkflow>) -> usize {
        fan_out_tick(&self.store, &self.manager, workflow).await
    }
}

async fn run_job(
    store: Arc<dyn RecordStore>,
    manager: Arc<AdapterManager>,
    timezone: Tz,
    workflow: Arc<CachedWorkflow>,
    trigger: Trigger,
    cancel: CancellationToken,
) {
    loop {
        let Some(delay) = trigger.next_delay(timezone) else {
            warn!(workflow = %workflow.name, "Schedule yields no future fires");
            return;
        };
        let scheduled_at = tokio::time::Instant::now() + delay;

        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep_until(scheduled_at) => {}
        }

        // A tick observed long after its slot (the runtime was wedged) is
        // dropped rather than executed out of band.
        let lateness = tokio::time::Instant::now().saturating_duration_since(scheduled_at);
        if lateness > MISFIRE_GRACE {
            warn!(
                workflow = %workflow.name,
                late_secs = lateness.as_secs(),
                "Skipping misfired tick"
            );
            continue;
        }

        // Awaiting inline keeps at most one instance per job running.
        let handled = fan_out_tick(&store, &manager, &workflow).await;
        if handled > 0 {
            info!(workflow = %workflow.name, handled, "Scheduled workflow complete");
        } else {
            debug!(workflow = %workflow.name, "Scheduled workflow produced no results");
        }
    }
}

/// One scheduler tick: resolve subscribers, their active bots, and run the
/// engine once per bot against a synthetic event.
async fn fan_out_tick(
    store: &Arc<dyn RecordStore>,
    manager: &Arc<AdapterManager>,
    workflow: &Arc<CachedWorkflow>,
) -> usize {
    let subscribers = match store.subscribers_of_workflow(workflow.id).await {
        Ok(subscribers) => subscribers,
        Err(err) => {
            error!(workflow = %workflow.name, error = %err, "Subscriber lookup failed");
            return 0;
        }
    };
    let user_ids: Vec<i64> = subscribers.iter().map(|s| s.user_id).collect();
    if user_ids.is_empty() {
        debug!(workflow = %workflow.name, "No subscribers for scheduled workflow");
        return 0;
    }

    let bots = match store.bots_owned_by(&user_ids).await {
        Ok(bots) => bots,
        Err(err) => {
            error!(workflow = %workflow.name, error = %err, "Bot lookup failed");
            return 0;
        }
    };

    let mut handled = 0usize;
    for record in bots {
        // Only bots with a live adapter receive the tick.
        let Some(adapter) = manager.adapter(record.id) else {
            continue;
        };
        let Some(bot) = adapter.bot() else {
            continue;
        };

        let event = BoxedEvent::new(ScheduledEvent {
            protocol: record.protocol.clone(),
            self_id: bot.self_id().to_string(),
            time: Utc::now().timestamp(),
            workflow_name: workflow.name.clone(),
        })
        .with_bot(&bot);

        let outcome = workflow.engine.execute(event).await;
        if outcome.handled {
            handled += 1;
        }
    }
    handled
}

// ============================================================================
// Tests
// ============================================================================
