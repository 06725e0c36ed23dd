//! Periodic maintenance scheduler.
//!
//! Holds the task registry (file-cache rescan, log rollup, retention prune,
//! pool refresh kicks) and runs due tasks from one tick loop. A task that is
//! still running is never re-entered; failures land in the alert stream.

use chrono::{DateTime, Utc};
use cron::Schedule;
use dashmap::DashMap;
use futures::future::BoxFuture;
use pagemill_monitoring::AlertStream;
use pagemill_types::{AlertLevel, PagemillError, Result};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info};

/// A task body: runs to completion and reports a one-line summary.
pub type TaskFuture = BoxFuture<'static, anyhow::Result<String>>;
pub type TaskFn = Arc<dyn Fn() -> TaskFuture + Send + Sync>;

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub check_interval: Duration,
    pub task_log_capacity: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(1),
            task_log_capacity: 50,
        }
    }
}

/// Outcome of the most recent run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Idle,
    Running,
    Success,
    Failed,
}

/// Operator-facing task listing entry.
#[derive(Debug, Clone, Serialize)]
pub struct TaskView {
    pub id: String,
    pub name: String,
    pub cron: String,
    pub enabled: bool,
    pub running: bool,
    pub last_run: Option<DateTime<Utc>>,
    pub last_status: TaskStatus,
    pub next_execution: Option<DateTime<Utc>>,
}

struct TaskEntry {
    id: String,
    name: String,
    cron: String,
    schedule: Schedule,
    action: TaskFn,
    enabled: AtomicBool,
    running: AtomicBool,
    last_run: Mutex<Option<DateTime<Utc>>>,
    last_status: Mutex<TaskStatus>,
    next_execution: Mutex<Option<DateTime<Utc>>>,
    logs: Mutex<VecDeque<String>>,
    log_capacity: usize,
}

impl TaskEntry {
    fn push_log(&self, line: String) {
        let mut logs = self.logs.lock();
        if logs.len() >= self.log_capacity {
            logs.pop_front();
        }
        logs.push_back(line);
    }

    fn advance_next(&self) {
        *self.next_execution.lock() = self.schedule.upcoming(Utc).next();
    }

    fn view(&self) -> TaskView {
        TaskView {
            id: self.id.clone(),
            name: self.name.clone(),
            cron: self.cron.clone(),
            enabled: self.enabled.load(Ordering::Relaxed),
            running: self.running.load(Ordering::Relaxed),
            last_run: *self.last_run.lock(),
            last_status: *self.last_status.lock(),
            next_execution: *self.next_execution.lock(),
        }
    }
}

pub struct Scheduler {
    config: SchedulerConfig,
    tasks: DashMap<String, Arc<TaskEntry>>,
    running: AtomicBool,
    alerts: Arc<AlertStream>,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig, alerts: Arc<AlertStream>) -> Arc<Self> {
        Arc::new(Self {
            config,
            tasks: DashMap::new(),
            running: AtomicBool::new(false),
            alerts,
        })
    }

    /// Register one task. Cron expressions carry a seconds field, e.g.
    /// `0 */10 * * * *` for every ten minutes.
    pub fn register(&self, id: &str, name: &str, cron_expr: &str, action: TaskFn) -> Result<()> {
        let schedule = Schedule::from_str(cron_expr).map_err(|e| {
            PagemillError::invalid_param(format!("cron expression {cron_expr:?}: {e}"))
        })?;

        let entry = Arc::new(TaskEntry {
            id: id.to_string(),
            name: name.to_string(),
            cron: cron_expr.to_string(),
            schedule,
            action,
            enabled: AtomicBool::new(true),
            running: AtomicBool::new(false),
            last_run: Mutex::new(None),
            last_status: Mutex::new(TaskStatus::Idle),
            next_execution: Mutex::new(None),
            logs: Mutex::new(VecDeque::new()),
            log_capacity: self.config.task_log_capacity,
        });
        entry.advance_next();

        info!(task = id, cron = cron_expr, "Scheduled task registered");
        self.tasks.insert(id.to_string(), entry);
        Ok(())
    }

    /// Run the tick loop until shutdown.
    pub fn start(self: &Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let scheduler = self.clone();
        tokio::spawn(async move {
            info!(tasks = scheduler.tasks.len(), "Scheduler started");
            let mut ticker = tokio::time::interval(scheduler.config.check_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = shutdown.changed() => break,
                }
                scheduler.run_due_tasks();
            }
            scheduler.running.store(false, Ordering::SeqCst);
            info!("Scheduler stopped");
        });
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn run_due_tasks(self: &Arc<Self>) {
        let now = Utc::now();
        for entry in self.tasks.iter() {
            let task = entry.value().clone();
            if !task.enabled.load(Ordering::Relaxed) {
                continue;
            }
            let due = (*task.next_execution.lock())
                .map(|next| next <= now)
                .unwrap_or(false);
            if due {
                self.spawn_task(task);
            }
        }
    }

    /// Manually run one task now.
    pub fn trigger(self: &Arc<Self>, id: &str) -> Result<()> {
        if !self.is_running() {
            return Err(PagemillError::SchedulerNotRunning);
        }
        let task = self
            .tasks
            .get(id)
            .map(|e| e.value().clone())
            .ok_or_else(|| PagemillError::SchedulerTaskNotFound {
                task_id: id.to_string(),
            })?;

        if task.running.load(Ordering::SeqCst) {
            return Err(PagemillError::SchedulerExecFailed {
                message: format!("task {id} is already running"),
            });
        }
        self.spawn_task(task);
        Ok(())
    }

    pub fn set_enabled(&self, id: &str, enabled: bool) -> Result<()> {
        let task = self
            .tasks
            .get(id)
            .ok_or_else(|| PagemillError::SchedulerTaskNotFound {
                task_id: id.to_string(),
            })?;
        task.enabled.store(enabled, Ordering::Relaxed);
        info!(task = id, enabled, "Scheduled task toggled");
        Ok(())
    }

    pub fn task_logs(&self, id: &str, limit: usize) -> Result<Vec<String>> {
        let task = self
            .tasks
            .get(id)
            .ok_or_else(|| PagemillError::SchedulerTaskNotFound {
                task_id: id.to_string(),
            })?;
        let logs = task.logs.lock();
        Ok(logs.iter().rev().take(limit).cloned().collect())
    }

    pub fn list(&self) -> Vec<TaskView> {
        let mut views: Vec<_> = self.tasks.iter().map(|e| e.value().view()).collect();
        views.sort_by(|a, b| a.id.cmp(&b.id));
        views
    }

    fn spawn_task(self: &Arc<Self>, task: Arc<TaskEntry>) {
        // Re-entry guard: the flag flips back only when the run finishes.
        if task.running.swap(true, Ordering::SeqCst) {
            debug!(task = %task.id, "Task still running, skipping tick");
            return;
        }

        *task.last_status.lock() = TaskStatus::Running;
        let alerts = self.alerts.clone();
        tokio::spawn(async move {
            let started = Utc::now();
            debug!(task = %task.id, "Task started");
            let result = (task.action)().await;

            *task.last_run.lock() = Some(started);
            match result {
                Ok(summary) => {
                    *task.last_status.lock() = TaskStatus::Success;
                    task.push_log(format!("{} ok: {summary}", started.to_rfc3339()));
                    debug!(task = %task.id, summary = %summary, "Task completed");
                }
                Err(e) => {
                    *task.last_status.lock() = TaskStatus::Failed;
                    task.push_log(format!("{} failed: {e}", started.to_rfc3339()));
                    error!(task = %task.id, error = %e, "Task failed");
                    alerts.raise(
                        AlertLevel::Warning,
                        "scheduler",
                        format!("task {} failed: {e}", task.id),
                    );
                }
            }
            task.advance_next();
            task.running.store(false, Ordering::SeqCst);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counting_task(counter: Arc<AtomicUsize>) -> TaskFn {
        Arc::new(move || {
            let counter = counter.clone();
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok("done".to_string())
            })
        })
    }

    #[tokio::test]
    async fn registers_and_lists_tasks() {
        let scheduler = Scheduler::new(SchedulerConfig::default(), AlertStream::new(16));
        scheduler
            .register("rescan", "HTML cache rescan", "0 */10 * * * *", counting_task(Default::default()))
            .unwrap();

        let views = scheduler.list();
        assert_eq!(views.len(), 1);
        assert_eq!(views[0].id, "rescan");
        assert!(views[0].enabled);
        assert!(views[0].next_execution.is_some());
        assert_eq!(views[0].last_status, TaskStatus::Idle);
    }

    #[tokio::test]
    async fn rejects_bad_cron_expressions() {
        let scheduler = Scheduler::new(SchedulerConfig::default(), AlertStream::new(16));
        let result = scheduler.register("x", "x", "not a cron", counting_task(Default::default()));
        assert!(matches!(result, Err(PagemillError::InvalidParam { .. })));
    }

    #[tokio::test]
    async fn trigger_requires_running_scheduler_and_known_task() {
        let scheduler = Scheduler::new(SchedulerConfig::default(), AlertStream::new(16));
        scheduler
            .register("t", "t", "0 0 0 1 1 *", counting_task(Default::default()))
            .unwrap();

        assert!(matches!(
            scheduler.trigger("t"),
            Err(PagemillError::SchedulerNotRunning)
        ));

        let (_tx, rx) = watch::channel(false);
        scheduler.start(rx);
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(matches!(
            scheduler.trigger("missing"),
            Err(PagemillError::SchedulerTaskNotFound { .. })
        ));
        scheduler.trigger("t").unwrap();
    }

    #[tokio::test]
    async fn manual_trigger_runs_task_and_records_log() {
        let counter = Arc::new(AtomicUsize::new(0));
        let scheduler = Scheduler::new(SchedulerConfig::default(), AlertStream::new(16));
        // Far-future schedule so only the manual trigger fires it.
        scheduler
            .register("t", "t", "0 0 0 1 1 *", counting_task(counter.clone()))
            .unwrap();
        let (_tx, rx) = watch::channel(false);
        scheduler.start(rx);
        tokio::time::sleep(Duration::from_millis(20)).await;

        scheduler.trigger("t").unwrap();
        let deadline = tokio::time::Instant::now() + Duration::from_secs(1);
        while counter.load(Ordering::SeqCst) == 0 && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        let logs = scheduler.task_logs("t", 10).unwrap();
        assert_eq!(logs.len(), 1);
        assert!(logs[0].contains("ok: done"));
        assert_eq!(scheduler.list()[0].last_status, TaskStatus::Success);
    }

    #[tokio::test]
    async fn running_task_is_not_reentered() {
        let counter = Arc::new(AtomicUsize::new(0));
        let slow: TaskFn = {
            let counter = counter.clone();
            Arc::new(move || {
                let counter = counter.clone();
                Box::pin(async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(200)).await;
                    Ok("slow".to_string())
                })
            })
        };

        let scheduler = Scheduler::new(SchedulerConfig::default(), AlertStream::new(16));
        scheduler.register("slow", "slow", "0 0 0 1 1 *", slow).unwrap();
        let (_tx, rx) = watch::channel(false);
        scheduler.start(rx);
        tokio::time::sleep(Duration::from_millis(20)).await;

        scheduler.trigger("slow").unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(matches!(
            scheduler.trigger("slow"),
            Err(PagemillError::SchedulerExecFailed { .. })
        ));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_task_raises_an_alert() {
        let alerts = AlertStream::new(16);
        let failing: TaskFn = Arc::new(|| Box::pin(async { anyhow::bail!("boom") }));

        let scheduler = Scheduler::new(SchedulerConfig::default(), alerts.clone());
        scheduler.register("bad", "bad", "0 0 0 1 1 *", failing).unwrap();
        let (_tx, rx) = watch::channel(false);
        scheduler.start(rx);
        tokio::time::sleep(Duration::from_millis(20)).await;

        scheduler.trigger("bad").unwrap();
        let deadline = tokio::time::Instant::now() + Duration::from_secs(1);
        while alerts.unresolved_count() == 0 && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(alerts.unresolved_count(), 1);
        assert_eq!(scheduler.list()[0].last_status, TaskStatus::Failed);
    }

    #[tokio::test]
    async fn disabled_tasks_do_not_fire() {
        let counter = Arc::new(AtomicUsize::new(0));
        let scheduler = Scheduler::new(
            SchedulerConfig {
                check_interval: Duration::from_millis(10),
                ..Default::default()
            },
            AlertStream::new(16),
        );
        // Every second.
        scheduler
            .register("fast", "fast", "* * * * * *", counting_task(counter.clone()))
            .unwrap();
        scheduler.set_enabled("fast", false).unwrap();

        let (_tx, rx) = watch::channel(false);
        scheduler.start(rx);
        tokio::time::sleep(Duration::from_millis(1200)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }
}
