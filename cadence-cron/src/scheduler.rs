//! Periodic task scheduler.

use crate::error::{CronError, CronResult};
use crate::task::{Task, TaskContext, TaskStatus};
use cadence_log::{debug, info, warn};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Scheduler configuration.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// How often due tasks are checked
    pub tick_interval: Duration,

    /// Whether to log every run
    pub log_execution: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(1),
            log_execution: true,
        }
    }
}

impl SchedulerConfig {
    pub fn with_tick_interval(mut self, tick: Duration) -> Self {
        self.tick_interval = tick;
        self
    }
}

/// Runs registered tasks on their intervals in background tokio tasks.
///
/// A failing run is logged and the task is run again at its next interval.
pub struct CronScheduler {
    tasks: Arc<RwLock<HashMap<String, Task>>>,
    config: SchedulerConfig,
    running: Arc<RwLock<bool>>,
    handle: Option<JoinHandle<()>>,
}

impl CronScheduler {
    pub fn new() -> Self {
        Self::with_config(SchedulerConfig::default())
    }

    pub fn with_config(config: SchedulerConfig) -> Self {
        debug!(tick_interval = ?config.tick_interval, "Initializing cron scheduler");
        Self {
            tasks: Arc::new(RwLock::new(HashMap::new())),
            config,
            running: Arc::new(RwLock::new(false)),
            handle: None,
        }
    }

    /// Register a task run every `every`.
    ///
    /// ```no_run
    /// use cadence_cron::*;
    /// use std::time::Duration;
    ///
    /// # #[tokio::main]
    /// # async fn main() -> Result<(), CronError> {
    /// let mut scheduler = CronScheduler::new();
    /// scheduler
    ///     .add_task("dispatch", Duration::from_secs(60), |ctx| async move {
    ///         println!("run #{}", ctx.run_count);
    ///         Ok(())
    ///     })
    ///     .await?;
    /// scheduler.start().await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn add_task<F, Fut>(
        &self,
        name: impl Into<String>,
        every: Duration,
        function: F,
    ) -> CronResult<()>
    where
        F: Fn(TaskContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CronResult<()>> + Send + 'static,
    {
        let name = name.into();
        if every.is_zero() {
            return Err(CronError::InvalidInterval(name));
        }

        let mut tasks = self.tasks.write().await;
        if tasks.contains_key(&name) {
            return Err(CronError::TaskAlreadyExists(name));
        }
        info!(task = %name, every = ?every, "Adding periodic task");
        tasks.insert(name.clone(), Task::new(name, every, function));
        Ok(())
    }

    pub async fn remove_task(&self, name: &str) -> CronResult<()> {
        self.tasks
            .write()
            .await
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| CronError::TaskNotFound(name.to_string()))
    }

    pub async fn list_tasks(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tasks.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn enable_task(&self, name: &str) -> CronResult<()> {
        self.set_enabled(name, true).await
    }

    pub async fn disable_task(&self, name: &str) -> CronResult<()> {
        self.set_enabled(name, false).await
    }

    async fn set_enabled(&self, name: &str, enabled: bool) -> CronResult<()> {
        let mut tasks = self.tasks.write().await;
        let task = tasks
            .get_mut(name)
            .ok_or_else(|| CronError::TaskNotFound(name.to_string()))?;
        task.enabled = enabled;
        Ok(())
    }

    /// Start the background loop.
    pub async fn start(&mut self) -> CronResult<()> {
        let mut running = self.running.write().await;
        if *running {
            warn!("Cron scheduler already running");
            return Err(CronError::SchedulerAlreadyRunning);
        }
        *running = true;
        drop(running);

        info!("Cron scheduler started");

        let tasks = self.tasks.clone();
        let running = self.running.clone();
        let tick_interval = self.config.tick_interval;
        let log_execution = self.config.log_execution;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(tick_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            while *running.read().await {
                ticker.tick().await;
                let now = Instant::now();

                let due: Vec<_> = {
                    let mut tasks = tasks.write().await;
                    tasks
                        .values_mut()
                        .filter(|t| t.should_run(now))
                        .map(|t| (t.name.clone(), t.begin(now)))
                        .collect()
                };

                for (name, (function, context)) in due {
                    let tasks = tasks.clone();
                    tokio::spawn(async move {
                        if log_execution {
                            debug!(task = %name, run = context.run_count, "Running task");
                        }
                        let result = function(context).await;
                        if let Err(e) = &result {
                            warn!(task = %name, error = %e, "Task failed");
                        }
                        if let Some(task) = tasks.write().await.get_mut(&name) {
                            task.finish(&result);
                        }
                    });
                }
            }
        });

        self.handle = Some(handle);
        Ok(())
    }

    pub async fn stop(&mut self) -> CronResult<()> {
        let mut running = self.running.write().await;
        if !*running {
            return Err(CronError::SchedulerNotRunning);
        }
        *running = false;
        drop(running);

        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
        info!("Cron scheduler stopped");
        Ok(())
    }

    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }

    pub async fn stats(&self, name: &str) -> CronResult<TaskStats> {
        let tasks = self.tasks.read().await;
        let task = tasks
            .get(name)
            .ok_or_else(|| CronError::TaskNotFound(name.to_string()))?;

        Ok(TaskStats {
            name: task.name.clone(),
            enabled: task.enabled,
            every: task.every,
            run_count: task.run_count,
            failure_count: task.failure_count,
            last_run: task.last_run,
            status: task.status.clone(),
        })
    }
}

impl Default for CronScheduler {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of a task's bookkeeping.
#[derive(Debug, Clone)]
pub struct TaskStats {
    pub name: String,
    pub enabled: bool,
    pub every: Duration,
    pub run_count: u64,
    pub failure_count: u64,
    pub last_run: Option<chrono::DateTime<chrono::Utc>>,
    pub status: TaskStatus,
}
