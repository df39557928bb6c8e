//! Periodic task definition.

use crate::error::CronResult;
use chrono::{DateTime, Utc};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Task body type.
pub type TaskFn =
    Arc<dyn Fn(TaskContext) -> Pin<Box<dyn Future<Output = CronResult<()>> + Send>> + Send + Sync>;

/// Passed to every run of a task.
#[derive(Debug, Clone)]
pub struct TaskContext {
    pub name: String,
    /// Runs completed before this one
    pub run_count: u64,
    pub started_at: DateTime<Utc>,
}

/// Outcome of the latest run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskStatus {
    Idle,
    Running,
    Succeeded,
    Failed(String),
}

/// A named body run on a fixed interval.
pub struct Task {
    pub name: String,
    pub every: Duration,
    pub function: TaskFn,
    pub status: TaskStatus,
    pub enabled: bool,
    pub next_due: Instant,
    pub last_run: Option<DateTime<Utc>>,
    pub run_count: u64,
    pub failure_count: u64,
}

impl Task {
    /// First run is due one interval from now.
    pub fn new<F, Fut>(name: impl Into<String>, every: Duration, function: F) -> Self
    where
        F: Fn(TaskContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CronResult<()>> + Send + 'static,
    {
        let wrapped = Arc::new(
            move |ctx: TaskContext| -> Pin<Box<dyn Future<Output = CronResult<()>> + Send>> {
                Box::pin(function(ctx))
            },
        );

        Self {
            name: name.into(),
            every,
            function: wrapped,
            status: TaskStatus::Idle,
            enabled: true,
            next_due: Instant::now() + every,
            last_run: None,
            run_count: 0,
            failure_count: 0,
        }
    }

    /// Due, enabled and not already running.
    pub fn should_run(&self, now: Instant) -> bool {
        self.enabled && self.status != TaskStatus::Running && now >= self.next_due
    }

    /// Mark the task running and hand out what a run needs.
    pub fn begin(&mut self, now: Instant) -> (TaskFn, TaskContext) {
        self.status = TaskStatus::Running;
        self.next_due = now + self.every;
        let context = TaskContext {
            name: self.name.clone(),
            run_count: self.run_count,
            started_at: Utc::now(),
        };
        (self.function.clone(), context)
    }

    /// Record the result of a run started with [`Task::begin`].
    pub fn finish(&mut self, result: &CronResult<()>) {
        self.last_run = Some(Utc::now());
        self.run_count += 1;
        self.status = match result {
            Ok(()) => TaskStatus::Succeeded,
            Err(e) => {
                self.failure_count += 1;
                TaskStatus::Failed(e.to_string())
            }
        };
    }
}
