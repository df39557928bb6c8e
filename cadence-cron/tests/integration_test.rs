//! Integration tests for cadence-cron

use cadence_cron::*;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

type Run = Pin<Box<dyn Future<Output = CronResult<()>> + Send>>;

fn counter_task(counter: Arc<AtomicUsize>) -> impl Fn(TaskContext) -> Run + Send + Sync + 'static {
    move |_ctx| {
        let counter = counter.clone();
        Box::pin(async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }
}

#[tokio::test(start_paused = true)]
async fn test_task_runs_on_its_interval() {
    let runs = Arc::new(AtomicUsize::new(0));
    let mut scheduler = CronScheduler::new();
    scheduler
        .add_task("dispatch", Duration::from_secs(10), counter_task(runs.clone()))
        .await
        .unwrap();
    scheduler.start().await.unwrap();

    tokio::time::sleep(Duration::from_secs(35)).await;
    let count = runs.load(Ordering::SeqCst);
    assert!((3..=4).contains(&count), "ran {count} times");

    scheduler.stop().await.unwrap();
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(runs.load(Ordering::SeqCst), count);
}

#[tokio::test(start_paused = true)]
async fn test_failing_task_keeps_running() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let seen = attempts.clone();

    let mut scheduler = CronScheduler::new();
    scheduler
        .add_task("flaky", Duration::from_secs(5), move |_ctx| {
            let seen = seen.clone();
            async move {
                seen.fetch_add(1, Ordering::SeqCst);
                Err(CronError::failed("transport down"))
            }
        })
        .await
        .unwrap();
    scheduler.start().await.unwrap();

    tokio::time::sleep(Duration::from_secs(21)).await;
    assert!(attempts.load(Ordering::SeqCst) >= 3);

    let stats = scheduler.stats("flaky").await.unwrap();
    assert!(stats.failure_count >= 3);
    assert_eq!(stats.failure_count, stats.run_count);
    assert!(matches!(stats.status, TaskStatus::Failed(_)));
    scheduler.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_disabled_task_is_skipped() {
    let runs = Arc::new(AtomicUsize::new(0));
    let mut scheduler = CronScheduler::new();
    scheduler
        .add_task("experiments", Duration::from_secs(2), counter_task(runs.clone()))
        .await
        .unwrap();
    scheduler.disable_task("experiments").await.unwrap();
    scheduler.start().await.unwrap();

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(runs.load(Ordering::SeqCst), 0);

    scheduler.enable_task("experiments").await.unwrap();
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert!(runs.load(Ordering::SeqCst) >= 1);
    assert!(scheduler.stats("experiments").await.unwrap().enabled);
    scheduler.stop().await.unwrap();
}
