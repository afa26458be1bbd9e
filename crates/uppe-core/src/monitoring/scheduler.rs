use dashmap::DashMap;
use rand::Rng;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{Notify, Semaphore, mpsc};
use tokio::time::{MissedTickBehavior, interval, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::executor::MonitoringExecutor;
use crate::config::SchedulerConfig;
use crate::model::{HeartbeatRecord, Monitor};

/// A heartbeat together with the monitor definition it was produced for
#[derive(Debug, Clone)]
pub struct CheckReport {
    pub monitor: Arc<Monitor>,
    pub heartbeat: HeartbeatRecord,
}

struct ScheduledMonitor {
    token: CancellationToken,
    trigger: Arc<Notify>,
}

/// Monitoring scheduler - one ticking task per monitor
///
/// Checks of a single monitor never overlap; checks across monitors share a
/// global semaphore that grows with the number of scheduled monitors.
pub struct MonitoringScheduler {
    executor: Arc<MonitoringExecutor>,
    result_tx: mpsc::Sender<CheckReport>,
    config: SchedulerConfig,
    permits: Arc<Semaphore>,
    capacity: AtomicUsize,
    monitors: DashMap<Uuid, ScheduledMonitor>,
    shutdown: CancellationToken,
}

/// Everything one check cycle needs, moved into its task
struct CheckCycle {
    executor: Arc<MonitoringExecutor>,
    result_tx: mpsc::Sender<CheckReport>,
    permits: Arc<Semaphore>,
    monitor: Arc<Monitor>,
    token: CancellationToken,
    in_flight: Arc<AtomicBool>,
    jitter_ms: u64,
}

/// Clears the in-flight flag however the cycle ends
struct InFlightGuard(Arc<AtomicBool>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl CheckCycle {
    async fn run(self) {
        let _guard = InFlightGuard(Arc::clone(&self.in_flight));
        let monitor = &self.monitor;

        if self.jitter_ms > 0 {
            let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..=self.jitter_ms));
            tokio::select! {
                _ = self.token.cancelled() => return,
                _ = sleep(jitter) => {}
            }
        }

        let mut attempt = 0u32;
        loop {
            let will_retry = attempt < monitor.max_retries;

            let permit = tokio::select! {
                _ = self.token.cancelled() => return,
                permit = Arc::clone(&self.permits).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => return,
                },
            };
            // Not raced against the token: a paused monitor's check runs to completion
            let heartbeat = self.executor.execute_check(monitor, will_retry).await;
            drop(permit);

            if self.token.is_cancelled() {
                debug!(monitor_id = %monitor.id, "monitor unscheduled mid-check, discarding result");
                return;
            }

            let success = heartbeat.success;
            let report = CheckReport { monitor: Arc::clone(monitor), heartbeat };
            if let Err(e) = self.result_tx.send(report).await {
                warn!("Failed to send check result: {}", e);
                return;
            }
            if success || !will_retry {
                return;
            }

            attempt += 1;
            debug!(monitor_id = %monitor.id, attempt, "check failed, retrying");
            tokio::select! {
                _ = self.token.cancelled() => return,
                _ = sleep(monitor.retry_interval()) => {}
            }
        }
    }
}

impl MonitoringScheduler {
    pub fn new(
        executor: Arc<MonitoringExecutor>,
        result_tx: mpsc::Sender<CheckReport>,
        config: SchedulerConfig,
    ) -> Self {
        let initial = config.concurrency_for(0);
        Self {
            executor,
            result_tx,
            permits: Arc::new(Semaphore::new(initial)),
            capacity: AtomicUsize::new(initial),
            config,
            monitors: DashMap::new(),
            shutdown: CancellationToken::new(),
        }
    }

    /// Current bound on concurrently running checks
    pub fn concurrency_limit(&self) -> usize {
        self.capacity.load(Ordering::Acquire)
    }

    fn grow_permits(&self) {
        let target = self.config.concurrency_for(self.monitors.len());
        let previous = self.capacity.fetch_max(target, Ordering::AcqRel);
        if target > previous {
            self.permits.add_permits(target - previous);
            debug!(limit = target, "raised concurrent check limit");
        }
    }

    /// Start periodic checks for a monitor, replacing any existing schedule
    ///
    /// Paused monitors are unscheduled instead.
    pub fn schedule(&self, monitor: Monitor) {
        self.unschedule(monitor.id);
        if monitor.paused {
            debug!(monitor_id = %monitor.id, "monitor paused, not scheduling");
            return;
        }

        let token = self.shutdown.child_token();
        let trigger = Arc::new(Notify::new());
        let monitor = Arc::new(monitor);
        let id = monitor.id;

        let executor = Arc::clone(&self.executor);
        let result_tx = self.result_tx.clone();
        let permits = Arc::clone(&self.permits);
        let jitter_ms = self.config.jitter_ms;
        let task_token = token.clone();
        let task_trigger = Arc::clone(&trigger);

        tokio::spawn(async move {
            let in_flight = Arc::new(AtomicBool::new(false));
            let mut timer = interval(monitor.interval());
            timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = task_token.cancelled() => break,
                    _ = timer.tick() => {}
                    _ = task_trigger.notified() => {}
                }

                if in_flight.swap(true, Ordering::AcqRel) {
                    debug!(monitor_id = %monitor.id, "previous check still in flight, skipping tick");
                    continue;
                }

                let cycle = CheckCycle {
                    executor: Arc::clone(&executor),
                    result_tx: result_tx.clone(),
                    permits: Arc::clone(&permits),
                    monitor: Arc::clone(&monitor),
                    token: task_token.clone(),
                    in_flight: Arc::clone(&in_flight),
                    jitter_ms,
                };
                tokio::spawn(cycle.run());
            }
            debug!(monitor_id = %monitor.id, "schedule stopped");
        });

        self.monitors.insert(id, ScheduledMonitor { token, trigger });
        self.grow_permits();
        debug!(monitor_id = %id, "monitor scheduled");
    }

    /// Stop future checks; an in-flight check finishes but its result is dropped
    pub fn unschedule(&self, id: Uuid) -> bool {
        match self.monitors.remove(&id) {
            Some((_, scheduled)) => {
                scheduled.token.cancel();
                debug!(monitor_id = %id, "monitor unscheduled");
                true
            }
            None => false,
        }
    }

    /// Restart the schedule with a new definition, from now
    pub fn reschedule(&self, monitor: Monitor) {
        self.schedule(monitor);
    }

    /// Run a check now; skipped if one is already in flight
    pub fn trigger(&self, id: Uuid) -> bool {
        match self.monitors.get(&id) {
            Some(scheduled) => {
                scheduled.trigger.notify_one();
                true
            }
            None => false,
        }
    }

    pub fn is_scheduled(&self, id: Uuid) -> bool {
        self.monitors.contains_key(&id)
    }

    pub fn scheduled_count(&self) -> usize {
        self.monitors.len()
    }

    /// Cancel every schedule
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        self.monitors.clear();
        info!("monitoring scheduler stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{MonitorKind, MonitorTarget};
    use crate::monitoring::checker::{Checker, CheckerRegistry, Probe};
    use anyhow::{Result, bail};
    use std::sync::atomic::AtomicU32;

    /// Fails `failures` times, then succeeds; counts calls
    struct Scripted {
        failures: u32,
        calls: AtomicU32,
        delay: Duration,
    }

    impl Scripted {
        fn new(failures: u32) -> Arc<Self> {
            Arc::new(Self { failures, calls: AtomicU32::new(0), delay: Duration::ZERO })
        }
    }

    #[async_trait::async_trait]
    impl Checker for Scripted {
        async fn check(&self, _target: &MonitorTarget, _timeout: Duration) -> Result<Probe> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                sleep(self.delay).await;
            }
            if call < self.failures { bail!("refused") } else { Ok(Probe::new(5)) }
        }
    }

    fn scheduler(checker: Arc<dyn Checker>) -> (MonitoringScheduler, mpsc::Receiver<CheckReport>) {
        let mut registry = CheckerRegistry::new();
        registry.register(MonitorKind::Http, checker);
        let (tx, rx) = mpsc::channel(64);
        let config = SchedulerConfig { jitter_ms: 0, ..Default::default() };
        (MonitoringScheduler::new(Arc::new(MonitoringExecutor::new(registry)), tx, config), rx)
    }

    fn monitor(max_retries: u32) -> Monitor {
        Monitor::new("api", MonitorTarget::http("https://api.example.com"))
            .with_interval(60, 10)
            .with_retries(max_retries, 30)
    }

    #[tokio::test(start_paused = true)]
    async fn retries_mark_non_final_failures() {
        let (scheduler, mut rx) = scheduler(Scripted::new(u32::MAX));
        scheduler.schedule(monitor(2));

        let mut flags = Vec::new();
        for _ in 0..3 {
            let report = rx.recv().await.unwrap();
            assert!(!report.heartbeat.success);
            flags.push(report.heartbeat.retrying);
        }
        assert_eq!(flags, vec![true, true, false]);
        scheduler.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn success_ends_retry_cycle() {
        let checker = Scripted::new(1);
        let (scheduler, mut rx) = scheduler(checker.clone());
        scheduler.schedule(monitor(3));

        assert!(rx.recv().await.unwrap().heartbeat.retrying);
        let second = rx.recv().await.unwrap();
        assert!(second.heartbeat.success);
        assert!(!second.heartbeat.retrying);
        assert_eq!(checker.calls.load(Ordering::SeqCst), 2);
        scheduler.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn ticks_repeat_at_interval() {
        let checker = Scripted::new(0);
        let (scheduler, mut rx) = scheduler(checker.clone());
        scheduler.schedule(monitor(0));

        let started = tokio::time::Instant::now();
        rx.recv().await.unwrap();
        rx.recv().await.unwrap();
        assert!(started.elapsed() >= Duration::from_secs(60));
        assert_eq!(checker.calls.load(Ordering::SeqCst), 2);
        scheduler.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn unschedule_discards_in_flight_result() {
        let checker = Arc::new(Scripted {
            failures: 0,
            calls: AtomicU32::new(0),
            delay: Duration::from_secs(5),
        });
        let (scheduler, mut rx) = scheduler(checker.clone());
        let m = monitor(0);
        let id = m.id;
        scheduler.schedule(m);
        assert!(scheduler.is_scheduled(id));

        // Let the first check start, then pause mid-flight
        sleep(Duration::from_secs(1)).await;
        assert_eq!(checker.calls.load(Ordering::SeqCst), 1);
        assert!(scheduler.unschedule(id));
        assert!(!scheduler.is_scheduled(id));

        sleep(Duration::from_secs(600)).await;
        assert!(rx.try_recv().is_err());
        assert_eq!(checker.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn trigger_runs_check_now() {
        let checker = Scripted::new(0);
        let (scheduler, mut rx) = scheduler(checker.clone());
        let m = monitor(0);
        let id = m.id;
        scheduler.schedule(m);
        rx.recv().await.unwrap();

        sleep(Duration::from_secs(5)).await;
        assert!(scheduler.trigger(id));
        rx.recv().await.unwrap();
        assert_eq!(checker.calls.load(Ordering::SeqCst), 2);
        assert!(!scheduler.trigger(Uuid::new_v4()));
        scheduler.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn paused_monitors_are_not_scheduled() {
        let (scheduler, _rx) = scheduler(Scripted::new(0));
        let mut m = monitor(0);
        m.paused = true;
        scheduler.schedule(m);
        assert_eq!(scheduler.scheduled_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrency_grows_with_monitors() {
        let (scheduler, _rx) = scheduler(Scripted::new(0));
        assert_eq!(scheduler.concurrency_limit(), 4);
        for _ in 0..40 {
            scheduler.schedule(monitor(0));
        }
        assert_eq!(scheduler.scheduled_count(), 40);
        assert_eq!(scheduler.concurrency_limit(), 10);
        scheduler.shutdown();
        assert_eq!(scheduler.scheduled_count(), 0);
    }
}
