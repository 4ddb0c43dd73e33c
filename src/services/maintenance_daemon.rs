//! Periodic maintenance of the quota ledger and job table.
//!
//! Each cycle:
//! - clears quota buckets dated before today;
//! - fails `processing` jobs whose job lock expired, which covers watchdogs
//!   lost to a process restart.

use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tokio::time::{interval, Instant};
use tracing::{debug, info, warn};

use crate::domain::errors::DomainResult;
use crate::domain::models::{FailureCode, JobFailure, MaintenanceConfig};
use crate::domain::ports::JobRepository;
use crate::services::quota_ledger::QuotaLedger;

#[derive(Debug, Clone)]
pub struct MaintenanceDaemonConfig {
    pub interval: Duration,
    pub run_on_startup: bool,
    pub max_consecutive_failures: u32,
}

impl Default for MaintenanceDaemonConfig {
    fn default() -> Self {
        Self::from(&MaintenanceConfig::default())
    }
}

impl From<&MaintenanceConfig> for MaintenanceDaemonConfig {
    fn from(config: &MaintenanceConfig) -> Self {
        Self {
            interval: Duration::from_secs(config.interval_secs),
            run_on_startup: true,
            max_consecutive_failures: config.max_consecutive_failures,
        }
    }
}

/// What one cycle did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    pub stale_buckets_cleared: u64,
    pub expired_jobs_failed: usize,
}

#[derive(Debug, Clone)]
pub enum MaintenanceEvent {
    Started,
    CycleCompleted {
        run_number: u64,
        report: MaintenanceReport,
        duration_ms: u64,
    },
    CycleFailed {
        run_number: u64,
        error: String,
    },
    Stopped {
        reason: StopReason,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    Requested,
    TooManyFailures,
}

#[derive(Debug, Clone, Default)]
pub struct DaemonStatus {
    pub running: bool,
    pub total_runs: u64,
    pub successful_runs: u64,
    pub failed_runs: u64,
    pub last_run: Option<Instant>,
    pub total_buckets_cleared: u64,
    pub total_jobs_expired: u64,
}

/// Handle to control a running daemon.
#[derive(Clone)]
pub struct DaemonHandle {
    stop_flag: Arc<AtomicBool>,
    status: Arc<RwLock<DaemonStatus>>,
}

impl DaemonHandle {
    /// Ask the daemon to stop after its current tick.
    pub fn stop(&self) {
        self.stop_flag.store(true, Ordering::Release);
    }

    pub fn is_stop_requested(&self) -> bool {
        self.stop_flag.load(Ordering::Acquire)
    }

    pub async fn status(&self) -> DaemonStatus {
        self.status.read().await.clone()
    }
}

pub struct MaintenanceDaemon {
    ledger: QuotaLedger,
    jobs: Arc<dyn JobRepository>,
    config: MaintenanceDaemonConfig,
    status: Arc<RwLock<DaemonStatus>>,
    stop_flag: Arc<AtomicBool>,
}

impl MaintenanceDaemon {
    pub fn new(ledger: QuotaLedger, jobs: Arc<dyn JobRepository>, config: MaintenanceDaemonConfig) -> Self {
        Self {
            ledger,
            jobs,
            config,
            status: Arc::new(RwLock::new(DaemonStatus::default())),
            stop_flag: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn handle(&self) -> DaemonHandle {
        DaemonHandle {
            stop_flag: self.stop_flag.clone(),
            status: self.status.clone(),
        }
    }

    /// One maintenance pass.
    pub async fn run_cycle(&self) -> DomainResult<MaintenanceReport> {
        let stale_buckets_cleared = self.ledger.reset_stale(None).await?;
        let expired = self
            .jobs
            .fail_expired_processing(
                Utc::now(),
                &JobFailure::new(
                    FailureCode::Timeout,
                    "Evaluation lock expired before the job finished",
                ),
            )
            .await?;
        for job_id in &expired {
            warn!(job_id = %job_id, "Failed job with expired processing lock");
        }
        Ok(MaintenanceReport {
            stale_buckets_cleared,
            expired_jobs_failed: expired.len(),
        })
    }

    /// Start the loop on its own task, returning a channel of events.
    pub fn run(self) -> mpsc::Receiver<MaintenanceEvent> {
        let (tx, rx) = mpsc::channel(100);
        tokio::spawn(async move {
            self.run_loop(tx).await;
        });
        rx
    }

    async fn run_loop(self, tx: mpsc::Sender<MaintenanceEvent>) {
        self.status.write().await.running = true;
        let _ = tx.send(MaintenanceEvent::Started).await;
        info!(interval_secs = self.config.interval.as_secs(), "Maintenance daemon started");

        let mut consecutive_failures = 0u32;
        let mut timer = interval(self.config.interval);
        if !self.config.run_on_startup {
            // The first tick of a tokio interval completes immediately.
            timer.tick().await;
        }

        let reason = loop {
            timer.tick().await;
            if self.stop_flag.load(Ordering::Acquire) {
                break StopReason::Requested;
            }
            self.cycle(&tx, &mut consecutive_failures).await;
            if consecutive_failures >= self.config.max_consecutive_failures {
                break StopReason::TooManyFailures;
            }
        };

        self.status.write().await.running = false;
        info!(?reason, "Maintenance daemon stopped");
        let _ = tx.send(MaintenanceEvent::Stopped { reason }).await;
    }

    async fn cycle(&self, tx: &mpsc::Sender<MaintenanceEvent>, consecutive_failures: &mut u32) {
        let run_number = {
            let mut status = self.status.write().await;
            status.total_runs += 1;
            status.total_runs
        };

        let start = Instant::now();
        let result = self.run_cycle().await;
        let duration_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);

        match result {
            Ok(report) => {
                *consecutive_failures = 0;
                {
                    let mut status = self.status.write().await;
                    status.successful_runs += 1;
                    status.last_run = Some(Instant::now());
                    status.total_buckets_cleared += report.stale_buckets_cleared;
                    status.total_jobs_expired += report.expired_jobs_failed as u64;
                }
                debug!(run_number, ?report, duration_ms, "Maintenance cycle completed");
                let _ = tx
                    .send(MaintenanceEvent::CycleCompleted {
                        run_number,
                        report,
                        duration_ms,
                    })
                    .await;
            }
            Err(e) => {
                *consecutive_failures += 1;
                self.status.write().await.failed_runs += 1;
                warn!(run_number, error = %e, "Maintenance cycle failed");
                let _ = tx
                    .send(MaintenanceEvent::CycleFailed {
                        run_number,
                        error: e.to_string(),
                    })
                    .await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::{
        initialize_test_database, SqliteCredentialRepository, SqliteJobRepository,
        SqliteQuotaRepository,
    };
    use crate::domain::models::{Credential, Job, JobStatus, ModelCategory, QuotaBucket};
    use crate::domain::ports::{CredentialRepository, QuotaRepository};
    use uuid::Uuid;

    struct Fixture {
        daemon: MaintenanceDaemon,
        jobs: Arc<SqliteJobRepository>,
        quota: Arc<SqliteQuotaRepository>,
        credential: Credential,
    }

    async fn fixture(interval: Duration) -> Fixture {
        let db = initialize_test_database().await.unwrap();
        let credential = Credential::new("daemon", "key-daemon-0001");
        SqliteCredentialRepository::new(db.clone())
            .create(&credential)
            .await
            .unwrap();
        let jobs = Arc::new(SqliteJobRepository::new(db.clone()));
        let quota = Arc::new(SqliteQuotaRepository::new(db));
        let daemon = MaintenanceDaemon::new(
            QuotaLedger::new(quota.clone()),
            jobs.clone(),
            MaintenanceDaemonConfig {
                interval,
                run_on_startup: true,
                max_consecutive_failures: 3,
            },
        );
        Fixture {
            daemon,
            jobs,
            quota,
            credential,
        }
    }

    #[tokio::test]
    async fn test_cycle_clears_stale_buckets_and_expired_jobs() {
        let f = fixture(Duration::from_secs(60)).await;
        let yesterday = Utc::now().date_naive() - chrono::Duration::days(1);
        f.quota
            .put_bucket(f.credential.id, ModelCategory::Speech, QuotaBucket::exhausted_on(yesterday))
            .await
            .unwrap();

        let job = Job::new("u1", "t1", vec![]);
        f.jobs.create_replacing_active(&job, "replaced").await.unwrap();
        f.jobs
            .start_processing(job.id, Uuid::new_v4(), Utc::now() - chrono::Duration::seconds(5))
            .await
            .unwrap();

        let report = f.daemon.run_cycle().await.unwrap();
        assert_eq!(
            report,
            MaintenanceReport {
                stale_buckets_cleared: 1,
                expired_jobs_failed: 1
            }
        );
        let stored = f.jobs.get(job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Failed);
        assert_eq!(stored.error_code, Some(FailureCode::Timeout));
    }

    #[tokio::test]
    async fn test_daemon_runs_and_stops_on_request() {
        let f = fixture(Duration::from_millis(20)).await;
        let handle = f.daemon.handle();
        let mut events = f.daemon.run();

        assert!(matches!(events.recv().await, Some(MaintenanceEvent::Started)));
        assert!(matches!(
            events.recv().await,
            Some(MaintenanceEvent::CycleCompleted { run_number: 1, .. })
        ));
        handle.stop();

        let stopped = loop {
            match events.recv().await {
                Some(MaintenanceEvent::Stopped { reason }) => break reason,
                Some(_) => continue,
                None => panic!("daemon channel closed without a stop event"),
            }
        };
        assert_eq!(stopped, StopReason::Requested);
        let status = handle.status().await;
        assert!(!status.running);
        assert!(status.successful_runs >= 1);
    }
}
