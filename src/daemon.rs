//! Queue worker: drains the job queues on an interval until signalled.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};

use crate::app::{AppContext, DogearError, Result};
use crate::config::WorkerConfig;
use crate::pipeline::BatchReport;

/// Suffixes accepted by [`DaemonConfig::parse_interval`], largest first.
const UNITS: [(char, u64); 3] = [('h', 3600), ('m', 60), ('s', 1)];

/// Worker configuration
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub poll_interval: Duration,
    pub batch_size: usize,
    pub lease: Duration,
    /// Drain once and exit instead of polling
    pub once: bool,
}

impl DaemonConfig {
    pub fn from_worker(worker: &WorkerConfig, once: bool) -> Self {
        Self {
            poll_interval: Duration::from_secs(worker.poll_interval_secs.max(1)),
            batch_size: worker.batch_size.max(1),
            lease: worker.lease(),
            once,
        }
    }

    pub fn with_interval(mut self, secs: u64) -> Self {
        self.poll_interval = Duration::from_secs(secs);
        self
    }

    /// Parse an interval like "5s", "1m", "1h" or a bare number of seconds.
    pub fn parse_interval(s: &str) -> std::result::Result<u64, String> {
        let s = s.trim().to_lowercase();
        let (digits, factor) = UNITS
            .iter()
            .find_map(|&(unit, factor)| s.strip_suffix(unit).map(|d| (d, factor)))
            .unwrap_or((s.as_str(), 1));

        let value: u64 = digits
            .parse()
            .map_err(|_| format!("Invalid interval '{}'; use e.g. '5s', '1m' or '1h'", s))?;
        match value.checked_mul(factor) {
            Some(0) => Err("Interval must be at least one second".to_string()),
            Some(secs) => Ok(secs),
            None => Err(format!("Interval '{}' is too large", s)),
        }
    }

    /// Render seconds using the largest unit that divides them.
    pub fn format_interval(secs: u64) -> String {
        UNITS
            .iter()
            .find(|&&(_, factor)| secs >= factor && secs % factor == 0)
            .map(|&(unit, factor)| format!("{}{}", secs / factor, unit))
            .unwrap_or_else(|| format!("{}s", secs))
    }
}

/// PID file held for the lifetime of a polling worker; removed on drop.
struct PidLock {
    path: PathBuf,
}

impl PidLock {
    fn acquire(path: PathBuf) -> Result<Self> {
        if let Some(pid) = read_pid(&path) {
            if process_alive(pid) {
                return Err(DogearError::Other(format!(
                    "Another worker is already running (PID {})",
                    pid
                )));
            }
            tracing::debug!("Removing stale PID file for {}", pid);
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, format!("{}\n", std::process::id()))?;
        Ok(Self { path })
    }
}

impl Drop for PidLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            tracing::debug!("Could not remove PID file {}: {}", self.path.display(), e);
        }
    }
}

fn read_pid(path: &Path) -> Option<u32> {
    fs::read_to_string(path).ok()?.trim().parse().ok()
}

#[cfg(unix)]
fn process_alive(pid: u32) -> bool {
    std::process::Command::new("kill")
        .args(["-0", &pid.to_string()])
        .status()
        .is_ok_and(|s| s.success())
}

#[cfg(not(unix))]
fn process_alive(_pid: u32) -> bool {
    false
}

/// Worker runner
pub struct Daemon {
    ctx: Arc<AppContext>,
    config: DaemonConfig,
    shutdown: watch::Sender<bool>,
}

impl Daemon {
    pub fn new(ctx: Arc<AppContext>, config: DaemonConfig) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            ctx,
            config,
            shutdown,
        }
    }

    pub fn pid_file_path() -> Option<PathBuf> {
        dirs::runtime_dir()
            .or_else(dirs::cache_dir)
            .map(|d| d.join("dogear").join("worker.pid"))
    }

    /// Whether a live worker holds the PID file.
    pub fn is_running() -> bool {
        Self::pid_file_path()
            .and_then(|path| read_pid(&path))
            .is_some_and(process_alive)
    }

    fn listen_for_signals(&self) {
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            #[cfg(unix)]
            {
                use tokio::signal::unix::{signal, SignalKind};
                match signal(SignalKind::terminate()) {
                    Ok(mut sigterm) => {
                        tokio::select! {
                            _ = sigterm.recv() => {},
                            _ = tokio::signal::ctrl_c() => {},
                        }
                    }
                    Err(e) => {
                        tracing::warn!("Could not install SIGTERM handler: {}", e);
                        let _ = tokio::signal::ctrl_c().await;
                    }
                }
            }
            #[cfg(not(unix))]
            {
                let _ = tokio::signal::ctrl_c().await;
            }
            tracing::info!("Shutdown requested");
            let _ = shutdown.send(true);
        });
    }

    /// Run the worker
    pub async fn run(&self) -> Result<()> {
        if self.config.once {
            let report = self.drain().await;
            tracing::info!(
                "Single pass done: {} processed, {} failed",
                report.processed,
                report.failed
            );
            return Ok(());
        }

        let pid_path = Self::pid_file_path()
            .ok_or_else(|| DogearError::Other("No runtime directory for PID file".into()))?;
        let _lock = PidLock::acquire(pid_path)?;
        self.listen_for_signals();

        tracing::info!(
            "Dogear worker started (poll interval: {}, batch: {}, PID: {})",
            DaemonConfig::format_interval(self.config.poll_interval.as_secs()),
            self.config.batch_size,
            std::process::id()
        );

        let mut stopped = self.shutdown.subscribe();
        let mut timer = interval(self.config.poll_interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut totals = BatchReport::default();

        loop {
            tokio::select! {
                _ = stopped.changed() => break,
                _ = timer.tick() => {}
            }
            if *stopped.borrow() {
                break;
            }
            let report = self.drain().await;
            totals.processed += report.processed;
            totals.failed += report.failed;
        }

        tracing::info!(
            "Worker stopped after {} message(s), {} failed",
            totals.processed + totals.failed,
            totals.failed
        );
        Ok(())
    }

    async fn drain(&self) -> BatchReport {
        let result = self
            .ctx
            .pipeline
            .drain_once(self.ctx.queue.as_ref(), self.config.batch_size, self.config.lease)
            .await;

        match result {
            Ok(report) => {
                if report.processed + report.failed > 0 {
                    tracing::info!(
                        "Drained {} message(s), {} failed",
                        report.processed + report.failed,
                        report.failed
                    );
                }
                report
            }
            Err(e) => {
                tracing::error!("Failed to receive messages: {}", e);
                BatchReport::default()
            }
        }
    }

    /// Ask a running loop to exit after its current drain.
    pub fn stop(&self) {
        let _ = self.shutdown.send(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[test]
    fn test_parse_interval() {
        assert_eq!(DaemonConfig::parse_interval("1h").unwrap(), 3600);
        assert_eq!(DaemonConfig::parse_interval("2M").unwrap(), 120);
        assert_eq!(DaemonConfig::parse_interval(" 30s ").unwrap(), 30);
        assert_eq!(DaemonConfig::parse_interval("5").unwrap(), 5);
        assert!(DaemonConfig::parse_interval("0s").is_err());
        assert!(DaemonConfig::parse_interval("soon").is_err());
        assert!(DaemonConfig::parse_interval("99999999999999999999h").is_err());
    }

    #[test]
    fn test_format_interval() {
        assert_eq!(DaemonConfig::format_interval(3600), "1h");
        assert_eq!(DaemonConfig::format_interval(120), "2m");
        assert_eq!(DaemonConfig::format_interval(5), "5s");
        assert_eq!(DaemonConfig::format_interval(90), "90s");
    }

    #[test]
    fn test_pid_lock_replaces_stale_file_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("worker.pid");

        // PIDs this large are never live
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "4294967294\n").unwrap();

        {
            let _lock = PidLock::acquire(path.clone()).unwrap();
            assert_eq!(read_pid(&path), Some(std::process::id()));
        }
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_once_mode_drains_and_returns() {
        let ctx = AppContext::in_memory(Config::default()).unwrap();
        let config = DaemonConfig::from_worker(&ctx.config.worker, true);
        let daemon = Daemon::new(Arc::new(ctx), config);
        daemon.run().await.unwrap();
    }
}
