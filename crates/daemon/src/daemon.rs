//! Daemon startup and main loop for stream-warden
//!
//! Wires the registry, the event consumer, the log book and the status
//! server together, registers the configured jobs, and tears everything
//! down on shutdown.

use crate::config::{Config, ConfigError};
use crate::events::{event_channel, EventReceiver};
use crate::logbook::LogBook;
use crate::registry::JobRegistry;
use crate::status_server::{bind_status_listener, serve_status, ApiState, ServerError};
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Error type for daemon operations
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The output root could not be created
    #[error("Cannot create output root: {0}")]
    OutputRoot(#[source] std::io::Error),

    /// Server error
    #[error("Server error: {0}")]
    Server(#[from] ServerError),
}

/// Daemon state containing all runtime components
pub struct Daemon {
    /// Configuration loaded from file and environment
    pub config: Config,
    registry: Arc<JobRegistry>,
    logbook: Arc<LogBook>,
    /// Taken by the event consumer when the daemon runs
    events: Option<EventReceiver>,
}

impl Daemon {
    /// Initialize the daemon from an already loaded configuration
    ///
    /// # Arguments
    /// * `config` - Configuration; validated here
    ///
    /// # Returns
    /// * `Ok(Daemon)` - Output root exists and the registry is ready
    /// * `Err(DaemonError)` - Invalid configuration or unusable output root
    pub fn new(config: Config) -> Result<Self, DaemonError> {
        config.validate()?;
        std::fs::create_dir_all(&config.output.root).map_err(DaemonError::OutputRoot)?;

        let (sink, events) = event_channel();
        let registry = Arc::new(JobRegistry::new(&config, sink));

        Ok(Self {
            config,
            registry,
            logbook: Arc::new(LogBook::default()),
            events: Some(events),
        })
    }

    /// Load the config file, apply environment overrides and initialize
    pub fn load<P: AsRef<Path>>(config_path: P) -> Result<Self, DaemonError> {
        Self::new(Config::load(config_path)?)
    }

    pub fn registry(&self) -> Arc<JobRegistry> {
        self.registry.clone()
    }

    pub fn logbook(&self) -> Arc<LogBook> {
        self.logbook.clone()
    }

    /// Start feeding the log book from the event channel
    ///
    /// Returns `None` if the consumer was already started.
    pub fn start_event_consumer(&mut self) -> Option<JoinHandle<()>> {
        let mut events = self.events.take()?;
        let logbook = self.logbook.clone();
        Some(tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                logbook.record(&event);
            }
        }))
    }

    /// Register the configured jobs and start the ones flagged `autostart`
    ///
    /// Per-job problems are logged and never abort the others.
    ///
    /// # Returns
    /// Number of jobs registered
    pub async fn register_jobs(&self) -> usize {
        let mut added = 0;
        for entry in &self.config.jobs {
            if self
                .registry
                .add_with_quality(&entry.name, &entry.url, entry.delay_minutes, entry.quality.clone())
                .await
                .is_err()
            {
                continue;
            }
            added += 1;

            if !self.registry.check_url(&entry.url).await {
                self.registry
                    .events()
                    .warn(format!("Warning: URL may not be accessible: {}", entry.url));
            }
            if entry.autostart {
                // Failures are already on the application log.
                let _ = self.registry.start(&entry.name).await;
            }
        }
        added
    }

    /// Run until Ctrl-C, then stop every job
    pub async fn run(self) -> Result<(), DaemonError> {
        self.run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("cannot listen for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
            }
            tracing::info!("shutdown requested");
        })
        .await
    }

    /// Run until `shutdown` resolves, then stop every job
    ///
    /// The status server is bound before any job starts; a bind failure is
    /// a startup failure.
    pub async fn run_until<F>(mut self, shutdown: F) -> Result<(), DaemonError>
    where
        F: Future<Output = ()>,
    {
        let consumer = self.start_event_consumer();
        let server_stop = CancellationToken::new();

        let server = if self.config.server.enabled {
            let listener = bind_status_listener(&self.config.server.bind).await?;
            let state = ApiState {
                registry: self.registry.clone(),
                logbook: self.logbook.clone(),
                output_root: self.config.output.root.clone(),
            };
            let stop = server_stop.clone();
            Some(tokio::spawn(async move {
                if let Err(e) = serve_status(listener, state, stop).await {
                    tracing::error!("Status server error: {}", e);
                }
            }))
        } else {
            None
        };

        let added = self.register_jobs().await;
        tracing::info!("stream-warden running with {} job(s)", added);

        shutdown.await;

        self.registry.shutdown().await;
        server_stop.cancel();
        if let Some(server) = server {
            let _ = server.await;
        }
        if let Some(consumer) = consumer {
            consumer.abort();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::JobEntry;
    use tempfile::TempDir;

    fn create_test_config(root: &Path) -> Config {
        let mut config = Config::default();
        config.output.root = root.join("recordings");
        config.server.enabled = false;
        config
    }

    #[test]
    fn test_new_creates_output_root() {
        let dir = TempDir::new().unwrap();
        let config = create_test_config(dir.path());
        let daemon = Daemon::new(config.clone()).unwrap();
        assert!(dir.path().join("recordings").is_dir());
        assert_eq!(daemon.config, config);
    }

    #[test]
    fn test_unusable_output_root_is_fatal() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, b"not a directory").unwrap();
        let mut config = create_test_config(dir.path());
        config.output.root = blocker.join("recordings");

        assert!(matches!(Daemon::new(config), Err(DaemonError::OutputRoot(_))));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let dir = TempDir::new().unwrap();
        let mut config = create_test_config(dir.path());
        config.compression.crf = 90;
        assert!(matches!(Daemon::new(config), Err(DaemonError::Config(_))));
    }

    #[tokio::test]
    async fn test_event_consumer_feeds_logbook() {
        let dir = TempDir::new().unwrap();
        let mut daemon = Daemon::new(create_test_config(dir.path())).unwrap();
        let consumer = daemon.start_event_consumer().unwrap();
        assert!(daemon.start_event_consumer().is_none());

        daemon.registry().add("a", "https://example.com/a", 1).await.unwrap();
        let logbook = daemon.logbook();
        for _ in 0..100 {
            if !logbook.recent(crate::logbook::LogChannel::App).is_empty() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        let lines = logbook.recent(crate::logbook::LogChannel::App);
        assert!(lines.iter().any(|l| l.ends_with("Added stream: a")), "{:?}", lines);
        consumer.abort();
    }

    #[tokio::test]
    async fn test_register_jobs_adds_every_entry() {
        let dir = TempDir::new().unwrap();
        let mut config = create_test_config(dir.path());
        config.capture.program = dir.path().join("missing").to_string_lossy().into_owned();
        config.jobs = vec![
            JobEntry {
                name: "a".to_string(),
                url: "https://example.com/a".to_string(),
                delay_minutes: 2,
                quality: Some("720p".to_string()),
                autostart: true,
            },
            JobEntry {
                name: "b".to_string(),
                url: "https://example.com/b".to_string(),
                delay_minutes: 0,
                quality: None,
                autostart: false,
            },
        ];
        let daemon = Daemon::new(config).unwrap();

        assert_eq!(daemon.register_jobs().await, 2);
        let registry = daemon.registry();
        let a = registry.snapshot("a").await.unwrap();
        assert_eq!(a.quality, "720p");
        assert_eq!(a.delay_minutes, 2);
        // Autostart failed pre-flight, which leaves the job Stopped.
        assert_eq!(a.state, crate::job::JobState::Stopped);
        assert_eq!(registry.snapshot("b").await.unwrap().quality, "best");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_until_stops_every_job() {
        use crate::pipeline::is_process_alive;
        use crate::test_support::FakeTools;

        let dir = TempDir::new().unwrap();
        let tools = FakeTools::new(dir.path()).capture("exec sleep 30\n");
        let mut config = create_test_config(dir.path());
        config.capture = tools.capture_config();
        config.supervisor.terminate_timeout_secs = 1;
        config.jobs = vec![JobEntry {
            name: "a".to_string(),
            url: "https://example.com/a".to_string(),
            delay_minutes: 1,
            quality: None,
            autostart: true,
        }];
        let daemon = Daemon::new(config).unwrap();
        let registry = daemon.registry();

        // The shutdown future records the pids it saw running.
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let seen_by_shutdown = seen.clone();
        let watcher = registry.clone();
        let shutdown = async move {
            for _ in 0..500 {
                if let Some(snap) = watcher.snapshot("a").await {
                    if !snap.pids.is_empty() {
                        *seen_by_shutdown.lock().unwrap() = snap.pids;
                        return;
                    }
                }
                tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            }
        };

        daemon.run_until(shutdown).await.unwrap();
        let pids = seen.lock().unwrap().clone();
        assert!(!pids.is_empty());

        let snap = registry.snapshot("a").await.unwrap();
        assert_eq!(snap.state, crate::job::JobState::Stopped);
        for pid in pids {
            assert!(!is_process_alive(pid));
        }
    }
}
