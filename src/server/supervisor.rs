use crate::config::{Config, validate_command, validate_memory};
use crate::console::ConsoleBuffer;
use crate::error::{Error, Result};
use crate::server::lifecycle::{
    LifecycleEvent, ServerLifecycleEvent, ServerState, StateCell, StateSnapshot,
};
use crate::server::monitor::{self, HealthReport};
use crate::server::process::{LaunchSpec, ProcessExit, ServerId, ServerProcess};
use serde::Serialize;
use std::fs;
use std::io;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;
use tokio::sync::{Mutex, watch};
use tokio::time::Instant;

const COMMAND_WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// How a completed `stop` ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StopOutcome {
    /// The child exited on its own within the timeout
    Graceful,
    /// The child was force-terminated after the timeout
    Forced,
}

/// Owner of the single supervised child process.
///
/// `start`, `stop` and `restart` are serialized by one async lock around the
/// current child handle. State reads go through a `watch` channel and never
/// wait on that lock. Each child gets a reaper task that flips the state to
/// `Stopped` when the child exits without a stop request.
pub struct Supervisor {
    config: Config,
    console: Arc<ConsoleBuffer>,
    state: Arc<StateCell>,
    current: Mutex<Option<ServerProcess>>,
    /// Heap size of the last successful start
    last_memory: StdMutex<Option<String>>,
}

impl Supervisor {
    /// Create a new supervisor writing child output into `console`.
    pub fn new(config: Config, console: Arc<ConsoleBuffer>) -> Self {
        Self {
            config,
            console,
            state: Arc::new(StateCell::new()),
            current: Mutex::new(None),
            last_memory: StdMutex::new(None),
        }
    }

    /// Current state.
    pub fn state(&self) -> ServerState {
        self.state.snapshot().state
    }

    /// Current state with child details.
    pub fn snapshot(&self) -> StateSnapshot {
        self.state.snapshot()
    }

    /// Receiver notified on every state change.
    pub fn subscribe(&self) -> watch::Receiver<StateSnapshot> {
        self.state.subscribe()
    }

    /// The console sink the child writes into.
    pub fn console(&self) -> &Arc<ConsoleBuffer> {
        &self.console
    }

    /// Recent lifecycle events, newest first.
    pub fn events(&self, limit: Option<usize>) -> Vec<LifecycleEvent> {
        self.state.events(limit)
    }

    /// Heap size the server was last started with, if it was started at all.
    pub fn last_memory(&self) -> Option<String> {
        self.last_memory
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Start the server with `memory` as heap size, or the configured default.
    ///
    /// Only legal from `Stopped`.
    #[tracing::instrument(skip(self))]
    pub async fn start(&self, memory: Option<&str>) -> Result<ServerId> {
        let memory = memory.unwrap_or(&self.config.memory);
        validate_memory(memory)?;
        if self.state() != ServerState::Stopped {
            return Err(Error::AlreadyRunning);
        }

        let mut current = self.current.lock().await;
        if self.state() != ServerState::Stopped {
            return Err(Error::AlreadyRunning);
        }
        if let Some(stale) = current.take() {
            tracing::debug!(server_id = %stale.id(), "Discarding exited server handle");
        }

        let binary = self.config.binary_path();
        if !binary.is_file() {
            return Err(Error::MissingBinary { path: binary });
        }
        self.ensure_license()?;

        self.state.set_starting();
        let id = ServerId::new();
        self.console.begin_generation(id);
        self.console.append_for(id, "Starting server...");

        let state = Arc::clone(&self.state);
        let spawned = ServerProcess::spawn(
            id,
            LaunchSpec {
                launch: &self.config.launch,
                memory,
                binary: &binary,
                working_dir: &self.config.server_dir,
            },
            Arc::clone(&self.console),
            move |id, exit| observe_exit(&state, id, exit),
        );

        let process = match spawned {
            Ok(process) => process,
            Err(e) => {
                tracing::error!(error = %e, "Failed to start server");
                self.console.append(format!("Failed to start server: {}", e));
                self.state
                    .record_event(None, ServerLifecycleEvent::StartFailed, Some(e.to_string()));
                self.state.set_stopped();
                return Err(e);
            }
        };

        self.state.set_running(id, process.pid(), process.started_at());
        // The reaper may have finished before the state said Running.
        if let Some(exit) = process.exit() {
            observe_exit(&self.state, id, exit);
        }

        tracing::info!(server_id = %id, pid = process.pid(), memory, "Server started");
        self.state.record_event(
            Some(id),
            ServerLifecycleEvent::Started,
            Some(format!("pid {}", process.pid())),
        );
        *current = Some(process);
        *self.last_memory.lock().unwrap_or_else(PoisonError::into_inner) = Some(memory.to_string());
        Ok(id)
    }

    /// Stop the server using the configured timeout.
    pub async fn stop(&self) -> Result<StopOutcome> {
        self.stop_with_timeout(self.config.stop_timeout()).await
    }

    /// Ask the server to shut down, forcing termination after `timeout`.
    ///
    /// Only legal from `Running`. Always leaves the state at `Stopped`.
    #[tracing::instrument(skip(self))]
    pub async fn stop_with_timeout(&self, timeout: Duration) -> Result<StopOutcome> {
        if self.state() != ServerState::Running {
            return Err(Error::NotRunning);
        }
        let deadline = Instant::now() + timeout;

        let mut current = self.current.lock().await;
        let snapshot = self.state.snapshot();
        let (Some(process), ServerState::Running) = (current.as_mut(), snapshot.state) else {
            return Err(Error::NotRunning);
        };
        let id = process.id();

        match tokio::time::timeout_at(deadline, process.write_line(&self.config.stop_command))
            .await
        {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(server_id = %id, error = %e, "Failed to send stop command"),
            Err(_) => tracing::warn!(server_id = %id, "Timed out sending stop command"),
        }

        let outcome = if self.state.set_stopping(id) {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match process.wait_exit(remaining).await {
                Some(_) => StopOutcome::Graceful,
                None => {
                    tracing::warn!(server_id = %id, ?timeout, "Server did not stop in time, killing");
                    process.kill();
                    if process.wait_exit(self.config.kill_grace()).await.is_none() {
                        tracing::error!(server_id = %id, "Server process not reaped after kill");
                    }
                    StopOutcome::Forced
                }
            }
        } else {
            // Exited before the stop request took effect.
            StopOutcome::Graceful
        };

        current.take();
        self.state.set_stopped();
        self.console.append("Server stopped");

        let event = match outcome {
            StopOutcome::Graceful => ServerLifecycleEvent::Stopped,
            StopOutcome::Forced => ServerLifecycleEvent::Killed,
        };
        self.state.record_event(Some(id), event, None);
        tracing::info!(server_id = %id, ?outcome, "Server stopped");
        Ok(outcome)
    }

    /// Stop (if running), pause, then start again.
    ///
    /// Without `memory` the heap size of the previous start is kept.
    #[tracing::instrument(skip(self))]
    pub async fn restart(&self, memory: Option<&str>) -> Result<ServerId> {
        let memory = memory.map(str::to_string).or_else(|| self.last_memory());
        match self.stop().await {
            Ok(_) | Err(Error::NotRunning) => {}
            Err(e) => return Err(e),
        }
        tokio::time::sleep(self.config.restart_delay()).await;
        self.start(memory.as_deref()).await
    }

    /// Write one console command to the server's input stream.
    #[tracing::instrument(skip(self))]
    pub async fn send_command(&self, text: &str) -> Result<()> {
        validate_command(text)?;
        if self.state() != ServerState::Running {
            return Err(Error::NotRunning);
        }

        let mut current = self.current.lock().await;
        let process = match current.as_mut() {
            Some(process) if self.state() == ServerState::Running => process,
            _ => return Err(Error::NotRunning),
        };

        match tokio::time::timeout(COMMAND_WRITE_TIMEOUT, process.write_line(text)).await {
            Ok(result) => result,
            Err(_) => Err(Error::io(
                "Timed out writing to server input",
                io::Error::from(io::ErrorKind::TimedOut),
            )),
        }
    }

    /// Sample CPU and memory usage of the live child.
    pub async fn health(&self) -> HealthReport {
        monitor::sample(self.state.snapshot(), self.config.health_sample()).await
    }

    /// Gracefully stop a live child, bounded by the configured timeout.
    #[tracing::instrument(skip(self))]
    pub async fn shutdown(&self) {
        match self.stop().await {
            Ok(outcome) => tracing::info!(?outcome, "Server shut down"),
            Err(Error::NotRunning) => {}
            Err(e) => tracing::warn!(error = %e, "Failed to shut down server"),
        }
    }

    fn ensure_license(&self) -> Result<()> {
        let path = self.config.license_path();
        if path.exists() {
            return Ok(());
        }
        fs::write(&path, &self.config.license_contents)
            .map_err(|e| Error::io(format!("Failed to create {}", path.display()), e))?;
        tracing::info!(path = %path.display(), "License marker created");
        Ok(())
    }
}

fn observe_exit(state: &StateCell, id: ServerId, exit: ProcessExit) {
    if state.mark_exited(id) {
        tracing::warn!(server_id = %id, %exit, "Server exited unexpectedly");
        state.record_event(Some(id), ServerLifecycleEvent::Crashed, Some(exit.to_string()));
    }
}
