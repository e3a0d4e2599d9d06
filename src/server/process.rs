// src/server/process.rs
use crate::config::LaunchConfig;
use crate::console::ConsoleBuffer;
use crate::error::{Error, Result};
use async_process::{ChildStdin, Command, Stdio};
use futures_lite::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{oneshot, watch};
use uuid::Uuid;

/// Unique identifier for one spawned child process.
///
/// A fresh id is minted for every `start`, so it doubles as the generation
/// token that keeps output from an old child out of the current console.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServerId(Uuid);

impl ServerId {
    // Private constructor, only usable within our crate
    pub(crate) fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ServerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How a child process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessExit {
    /// Exit code, absent when terminated by a signal or unknown
    pub code: Option<i32>,
    /// Whether the exit followed a kill request
    pub killed: bool,
}

impl fmt::Display for ProcessExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.code, self.killed) {
            (_, true) => write!(f, "killed"),
            (Some(code), false) => write!(f, "exit code {}", code),
            (None, false) => write!(f, "terminated by signal"),
        }
    }
}

/// Everything needed to launch one child.
pub(crate) struct LaunchSpec<'a> {
    pub launch: &'a LaunchConfig,
    pub memory: &'a str,
    pub binary: &'a Path,
    pub working_dir: &'a Path,
}

/// A live child server process.
///
/// Owns the input stream. The child handle itself lives in the reaper task,
/// which waits for exit, publishes it on a watch channel and honours kill
/// requests. One reader task per output stream drains lines into the console
/// until the stream closes.
pub(crate) struct ServerProcess {
    id: ServerId,
    pid: u32,
    started_at: Instant,
    stdin: Option<ChildStdin>,
    exit_rx: watch::Receiver<Option<ProcessExit>>,
    kill_tx: Option<oneshot::Sender<()>>,
}

impl ServerProcess {
    /// Spawns the child and its reader and reaper tasks.
    ///
    /// `on_exit` runs on the reaper task once the child has been reaped.
    pub(crate) fn spawn<F>(
        id: ServerId,
        spec: LaunchSpec<'_>,
        console: Arc<ConsoleBuffer>,
        on_exit: F,
    ) -> Result<Self>
    where
        F: FnOnce(ServerId, ProcessExit) + Send + 'static,
    {
        let binary = spec.binary.to_string_lossy();
        let args = spec.launch.render_args(spec.memory, &binary);

        let mut command = Command::new(&spec.launch.command);
        command
            .args(&args)
            .current_dir(spec.working_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (key, value) in &spec.launch.env {
            command.env(key, value);
        }

        tracing::debug!(command = %spec.launch.command, args = ?args, "Spawning server process");
        let mut child = command.spawn().map_err(|e| Error::Spawn {
            command: spec.launch.command.clone(),
            source: e,
        })?;

        let pid = child.id();
        let started_at = Instant::now();
        let stdin = child.stdin.take();

        if let Some(stdout) = child.stdout.take() {
            spawn_reader(stdout, id, Arc::clone(&console));
        }
        if let Some(stderr) = child.stderr.take() {
            spawn_reader(stderr, id, Arc::clone(&console));
        }

        let (exit_tx, exit_rx) = watch::channel(None);
        let (kill_tx, kill_rx) = oneshot::channel::<()>();

        tokio::spawn(async move {
            let natural = tokio::select! {
                status = child.status() => Some(status),
                _ = kill_rx => None,
            };
            let killed = natural.is_none();
            let status = match natural {
                Some(status) => status,
                None => {
                    if let Err(e) = child.kill() {
                        tracing::warn!(server_id = %id, error = %e, "Failed to kill server process");
                    }
                    child.status().await
                }
            };

            let exit = ProcessExit {
                code: status.as_ref().ok().and_then(|s| s.code()),
                killed,
            };
            if let Err(e) = &status {
                tracing::warn!(server_id = %id, error = %e, "Failed to reap server process");
            }
            tracing::info!(server_id = %id, pid, %exit, "Server process exited");

            let _ = exit_tx.send(Some(exit));
            on_exit(id, exit);
        });

        Ok(Self {
            id,
            pid,
            started_at,
            stdin,
            exit_rx,
            kill_tx: Some(kill_tx),
        })
    }

    /// Get the server ID
    pub(crate) fn id(&self) -> ServerId {
        self.id
    }

    pub(crate) fn pid(&self) -> u32 {
        self.pid
    }

    pub(crate) fn started_at(&self) -> Instant {
        self.started_at
    }

    /// The exit, if the child has already been reaped.
    pub(crate) fn exit(&self) -> Option<ProcessExit> {
        *self.exit_rx.borrow()
    }

    /// Writes one line to the child's input stream.
    pub(crate) async fn write_line(&mut self, line: &str) -> Result<()> {
        let stdin = self.stdin.as_mut().ok_or_else(|| {
            Error::io(
                "Server input stream is closed",
                std::io::Error::from(std::io::ErrorKind::BrokenPipe),
            )
        })?;
        let mut data = Vec::with_capacity(line.len() + 1);
        data.extend_from_slice(line.as_bytes());
        data.push(b'\n');

        stdin
            .write_all(&data)
            .await
            .map_err(|e| Error::io("Failed to write to server input", e))?;
        stdin
            .flush()
            .await
            .map_err(|e| Error::io("Failed to flush server input", e))?;
        Ok(())
    }

    /// Waits up to `timeout` for the child to exit.
    pub(crate) async fn wait_exit(&self, timeout: Duration) -> Option<ProcessExit> {
        let mut rx = self.exit_rx.clone();
        match tokio::time::timeout(timeout, rx.wait_for(Option::is_some)).await {
            Ok(Ok(exit)) => *exit,
            // The reaper always publishes before dropping its sender.
            Ok(Err(_)) => *self.exit_rx.borrow(),
            Err(_) => None,
        }
    }

    /// Asks the reaper to force-terminate the child.
    pub(crate) fn kill(&mut self) {
        if let Some(kill_tx) = self.kill_tx.take() {
            let _ = kill_tx.send(());
        }
    }
}

fn spawn_reader<R>(stream: R, generation: ServerId, console: Arc<ConsoleBuffer>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(stream);
        let mut buffer = Vec::new();

        loop {
            buffer.clear();
            match reader.read_until(b'\n', &mut buffer).await {
                Ok(0) => break, // EOF
                Ok(_) => {
                    let decoded = String::from_utf8_lossy(&buffer);
                    let line = decoded.trim_end_matches(['\r', '\n']);
                    tracing::debug!(target: "server_warden::console", server_id = %generation, "{}", line);
                    if !console.append_for(generation, line) {
                        tracing::debug!(server_id = %generation, "Console generation changed, reader exiting");
                        break;
                    }
                }
                Err(e) => {
                    tracing::debug!(server_id = %generation, error = %e, "Server output stream failed");
                    break;
                }
            }
        }
    });
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn sh(script: &str) -> LaunchConfig {
        LaunchConfig {
            command: "sh".to_string(),
            args: vec!["-c".to_string(), script.to_string()],
            env: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn test_output_is_captured_and_exit_published() {
        let dir = tempfile::tempdir().unwrap();
        let console = Arc::new(ConsoleBuffer::new(10));
        let id = ServerId::new();
        console.begin_generation(id);
        let launch = sh("echo hello; echo oops 1>&2; exit 3");

        let (tx, rx) = oneshot::channel();
        let process = ServerProcess::spawn(
            id,
            LaunchSpec {
                launch: &launch,
                memory: "1G",
                binary: &dir.path().join("server.jar"),
                working_dir: dir.path(),
            },
            Arc::clone(&console),
            move |exited, exit| {
                let _ = tx.send((exited, exit));
            },
        )
        .unwrap();

        let exit = process.wait_exit(Duration::from_secs(5)).await.unwrap();
        assert_eq!(exit.code, Some(3));
        assert!(!exit.killed);
        let (exited, _) = rx.await.unwrap();
        assert_eq!(exited, id);

        for _ in 0..50 {
            if console.len() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        let mut texts: Vec<String> = console.snapshot().into_iter().map(|l| l.text).collect();
        texts.sort();
        assert_eq!(texts, vec!["hello", "oops"]);
    }

    #[tokio::test]
    async fn test_kill_request_terminates_child() {
        let dir = tempfile::tempdir().unwrap();
        let console = Arc::new(ConsoleBuffer::new(10));
        let launch = sh("exec sleep 30");

        let mut process = ServerProcess::spawn(
            ServerId::new(),
            LaunchSpec {
                launch: &launch,
                memory: "1G",
                binary: &dir.path().join("server.jar"),
                working_dir: dir.path(),
            },
            console,
            |_, _| {},
        )
        .unwrap();

        assert!(process.wait_exit(Duration::from_millis(100)).await.is_none());
        process.kill();
        let exit = process.wait_exit(Duration::from_secs(5)).await.unwrap();
        assert!(exit.killed);
    }
}
