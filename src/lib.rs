/*!
 # Server Warden

 A Rust library for supervising a long-running game server process and
 managing its on-disk state.

 ## Overview

 Server Warden provides functionality to:
 - Start, stop and restart a single child server process, with a graceful
   shutdown that escalates to a forced kill after a timeout
 - Capture the child's console output into a bounded in-memory buffer
 - Inject console commands into the child's input stream
 - Snapshot world directories into zip backups and prune old backups
 - Extract untrusted world archives with path-traversal protection and an
   atomic swap into place
 - Edit the server's `key=value` properties file atomically

 ## Basic Usage

 ```no_run
 use server_warden::{Caller, ServerPanel};

 #[tokio::main]
 async fn main() -> server_warden::Result<()> {
     let panel = ServerPanel::from_config_file("warden.yaml")?;
     let admin = Caller::new("admin");

     let started = panel.start(&admin).await;
     println!("{}", started.message);

     panel.send_command(&admin, "say Backup in progress").await;
     let backup = panel.create_backup(&admin, Some("before-update")).await;
     println!("{}", backup.message);

     for line in panel.get_console_snapshot() {
         println!("[{}] {}", line.timestamp, line.text);
     }

     panel.shutdown().await;
     Ok(())
 }
 ```

 ## Features

 - **Process Supervision**: serialized state machine, crash reaping, health sampling
 - **Console Capture**: bounded FIFO shared by one writer and many readers
 - **Archives**: zip snapshots, retention, validated extraction
 - **Configuration**: JSON or YAML config files with environment overrides
 - **Result Values**: every panel operation reports success or failure as data
*/

pub mod api;
pub mod archive;
pub mod config;
pub mod console;
pub mod error;
pub mod properties;
pub mod server;
pub mod worlds;

pub use api::{ApiResult, Caller, StatusReport};
pub use config::Config;
pub use error::{Error, ErrorKind, Result};
pub use server::{HealthReport, ServerId, ServerState, StopOutcome, Supervisor};

use archive::{BackupInfo, enforce_retention, extract_safely, inspect, list_archives};
use config::{validate_config, validate_name};
use console::{ConsoleBuffer, LogLine};
use properties::PropertiesFile;
use server::LifecycleEvent;
use std::fs;
use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;
use tempfile::{NamedTempFile, TempPath};
use tokio::sync::Mutex;

const WORLD_COMMENT_PREFIX: &str = "world=";

/// Operator-facing control panel for one server installation.
///
/// This struct is the main entry point: one method per capability, each
/// returning an [`ApiResult`] instead of an error. Mutating operations take
/// the [`Caller`] on whose behalf they run and emit an audit record under the
/// `audit` tracing target. All public methods are instrumented with `tracing`
/// spans.
///
/// Archive and disk work runs on blocking threads and never holds the
/// supervisor's state lock; operations that replace on-disk data stop the
/// server first and restart it afterwards if it was running.
pub struct ServerPanel {
    /// Configuration
    config: Config,
    /// The supervised child process
    supervisor: Arc<Supervisor>,
    /// The server properties file
    properties: Arc<PropertiesFile>,
    /// Serializes starts with backup, restore and upload operations
    disk_lock: Mutex<()>,
}

impl ServerPanel {
    /// Create a panel from a configuration file path
    ///
    /// Environment overrides are applied and the result is validated.
    #[tracing::instrument(skip(path), fields(config_path = ?path.as_ref()))]
    pub fn from_config_file(path: impl AsRef<Path>) -> Result<Self> {
        tracing::info!("Loading configuration from file");
        let mut config = Config::from_file(path)?;
        config.apply_env_overrides();
        validate_config(&config)?;
        Ok(Self::new(config))
    }

    /// Create a panel from a configuration
    #[tracing::instrument(skip(config), fields(server_dir = %config.server_dir.display()))]
    pub fn new(config: Config) -> Self {
        tracing::info!("Creating new ServerPanel");
        let console = Arc::new(ConsoleBuffer::new(config.console_capacity));
        let properties = Arc::new(PropertiesFile::new(
            config.properties_path(),
            config.properties_backup_retention,
        ));
        let supervisor = Arc::new(Supervisor::new(config.clone(), console));
        Self {
            config,
            supervisor,
            properties,
            disk_lock: Mutex::new(()),
        }
    }

    /// The configuration this panel was built from
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The underlying supervisor
    pub fn supervisor(&self) -> &Arc<Supervisor> {
        &self.supervisor
    }

    /// Server state, binary presence, worlds and the active world.
    #[tracing::instrument(skip(self))]
    pub async fn get_status(&self) -> ApiResult<StatusReport> {
        ApiResult::from(self.status_report().await)
    }

    async fn status_report(&self) -> Result<(StatusReport, String)> {
        let status = self.supervisor.state();
        let binary = self.config.binary_path();
        let server_dir = self.config.server_dir.clone();
        let marker = self.config.world_marker.clone();

        let (has_binary, worlds) = blocking(move || {
            Ok((binary.is_file(), worlds::list_worlds(&server_dir, &marker)?))
        })
        .await?;
        let report = StatusReport {
            status,
            has_binary,
            worlds,
            active_world: self.active_world().await?,
        };
        Ok((report, format!("Server is {}", status)))
    }

    /// Start the server with the configured memory size.
    pub async fn start(&self, caller: &Caller) -> ApiResult<ServerId> {
        self.start_with_memory(caller, None).await
    }

    /// Start the server, overriding the heap size.
    ///
    /// Waits for any backup, restore or upload in progress to finish.
    #[tracing::instrument(skip(self), fields(caller = %caller))]
    pub async fn start_with_memory(
        &self,
        caller: &Caller,
        memory: Option<&str>,
    ) -> ApiResult<ServerId> {
        let _disk = self.disk_lock.lock().await;
        let result = self
            .supervisor
            .start(memory)
            .await
            .map(|id| (id, "Server started".to_string()));
        audit(caller, "start", result)
    }

    /// Gracefully stop the server.
    #[tracing::instrument(skip(self), fields(caller = %caller))]
    pub async fn stop(&self, caller: &Caller) -> ApiResult<StopOutcome> {
        let result = self.supervisor.stop().await.map(|outcome| {
            let message = match outcome {
                StopOutcome::Graceful => "Server stopped",
                StopOutcome::Forced => "Server stopped (forced after timeout)",
            };
            (outcome, message.to_string())
        });
        audit(caller, "stop", result)
    }

    /// Stop the server if it is running, then start it again with the heap
    /// size of its previous start.
    #[tracing::instrument(skip(self), fields(caller = %caller))]
    pub async fn restart(&self, caller: &Caller) -> ApiResult<ServerId> {
        let _disk = self.disk_lock.lock().await;
        let result = self
            .supervisor
            .restart(None)
            .await
            .map(|id| (id, "Server restarted".to_string()));
        audit(caller, "restart", result)
    }

    /// Send one console command to the running server.
    #[tracing::instrument(skip(self), fields(caller = %caller))]
    pub async fn send_command(&self, caller: &Caller, text: &str) -> ApiResult<()> {
        let result = self
            .supervisor
            .send_command(text)
            .await
            .map(|()| ((), "Command sent".to_string()));
        audit(caller, "command", result)
    }

    /// Copy of the captured console output, oldest first.
    pub fn get_console_snapshot(&self) -> Vec<LogLine> {
        self.supervisor.console().snapshot()
    }

    /// CPU, memory and uptime of the live child.
    pub async fn get_health(&self) -> HealthReport {
        self.supervisor.health().await
    }

    /// Recent lifecycle events, newest first.
    pub fn lifecycle_events(&self, limit: Option<usize>) -> Vec<LifecycleEvent> {
        self.supervisor.events(limit)
    }

    /// Snapshot the active world into the backup directory.
    ///
    /// `name` is an optional label; without one the archive is named after
    /// the current UTC time. Older archives beyond the retention count are
    /// deleted afterwards.
    #[tracing::instrument(skip(self), fields(caller = %caller))]
    pub async fn create_backup(&self, caller: &Caller, name: Option<&str>) -> ApiResult<BackupInfo> {
        let result = self.backup_active_world(name).await;
        audit(caller, "create_backup", result)
    }

    async fn backup_active_world(&self, label: Option<&str>) -> Result<(BackupInfo, String)> {
        let world = self.active_world().await?;
        let world_dir = self.config.server_dir.join(&world);
        if !worlds::is_world(&world_dir, &self.config.world_marker) {
            return Err(Error::InvalidInput(format!(
                "Active world '{}' does not exist",
                world
            )));
        }

        let file_name = match label {
            Some(label) => archive_file_name(label)?,
            None => format!("backup-{}.zip", chrono::Utc::now().format("%Y%m%d-%H%M%S-%3f")),
        };
        let backup_dir = self.config.backup_dir.clone();
        let dest = backup_dir.join(&file_name);
        let keep = self.config.backup_retention;
        let comment = format!("{}{}", WORLD_COMMENT_PREFIX, world);

        let _disk = self.disk_lock.lock().await;
        if dest.exists() {
            return Err(Error::InvalidInput(format!(
                "Backup '{}' already exists",
                file_name
            )));
        }

        let archive_name = file_name.clone();
        let (summary, pruned, info) = blocking(move || {
            let summary = archive::create_snapshot(&world_dir, &dest, Some(comment.as_str()))?;
            let pruned = enforce_retention(&backup_dir, keep)?;
            let info = list_archives(&backup_dir)?
                .into_iter()
                .find(|info| info.name == archive_name);
            Ok((summary, pruned, info))
        })
        .await?;

        let info = info.ok_or_else(|| {
            Error::io(
                format!("Backup '{}' vanished after creation", file_name),
                io::Error::from(io::ErrorKind::NotFound),
            )
        })?;
        tracing::info!(
            backup = %info.name,
            world = %world,
            files = summary.files,
            pruned = pruned.len(),
            "Backup created"
        );

        let mut message = format!("Backup '{}' of world \"{}\" created", info.name, world);
        if !pruned.is_empty() {
            message.push_str(&format!(", {} old backup(s) removed", pruned.len()));
        }
        Ok((info, message))
    }

    /// Backups on disk, newest first.
    #[tracing::instrument(skip(self))]
    pub async fn list_backups(&self) -> ApiResult<Vec<BackupInfo>> {
        let backup_dir = self.config.backup_dir.clone();
        let result = blocking(move || list_archives(&backup_dir))
            .await
            .map(|backups| {
                let message = format!("{} backup(s)", backups.len());
                (backups, message)
            });
        ApiResult::from(result)
    }

    /// Replace a world with the contents of a backup.
    ///
    /// The world is the one recorded in the archive, or the active world for
    /// archives that carry no record. The server is stopped for the swap and
    /// restarted afterwards if it was running.
    #[tracing::instrument(skip(self), fields(caller = %caller))]
    pub async fn restore_backup(&self, caller: &Caller, name: &str) -> ApiResult<String> {
        let result = self.restore(name).await;
        audit(caller, "restore_backup", result)
    }

    async fn restore(&self, name: &str) -> Result<(String, String)> {
        let file_name = archive_file_name(name)?;
        let archive_path = self.config.backup_dir.join(&file_name);
        if !archive_path.is_file() {
            return Err(Error::InvalidInput(format!("Backup '{}' not found", file_name)));
        }

        let _disk = self.disk_lock.lock().await;
        let listing = {
            let archive_path = archive_path.clone();
            blocking(move || inspect(&archive_path)).await?
        };
        if !listing.contains_marker(&self.config.world_marker) {
            return Err(Error::InvalidInput(format!(
                "Backup '{}' does not contain a world ({} missing)",
                file_name, self.config.world_marker
            )));
        }
        let world = match listing
            .comment
            .as_deref()
            .and_then(|c| c.strip_prefix(WORLD_COMMENT_PREFIX))
        {
            Some(world) => {
                validate_name("world", world)?;
                world.to_string()
            }
            None => self.active_world().await?,
        };

        let dest = self.config.server_dir.join(&world);
        let was_running = self.pause_server().await?;
        let extracted = blocking(move || extract_safely(&archive_path, &dest)).await;
        let resumed = self.resume_server(was_running).await;
        extracted?;

        let message = with_resume_note(
            format!("Backup '{}' restored into world \"{}\"", file_name, world),
            resumed,
        );
        Ok((world, message))
    }

    /// Delete one backup archive.
    #[tracing::instrument(skip(self), fields(caller = %caller))]
    pub async fn delete_backup(&self, caller: &Caller, name: &str) -> ApiResult<()> {
        let result = self.remove_backup(name).await;
        audit(caller, "delete_backup", result)
    }

    async fn remove_backup(&self, name: &str) -> Result<((), String)> {
        let file_name = archive_file_name(name)?;
        let path = self.config.backup_dir.join(&file_name);
        let message = format!("Backup '{}' deleted", file_name);

        let _disk = self.disk_lock.lock().await;
        blocking(move || match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(Error::InvalidInput(format!(
                "Backup '{}' not found",
                file_name
            ))),
            Err(e) => Err(Error::io(format!("Failed to delete {}", path.display()), e)),
        })
        .await?;
        Ok(((), message))
    }

    /// Replace the server binary.
    ///
    /// A running server is stopped first; it is not restarted.
    #[tracing::instrument(skip(self, bytes), fields(caller = %caller, bytes = bytes.len()))]
    pub async fn upload_server_binary(&self, caller: &Caller, bytes: Vec<u8>) -> ApiResult<()> {
        let result = self.replace_binary(bytes).await;
        audit(caller, "upload_server_binary", result)
    }

    async fn replace_binary(&self, bytes: Vec<u8>) -> Result<((), String)> {
        self.check_upload_size(bytes.len())?;
        let _disk = self.disk_lock.lock().await;
        self.pause_server().await?;

        let server_dir = self.config.server_dir.clone();
        let binary = self.config.binary_path();
        blocking(move || {
            let staged = stage_upload(&server_dir, &bytes)?;
            staged.persist(&binary).map_err(|e| {
                Error::io(format!("Failed to replace {}", binary.display()), e.error)
            })?;
            Ok(())
        })
        .await?;
        tracing::info!("Server binary replaced");
        Ok(((), "Server binary uploaded successfully".to_string()))
    }

    /// Install a zipped world under a name derived from `filename`.
    ///
    /// The archive is fully validated before the server is touched. A world
    /// with the same name is replaced; the server is restarted afterwards if
    /// it was running.
    #[tracing::instrument(skip(self, bytes), fields(caller = %caller, bytes = bytes.len()))]
    pub async fn upload_world(
        &self,
        caller: &Caller,
        bytes: Vec<u8>,
        filename: &str,
    ) -> ApiResult<String> {
        let result = self.install_world(bytes, filename).await;
        audit(caller, "upload_world", result)
    }

    async fn install_world(&self, bytes: Vec<u8>, filename: &str) -> Result<(String, String)> {
        let is_zip = Path::new(filename)
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("zip"));
        if !is_zip {
            return Err(Error::InvalidInput("Only .zip files are allowed".to_string()));
        }
        self.check_upload_size(bytes.len())?;
        let name = worlds::world_name_from_filename(filename).ok_or_else(|| {
            Error::InvalidInput(format!("Cannot derive a world name from '{}'", filename))
        })?;
        validate_name("world", &name)?;

        let dest = self.config.server_dir.join(&name);
        if dest.exists() && !worlds::is_world(&dest, &self.config.world_marker) {
            return Err(Error::InvalidInput(format!(
                "'{}' already exists and is not a world",
                name
            )));
        }

        let _disk = self.disk_lock.lock().await;
        let server_dir = self.config.server_dir.clone();
        let marker = self.config.world_marker.clone();
        let staged: TempPath = blocking(move || {
            let staged = stage_upload(&server_dir, &bytes)?.into_temp_path();
            let listing = inspect(&staged)?;
            if !listing.contains_marker(&marker) {
                return Err(Error::InvalidInput(format!(
                    "Archive does not contain a world ({} missing)",
                    marker
                )));
            }
            Ok(staged)
        })
        .await?;

        let was_running = self.pause_server().await?;
        let extracted = blocking(move || {
            let summary = extract_safely(&staged, &dest);
            drop(staged);
            summary
        })
        .await;
        let resumed = self.resume_server(was_running).await;
        extracted?;

        let message = with_resume_note(format!("World \"{}\" uploaded successfully", name), resumed);
        Ok((name, message))
    }

    /// Point the server at another world on its next start.
    #[tracing::instrument(skip(self), fields(caller = %caller))]
    pub async fn set_active_world(&self, caller: &Caller, name: &str) -> ApiResult<()> {
        let result = self.select_world(name).await;
        audit(caller, "set_active_world", result)
    }

    async fn select_world(&self, name: &str) -> Result<((), String)> {
        validate_name("world", name)?;
        let dir = self.config.server_dir.join(name);
        if dir.exists() && !worlds::is_world(&dir, &self.config.world_marker) {
            return Err(Error::InvalidInput(format!(
                "'{}' is not a world ({} missing)",
                name, self.config.world_marker
            )));
        }

        let properties = Arc::clone(&self.properties);
        let key = self.config.active_world_key.clone();
        let value = name.to_string();
        blocking(move || properties.set_and_persist(&key, &value)).await?;
        Ok((
            (),
            format!("Active world set to \"{}\". Restart server to apply.", name),
        ))
    }

    /// Raw text of the properties file.
    pub async fn get_properties(&self) -> ApiResult<String> {
        let properties = Arc::clone(&self.properties);
        match blocking(move || properties.read_raw()).await {
            Ok(Some(content)) => ApiResult::ok("Properties loaded", content),
            Ok(None) => ApiResult::failed(
                ErrorKind::Io,
                format!("No {} found", self.config.properties_file),
            ),
            Err(e) => ApiResult::failed(e.kind(), e.to_string()),
        }
    }

    /// Replace the properties file with `content`.
    #[tracing::instrument(skip(self, content), fields(caller = %caller, bytes = content.len()))]
    pub async fn set_properties(&self, caller: &Caller, content: String) -> ApiResult<()> {
        let properties = Arc::clone(&self.properties);
        let result = blocking(move || properties.replace_raw(&content))
            .await
            .map(|()| {
                (
                    (),
                    "Properties saved. Restart server to apply changes.".to_string(),
                )
            });
        audit(caller, "set_properties", result)
    }

    /// Stop a live child before the host exits.
    pub async fn shutdown(&self) {
        self.supervisor.shutdown().await;
    }

    /// The world named by the properties file, checked against the name rules
    /// since the file can be edited freely.
    async fn active_world(&self) -> Result<String> {
        let properties = Arc::clone(&self.properties);
        let key = self.config.active_world_key.clone();
        let world = blocking(move || properties.get(&key))
            .await?
            .filter(|world| !world.is_empty())
            .unwrap_or_else(|| self.config.default_world.clone());
        validate_name("world", &world)?;
        Ok(world)
    }

    fn check_upload_size(&self, len: usize) -> Result<()> {
        if len == 0 {
            return Err(Error::InvalidInput("Uploaded file is empty".to_string()));
        }
        if len as u64 > self.config.max_upload_bytes {
            return Err(Error::InvalidInput(format!(
                "Uploaded file exceeds the {} byte limit",
                self.config.max_upload_bytes
            )));
        }
        Ok(())
    }

    /// Stops a running server and waits for the settle delay.
    ///
    /// Returns whether the server was running.
    async fn pause_server(&self) -> Result<bool> {
        match self.supervisor.stop().await {
            Ok(_) => {
                tokio::time::sleep(self.config.restart_delay()).await;
                Ok(true)
            }
            Err(Error::NotRunning) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn resume_server(&self, was_running: bool) -> Option<Result<ServerId>> {
        if was_running {
            let memory = self.supervisor.last_memory();
            Some(self.supervisor.start(memory.as_deref()).await)
        } else {
            None
        }
    }
}

fn with_resume_note(mut message: String, resumed: Option<Result<ServerId>>) -> String {
    match resumed {
        Some(Ok(_)) => message.push_str(" and server restarted"),
        Some(Err(e)) => message.push_str(&format!(", but the server failed to restart: {}", e)),
        None => {}
    }
    message
}

fn audit<T>(caller: &Caller, action: &str, result: Result<(T, String)>) -> ApiResult<T> {
    let result = ApiResult::from(result);
    tracing::info!(
        target: "audit",
        caller = %caller,
        action,
        success = result.success,
        message = %result.message
    );
    result
}

/// Validates a backup label and returns its archive file name.
fn archive_file_name(label: &str) -> Result<String> {
    let stem = label.strip_suffix(".zip").unwrap_or(label);
    validate_name("backup", stem)?;
    Ok(format!("{}.zip", stem))
}

/// Writes an upload to a hidden temporary file inside `dir`.
fn stage_upload(dir: &Path, bytes: &[u8]) -> Result<NamedTempFile> {
    fs::create_dir_all(dir)
        .map_err(|e| Error::io(format!("Failed to create {}", dir.display()), e))?;
    let mut staged = tempfile::Builder::new()
        .prefix(".upload-")
        .tempfile_in(dir)
        .map_err(|e| Error::io("Failed to create upload file", e))?;
    staged
        .write_all(bytes)
        .and_then(|_| staged.as_file().sync_all())
        .map_err(|e| Error::io("Failed to write upload file", e))?;
    Ok(staged)
}

/// Runs synchronous disk work on the blocking pool.
async fn blocking<T, F>(work: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| Error::io("Background disk task failed", io::Error::other(e)))?
}
