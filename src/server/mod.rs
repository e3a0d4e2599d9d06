/// Process supervision for Server Warden.
///
/// This module owns the single child server process: it starts, stops and
/// restarts it, drains its output into the console, injects commands into its
/// input stream, and reports liveness and resource usage. All public
/// operations are instrumented with `tracing` spans.
///
/// # Components
///
/// * `lifecycle` - Server state machine and the lifecycle event journal
/// * `monitor` - CPU and memory sampling of the live child
/// * `process` - Child handle with its output reader and exit reaper tasks
/// * `supervisor` - The serialized start/stop/restart state machine
///
/// # Examples
///
/// ```no_run
/// use server_warden::config::Config;
/// use server_warden::console::ConsoleBuffer;
/// use server_warden::server::{ServerState, Supervisor};
/// use std::sync::Arc;
///
/// # async fn run() -> server_warden::error::Result<()> {
/// let config = Config::default();
/// let console = Arc::new(ConsoleBuffer::new(config.console_capacity));
/// let supervisor = Supervisor::new(config, console);
///
/// supervisor.start(Some("4G")).await?;
/// supervisor.send_command("say hello").await?;
/// supervisor.stop().await?;
/// assert_eq!(supervisor.state(), ServerState::Stopped);
/// # Ok(())
/// # }
/// ```
pub mod lifecycle;
pub mod monitor;
mod process;
mod supervisor;

pub use lifecycle::{LifecycleEvent, ServerLifecycleEvent, ServerState, StateSnapshot};
pub use monitor::HealthReport;
pub use process::{ProcessExit, ServerId};
pub use supervisor::{StopOutcome, Supervisor};
