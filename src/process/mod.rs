//! Spawns and reaps the supervised child (the Minecraft server JVM), pumping
//! its stdio onto the event bus and escalating through
//! `platform::terminate_child` on stop. The controller never touches the OS
//! process directly, only a narrow [`ProcessControl`] boundary that
//! adds/removes the child as a tracked [`crate::supervisor::Service`].

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::events::Bus;
use crate::platform;
use crate::supervisor::{ExitReason, Service, ServiceToken, Supervisor};

const LOG4J2_TEMPLATE: &[u8] = include_bytes!("log4j2.xml.template");

/// Immutable launch parameters resolved once from config at startup.
#[derive(Debug, Clone)]
pub struct ChildSpec {
    pub working_dir: PathBuf,
    pub command: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub probe_host: String,
    pub probe_port: u16,
    pub ping_period: Duration,
    pub connect_timeout: Duration,
    pub response_timeout: Duration,
    pub stop_timeout: Duration,
}

/// Observable lifecycle of the OS process, mirrored via `watch` so the
/// status aggregator can subscribe without going through the event bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessState {
    NotStarted,
    Running { pid: u32 },
    Exited { code: Option<i32> },
}

/// Published on the event bus for every state change.
#[derive(Debug, Clone)]
pub enum ProcessEvent {
    Starting,
    Started { pid: u32 },
    Stopping,
    Stopped { code: Option<i32> },
}

/// One line of the child's stdout/stderr, republished for the `console`
/// command's reply matching.
#[derive(Debug, Clone)]
pub struct ServerOutput {
    pub line: String,
    pub is_stderr: bool,
}

struct ChildHandle {
    child: Child,
    pid: u32,
    stdin: Option<ChildStdin>,
    group_handle: Option<platform::ProcessGroupHandle>,
    stdout_task: JoinHandle<()>,
    stderr_task: JoinHandle<()>,
}

/// Owns at most one live child process at a time.
pub struct ProcessDriver {
    spec: ChildSpec,
    bus: Bus,
    state_tx: watch::Sender<ProcessState>,
    child: Mutex<Option<ChildHandle>>,
}

impl ProcessDriver {
    pub fn new(spec: ChildSpec, bus: Bus) -> Arc<Self> {
        let (state_tx, _) = watch::channel(ProcessState::NotStarted);
        Arc::new(Self {
            spec,
            bus,
            state_tx,
            child: Mutex::new(None),
        })
    }

    pub fn spec(&self) -> &ChildSpec {
        &self.spec
    }

    pub fn watch_state(&self) -> watch::Receiver<ProcessState> {
        self.state_tx.subscribe()
    }

    /// Launch the child. Writes the embedded logging-configuration template
    /// once per start so the JVM's `-Dlog4j.configurationFile` can point at
    /// a stable path alongside the server jar.
    pub async fn start(&self) -> anyhow::Result<()> {
        let mut guard = self.child.lock().await;
        if guard.is_some() {
            return Ok(());
        }

        self.bus.dispatch(ProcessEvent::Starting).await;

        let log4j_path = self.spec.working_dir.join("log4j2.xml");
        tokio::fs::write(&log4j_path, LOG4J2_TEMPLATE)
            .await
            .map_err(|e| anyhow::anyhow!("writing {}: {e}", log4j_path.display()))?;

        let (program, args) = self
            .spec
            .command
            .split_first()
            .ok_or_else(|| anyhow::anyhow!("empty command"))?;

        let mut cmd = Command::new(program);
        cmd.args(args)
            .current_dir(&self.spec.working_dir)
            .envs(&self.spec.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        platform::configure_process_group(&mut cmd);

        let mut child = cmd
            .spawn()
            .map_err(|e| anyhow::anyhow!("spawning {}: {e}", program))?;
        let pid = child
            .id()
            .ok_or_else(|| anyhow::anyhow!("child exited before its pid was observable"))?;
        let group_handle = platform::post_spawn_setup(Some(pid));

        let stdin = child.stdin.take();
        let stdout = child.stdout.take().expect("stdout piped");
        let stderr = child.stderr.take().expect("stderr piped");

        let stdout_task = tokio::spawn(pump_lines(stdout, self.bus.clone(), false));
        let stderr_task = tokio::spawn(pump_lines(stderr, self.bus.clone(), true));

        self.state_tx.send_replace(ProcessState::Running { pid });
        self.bus.dispatch(ProcessEvent::Started { pid }).await;
        info!(pid, "process.started");

        *guard = Some(ChildHandle {
            child,
            pid,
            stdin,
            group_handle,
            stdout_task,
            stderr_task,
        });

        Ok(())
    }

    /// Cooperative-then-forced termination, per `platform::terminate_child`,
    /// escalating to a kill after `spec.stop_timeout`.
    pub async fn stop(&self) {
        let mut guard = self.child.lock().await;
        let Some(mut handle) = guard.take() else {
            return;
        };
        drop(guard);

        self.bus.dispatch(ProcessEvent::Stopping).await;
        info!(pid = handle.pid, "process.stopping");

        platform::terminate_child(
            &mut handle.child,
            Some(handle.pid),
            handle.group_handle.as_ref(),
            self.spec.stop_timeout,
        )
        .await;

        let status = handle.child.wait().await.ok();
        let code = status.and_then(|s| s.code());

        let _ = handle.stdout_task.await;
        let _ = handle.stderr_task.await;

        self.state_tx.send_replace(ProcessState::Exited { code });
        self.bus.dispatch(ProcessEvent::Stopped { code }).await;
        info!(pid = handle.pid, ?code, "process.stopped");
    }

    /// Wait for the child to exit on its own (crash or graceful quit),
    /// without requesting termination. Returns immediately if no child is
    /// running.
    async fn wait_for_exit(&self) -> Option<i32> {
        let mut guard = self.child.lock().await;
        let Some(handle) = guard.as_mut() else {
            return None;
        };
        handle.child.wait().await.ok().and_then(|s| s.code())
    }

    /// Write a line to the child's stdin, for the `console` command.
    pub async fn write_line(&self, line: &str) -> anyhow::Result<()> {
        let mut guard = self.child.lock().await;
        let handle = guard
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("server is not running"))?;
        let stdin = handle
            .stdin
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("server stdin is not available"))?;
        stdin.write_all(line.as_bytes()).await?;
        stdin.write_all(b"\n").await?;
        Ok(())
    }

    fn is_running(&self) -> bool {
        matches!(*self.state_tx.borrow(), ProcessState::Running { .. })
    }
}

async fn pump_lines<R>(reader: R, bus: Bus, is_stderr: bool)
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if is_stderr {
                    warn!(%line, "server.stderr");
                } else {
                    info!(%line, "server.stdout");
                }
                bus.dispatch(ServerOutput {
                    line,
                    is_stderr,
                })
                .await;
            }
            Ok(None) => return,
            Err(e) => {
                warn!(error = %e, "process.pump.read_error");
                return;
            }
        }
    }
}

/// Runs the child for the lifetime of one `start()`/exit cycle, then
/// returns. The child crashing or quitting is not, by itself, a
/// supervisor-restartable failure — the controller observes the resulting
/// `Status` transition and decides whether to call `start()` again.
struct ChildProcessService {
    driver: Arc<ProcessDriver>,
}

#[async_trait]
impl Service for ChildProcessService {
    async fn run(&self, cancel: CancellationToken) -> ExitReason {
        if let Err(e) = self.driver.start().await {
            return ExitReason::Fatal(e);
        }

        tokio::select! {
            _ = self.driver.wait_for_exit() => {}
            _ = cancel.cancelled() => {}
        }
        self.driver.stop().await;
        ExitReason::Normal
    }
}

/// The narrow boundary the controller holds instead of the OS process
/// itself: starting adds the child as a supervised service, stopping
/// removes it and waits for the removal to complete.
#[async_trait]
pub trait ProcessControl: Send + Sync {
    async fn start(&self);
    async fn stop(&self);
    async fn write_line(&self, line: &str) -> anyhow::Result<()>;
}

pub struct SupervisedProcessControl {
    driver: Arc<ProcessDriver>,
    supervisor: Supervisor,
    stop_timeout: Duration,
    token: Mutex<Option<ServiceToken>>,
}

impl SupervisedProcessControl {
    pub fn new(driver: Arc<ProcessDriver>, supervisor: Supervisor, stop_timeout: Duration) -> Self {
        Self {
            driver,
            supervisor,
            stop_timeout,
            token: Mutex::new(None),
        }
    }
}

#[async_trait]
impl ProcessControl for SupervisedProcessControl {
    async fn start(&self) {
        let mut token = self.token.lock().await;
        if token.is_some() || self.driver.is_running() {
            return;
        }
        let service = ChildProcessService {
            driver: self.driver.clone(),
        };
        *token = Some(self.supervisor.add("minecraft-server", service).await);
    }

    async fn stop(&self) {
        let mut token = self.token.lock().await;
        if let Some(t) = token.take() {
            self.supervisor.remove(t, self.stop_timeout).await;
        }
    }

    async fn write_line(&self, line: &str) -> anyhow::Result<()> {
        self.driver.write_line(line).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_spec(command: Vec<String>) -> ChildSpec {
        ChildSpec {
            working_dir: std::env::temp_dir(),
            command,
            env: BTreeMap::new(),
            probe_host: "127.0.0.1".to_string(),
            probe_port: 25565,
            ping_period: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(1),
            response_timeout: Duration::from_secs(1),
            stop_timeout: Duration::from_millis(200),
        }
    }

    #[tokio::test]
    async fn start_and_stop_reports_process_events() {
        let bus = Bus::default();
        let mut events = bus.subscribe::<ProcessEvent>();
        let driver = ProcessDriver::new(
            test_spec(vec!["sh".to_string(), "-c".to_string(), "sleep 5".to_string()]),
            bus,
        );

        driver.start().await.unwrap();
        assert!(matches!(events.recv().await, Some(ProcessEvent::Starting)));
        assert!(matches!(
            events.recv().await,
            Some(ProcessEvent::Started { .. })
        ));

        driver.stop().await;
        assert!(matches!(events.recv().await, Some(ProcessEvent::Stopping)));
        assert!(matches!(
            events.recv().await,
            Some(ProcessEvent::Stopped { .. })
        ));
    }

    #[tokio::test]
    async fn write_line_fails_when_not_running() {
        let bus = Bus::default();
        let driver = ProcessDriver::new(test_spec(vec!["sh".to_string()]), bus);
        assert!(driver.write_line("hello").await.is_err());
    }
}
