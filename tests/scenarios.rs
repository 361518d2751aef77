//! End-to-end scenarios wiring the status aggregator, controller, and
//! pinger together against a fake process control and a fake ping backend,
//! driven in-process (no JVM, no real network) since the wire protocols
//! both sides talk are out of scope here. The stuck-child forced-kill
//! scenario lives in `tests/forced_kill.rs`, which needs a real OS process
//! to ignore SIGTERM.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use mcvisor::chat::permissions::{PermissionConfig, PermissionMap};
use mcvisor::chat::{Actor, CommandDefinition, CommandEvent, CommandRegistry, PermissionCategory};
use mcvisor::controller::{self, Controller};
use mcvisor::events::Bus;
use mcvisor::pinger::{PingBackend, PingStrategy, Pinger, PingerConfig, ProbeResponse};
use mcvisor::process::{ProcessControl, ProcessEvent};
use mcvisor::status::{self, StatusAggregator};
use mcvisor::supervisor::Service;

struct FakeProcess {
    bus: Bus,
    starts: AtomicU32,
    stops: AtomicU32,
    running: AtomicBool,
}

impl FakeProcess {
    fn new(bus: Bus) -> Self {
        Self {
            bus,
            starts: AtomicU32::new(0),
            stops: AtomicU32::new(0),
            running: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl ProcessControl for FakeProcess {
    async fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        self.starts.fetch_add(1, Ordering::SeqCst);
        self.bus.dispatch(ProcessEvent::Starting).await;
        self.bus.dispatch(ProcessEvent::Started { pid: 1234 }).await;
    }

    async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.bus.dispatch(ProcessEvent::Stopping).await;
        self.bus.dispatch(ProcessEvent::Stopped { code: Some(0) }).await;
    }

    async fn write_line(&self, _line: &str) -> anyhow::Result<()> {
        Ok(())
    }
}

struct FakePingBackend {
    succeed: AtomicBool,
}

#[async_trait]
impl PingBackend for FakePingBackend {
    async fn probe(
        &self,
        _host: &str,
        _port: u16,
        _connect_timeout: Duration,
        _response_timeout: Duration,
        _full_query: bool,
    ) -> anyhow::Result<ProbeResponse> {
        if self.succeed.load(Ordering::SeqCst) {
            Ok(ProbeResponse {
                latency: Duration::from_millis(1),
                max_players: 20,
                online_players: 2,
                player_list: Some(vec!["alice".to_string()]),
            })
        } else {
            Err(anyhow::anyhow!("connection refused"))
        }
    }
}

/// Everything S1, S2, S3, S5 need: bus, status aggregator, fake process,
/// pinger on a short period against a fake backend, and the controller
/// under test. Each service runs on its own spawned task.
struct Harness {
    process: Arc<FakeProcess>,
    backend: Arc<FakePingBackend>,
    status_cmd_tx: mpsc::Sender<CommandEvent>,
    controller_cmd_tx: mpsc::Sender<CommandEvent>,
    cancel: CancellationToken,
    handles: Vec<tokio::task::JoinHandle<()>>,
}

impl Harness {
    async fn spawn(autostart: bool) -> Self {
        let bus = Bus::default();
        let process = Arc::new(FakeProcess::new(bus.clone()));

        let (status_cmd_tx, status_cmd_rx) = mpsc::channel(8);
        let (controller_cmd_tx, controller_cmd_rx) = mpsc::channel(8);
        let (_pinger_cmd_tx, pinger_cmd_rx) = mpsc::channel(8);

        let (status_aggregator, status_rx) = StatusAggregator::new(bus.clone(), status_cmd_rx);

        let backend = Arc::new(FakePingBackend {
            succeed: AtomicBool::new(true),
        });
        let pinger = Pinger::new(
            PingerConfig {
                host: "127.0.0.1".to_string(),
                port: 25565,
                period: Duration::from_millis(20),
                connect_timeout: Duration::from_millis(50),
                response_timeout: Duration::from_millis(50),
            },
            PingStrategy::Status,
            backend.clone(),
            bus.clone(),
            status_rx.clone(),
            pinger_cmd_rx,
        );

        let controller = Controller::new(
            process.clone(),
            status_rx.clone(),
            bus.clone(),
            controller_cmd_rx,
            autostart,
        );

        let cancel = CancellationToken::new();
        let mut handles = Vec::new();
        handles.push(tokio::spawn({
            let cancel = cancel.clone();
            async move {
                status_aggregator.run(cancel).await;
            }
        }));
        handles.push(tokio::spawn({
            let cancel = cancel.clone();
            async move {
                pinger.run(cancel).await;
            }
        }));
        handles.push(tokio::spawn({
            let cancel = cancel.clone();
            async move {
                controller.run(cancel).await;
            }
        }));

        Self {
            process,
            backend,
            status_cmd_tx,
            controller_cmd_tx,
            cancel,
            handles,
        }
    }

    async fn status(&self) -> String {
        let (tx, rx) = oneshot::channel();
        self.status_cmd_tx
            .send(CommandEvent {
                name: status::STATUS_COMMAND.to_string(),
                args: vec![],
                actor: admin_actor(),
                reply: tx,
            })
            .await
            .unwrap();
        rx.await.unwrap()
    }

    async fn send_controller_command(&self, name: &str, actor: Actor) -> String {
        let (tx, rx) = oneshot::channel();
        self.controller_cmd_tx
            .send(CommandEvent {
                name: name.to_string(),
                args: vec![],
                actor,
                reply: tx,
            })
            .await
            .unwrap();
        rx.await.unwrap()
    }

    async fn shutdown_and_join(self) {
        self.cancel.cancel();
        for handle in self.handles {
            let _ = tokio::time::timeout(Duration::from_secs(1), handle).await;
        }
    }
}

fn admin_actor() -> Actor {
    Actor {
        user_id: Some("admin".to_string()),
        role_ids: vec![],
        channel_id: None,
        display_name: "admin".to_string(),
    }
}

async fn wait_for_status(harness: &Harness, expected: &str, timeout: Duration) {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let status = harness.status().await;
        if status.to_lowercase().contains(expected) {
            return;
        }
        if tokio::time::Instant::now() >= deadline {
            panic!("timed out waiting for status to contain {expected:?}, last was {status:?}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn s1_happy_path_reaches_ready() {
    let harness = Harness::spawn(true).await;
    wait_for_status(&harness, "ready", Duration::from_secs(2)).await;
    assert!(harness.process.starts.load(Ordering::SeqCst) >= 1);
    harness.shutdown_and_join().await;
}

#[tokio::test]
async fn s2_unreachable_flap_and_recovery() {
    let harness = Harness::spawn(true).await;
    wait_for_status(&harness, "ready", Duration::from_secs(2)).await;

    harness.backend.succeed.store(false, Ordering::SeqCst);
    wait_for_status(&harness, "unreachable", Duration::from_secs(2)).await;

    harness.backend.succeed.store(true, Ordering::SeqCst);
    wait_for_status(&harness, "ready", Duration::from_secs(2)).await;

    harness.shutdown_and_join().await;
}

#[tokio::test]
async fn s3_restart_while_ready() {
    let harness = Harness::spawn(true).await;
    wait_for_status(&harness, "ready", Duration::from_secs(2)).await;

    let reply = harness
        .send_controller_command(controller::RESTART_COMMAND, admin_actor())
        .await;
    assert_eq!(reply, "target set to restart");

    wait_for_status(&harness, "ready", Duration::from_secs(2)).await;
    assert!(harness.process.starts.load(Ordering::SeqCst) >= 2);
    assert!(harness.process.stops.load(Ordering::SeqCst) >= 1);

    harness.shutdown_and_join().await;
}

#[tokio::test]
async fn s5_shutdown_on_signal_terminates_the_tree() {
    let harness = Harness::spawn(true).await;
    wait_for_status(&harness, "ready", Duration::from_secs(2)).await;

    let reply = harness
        .send_controller_command(controller::SHUTDOWN_COMMAND, admin_actor())
        .await;
    assert_eq!(reply, "shutting down");

    wait_for_status(&harness, "stopped", Duration::from_secs(2)).await;
    assert!(harness.process.stops.load(Ordering::SeqCst) >= 1);

    harness.shutdown_and_join().await;
}

#[tokio::test]
async fn s6_shutdown_is_denied_for_non_admin_actor_at_the_registry() {
    let mut permissions = PermissionMap::new();
    permissions.insert(
        PermissionCategory::Admin,
        vec![PermissionConfig::opaque("admin-only")],
    );
    let mut registry = CommandRegistry::new(permissions);
    let (tx, _rx) = mpsc::channel(1);
    for definition in controller::command_definitions() {
        if definition.name == controller::SHUTDOWN_COMMAND {
            registry.register(definition, tx.clone());
        }
    }

    let non_admin = Actor {
        user_id: Some("regular-user".to_string()),
        role_ids: vec![],
        channel_id: None,
        display_name: "regular-user".to_string(),
    };

    let reply = registry
        .dispatch(controller::SHUTDOWN_COMMAND, vec![], non_admin)
        .await;
    assert_eq!(reply, "permission denied");
}
