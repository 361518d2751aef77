//! Composition root: load config, wire the event bus, build the service
//! tree, and run it under a root [`Supervisor`] until a shutdown signal or
//! the controller's clean-shutdown path unwinds it.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use mcvisor::chat::permissions::{PermissionConfig, PermissionMap};
use mcvisor::chat::{CommandDefinition, CommandRegistry, PermissionCategory};
use mcvisor::cli::Cli;
use mcvisor::config::model::{McvisorConfig, PermissionsConfig};
use mcvisor::config::{self, ConfigError};
use mcvisor::controller::Controller;
use mcvisor::events::{Bus, CONTROL_QUEUE_CAPACITY};
use mcvisor::pinger::{PingStrategy, Pinger, PingerConfig, TcpProbeBackend};
use mcvisor::process::{ChildSpec, ProcessControl, ProcessDriver, SupervisedProcessControl};
use mcvisor::properties::Properties;
use mcvisor::status::StatusAggregator;
use mcvisor::supervisor::Supervisor;

/// Grace period for the stop-then-kill escalation when stopping the child.
const STOP_TIMEOUT: Duration = Duration::from_secs(10);
/// How long after the first shutdown signal a second one still forces an
/// immediate `std::process::exit(1)` instead of waiting on the supervisor
/// tree to unwind.
const SHUTDOWN_FORCE_WINDOW: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let config_path = config::resolve::resolve_config_path(cli.config_file.as_deref());

    let loaded = match config::load_config(&config_path) {
        Ok(loaded) => loaded,
        Err(ConfigError::Invalid { path, diagnostics }) => {
            eprintln!("configuration at {} failed validation:", path.display());
            for diagnostic in diagnostics {
                eprintln!("{:?}", miette::Report::new(diagnostic));
            }
            std::process::exit(1);
        }
        Err(err) => {
            eprintln!("failed to load configuration: {err:#}");
            std::process::exit(1);
        }
    };

    let _logging_guard = match mcvisor::logging::init(&loaded.config.logging) {
        Ok(guard) => guard,
        Err(err) => {
            eprintln!("failed to initialize logging: {err:#}");
            std::process::exit(1);
        }
    };

    info!(path = %loaded.path.display(), "config.loaded");

    let exit_code = run(loaded.config).await;
    std::process::exit(exit_code);
}

async fn run(config: McvisorConfig) -> i32 {
    let bus = Bus::default();
    let cancel = CancellationToken::new();
    let supervisor = Supervisor::new(bus.clone(), cancel.clone());

    let permissions = build_permission_map(&config.discord.permissions);
    let mut registry = CommandRegistry::new(permissions);

    // `help`/`perms` are answered by the chat adapter itself (see
    // `chat::ChatAdapter::handle`); they're still registered here purely so
    // they show up in `help`'s and `perms`' own listings.
    let (help_tx, _help_rx) = mpsc::channel(1);
    registry.register(
        CommandDefinition {
            name: mcvisor::chat::HELP_COMMAND,
            description: "list commands allowed for you",
            category: PermissionCategory::Public,
        },
        help_tx,
    );
    let (perms_tx, _perms_rx) = mpsc::channel(1);
    registry.register(
        CommandDefinition {
            name: mcvisor::chat::PERMS_COMMAND,
            description: "show each command's permission rule",
            category: PermissionCategory::Admin,
        },
        perms_tx,
    );

    let (status_cmd_tx, status_cmd_rx) = mpsc::channel(CONTROL_QUEUE_CAPACITY);
    let (pinger_cmd_tx, pinger_cmd_rx) = mpsc::channel(CONTROL_QUEUE_CAPACITY);
    let (controller_cmd_tx, controller_cmd_rx) = mpsc::channel(CONTROL_QUEUE_CAPACITY);

    for definition in mcvisor::status::command_definitions() {
        registry.register(definition, status_cmd_tx.clone());
    }
    for definition in mcvisor::pinger::command_definitions() {
        registry.register(definition, pinger_cmd_tx.clone());
    }
    for definition in mcvisor::controller::command_definitions() {
        registry.register(definition, controller_cmd_tx.clone());
    }
    // No `ChatAdapter` is spawned below (see DESIGN.md) since no real
    // `ChatTransport` binding is implemented; the registry and the command
    // channels it holds are still built so a future binding has something
    // to plug into without touching the services themselves.
    let _registry = Arc::new(registry);

    let spec = build_child_spec(&config);
    let working_dir = spec.working_dir.clone();
    let driver = ProcessDriver::new(spec.clone(), bus.clone());
    let process: Arc<dyn ProcessControl> = Arc::new(SupervisedProcessControl::new(
        driver,
        supervisor.clone(),
        STOP_TIMEOUT,
    ));

    let (status_aggregator, status_rx) = StatusAggregator::new(bus.clone(), status_cmd_rx);
    supervisor.add("status-aggregator", status_aggregator).await;

    let properties = match Properties::load(working_dir.join("server.properties")).await {
        Ok(properties) => properties,
        Err(err) => {
            warn!(error = %err, "server.properties unreadable, using defaults");
            Properties::default()
        }
    };
    let mut probe_host = spec.probe_host.clone();
    let mut probe_port = spec.probe_port;
    let strategy = PingStrategy::resolve(&properties, &mut probe_host, &mut probe_port);
    let pinger = Pinger::new(
        PingerConfig {
            host: probe_host,
            port: probe_port,
            period: spec.ping_period,
            connect_timeout: spec.connect_timeout,
            response_timeout: spec.response_timeout,
        },
        strategy,
        Arc::new(TcpProbeBackend),
        bus.clone(),
        status_rx.clone(),
        pinger_cmd_rx,
    );
    supervisor.add("pinger", pinger).await;

    let controller = Controller::new(
        process,
        status_rx,
        bus.clone(),
        controller_cmd_rx,
        config.minecraft.autostart,
    );
    supervisor.add("controller", controller).await;

    tokio::spawn(watch_for_shutdown(cancel.clone()));

    match supervisor.serve(cancel).await {
        Ok(()) => 0,
        Err(err) => {
            tracing::error!(error = %err, "supervisor.exit.error");
            2
        }
    }
}

/// First Ctrl-C (or SIGTERM, relayed to the same signal by the OS/terminal
/// on Unix) requests a clean shutdown; a second one within
/// [`SHUTDOWN_FORCE_WINDOW`] forces an immediate exit.
async fn watch_for_shutdown(cancel: CancellationToken) {
    if tokio::signal::ctrl_c().await.is_err() {
        return;
    }
    info!("shutdown.signal.received");
    cancel.cancel();

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            warn!("shutdown.signal.second received, forcing exit");
            std::process::exit(1);
        }
        _ = tokio::time::sleep(SHUTDOWN_FORCE_WINDOW) => {}
    }
}

fn build_permission_map(config: &PermissionsConfig) -> PermissionMap {
    let mut map = PermissionMap::new();
    map.insert(
        PermissionCategory::Admin,
        config.admin.iter().cloned().map(PermissionConfig::opaque).collect(),
    );
    map.insert(
        PermissionCategory::Control,
        config.control.iter().cloned().map(PermissionConfig::opaque).collect(),
    );
    map.insert(
        PermissionCategory::Query,
        config.query.iter().cloned().map(PermissionConfig::opaque).collect(),
    );
    map.insert(
        PermissionCategory::Public,
        config.public.iter().cloned().map(PermissionConfig::opaque).collect(),
    );
    map
}

fn build_child_spec(config: &McvisorConfig) -> ChildSpec {
    let server = &config.minecraft.server;
    let java = &config.minecraft.java;

    let mut command = vec![config.java_executable().to_string_lossy().into_owned()];
    command.extend(java.options.iter().cloned());
    command.push("-jar".to_string());
    command.push(server.jar.to_string_lossy().into_owned());
    command.extend(server.options.iter().cloned());

    let mut env = BTreeMap::new();
    if let Some(home) = &java.home {
        env.insert("JAVA_HOME".to_string(), home.to_string_lossy().into_owned());
    }

    ChildSpec {
        working_dir: server.working_dir.clone(),
        command,
        env,
        probe_host: server.network.host.clone(),
        probe_port: server.network.port,
        ping_period: server.network.ping_period,
        connect_timeout: server.network.connection_timeout,
        response_timeout: server.network.response_timeout,
        stop_timeout: STOP_TIMEOUT,
    }
}
