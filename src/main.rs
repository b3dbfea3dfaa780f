//! SerialBench - Command line entry point
//!
//! Lists and watches serial ports, and monitors connected devices: received
//! messages, identification and sample rate are printed as they arrive.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use serialbench_rs::{
    backend::{EmulatorHandle, SerialPortTransport, SimulatedTransport, Transport},
    config::AppConfig,
    ConnectionRegistry, DeviceEvent,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(
    name = "serialbench",
    version,
    about = "Serial device test bench: discovery, monitoring and device identification"
)]
struct Cli {
    /// Config file (TOML or JSON); defaults to the platform config directory
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Use in-memory simulated ports instead of real hardware
    #[arg(long, global = true)]
    simulate: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List available serial ports
    List,

    /// Print ports as they appear and disappear
    Watch {
        /// Stop after this many seconds
        #[arg(long, value_name = "SECONDS")]
        duration: Option<u64>,
    },

    /// Connect to one or more ports and print what they send
    Monitor {
        /// Ports to open
        #[arg(required = true)]
        ports: Vec<String>,

        /// Baud rate (defaults to the configured rate)
        #[arg(long, short)]
        baud: Option<u32>,

        /// Line to send after connecting; also the auto-send text
        #[arg(long, value_name = "TEXT")]
        send: Option<String>,

        /// Keep sending `--send` on the configured interval
        #[arg(long, requires = "send")]
        auto_send: bool,

        /// Stop after this many seconds
        #[arg(long, value_name = "SECONDS")]
        duration: Option<u64>,
    },

    /// Write the effective configuration to a file
    InitConfig {
        /// Destination; defaults to the platform config directory
        #[arg(value_name = "PATH")]
        path: Option<PathBuf>,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let app_config = AppConfig::load_or_default(cli.config.as_deref());

    // Initialize logging
    let (file_layer, _log_guard) = match &app_config.logging.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "serialbench.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_writer(writer).with_ansi(false)),
                Some(guard),
            )
        }
        None => (None, None),
    };
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&app_config.logging.filter)),
        )
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .init();

    tracing::info!("Starting SerialBench");

    let (transport, _emulators) = build_transport(cli.simulate)?;

    match cli.command {
        Command::List => list_ports(transport, app_config),
        Command::Watch { duration } => watch_ports(transport, app_config, duration),
        Command::Monitor {
            ports,
            baud,
            send,
            auto_send,
            duration,
        } => monitor(
            transport,
            app_config,
            MonitorOptions {
                ports,
                baud,
                send,
                auto_send,
                duration,
            },
        ),
        Command::InitConfig { path } => {
            let written = match path {
                Some(path) => {
                    app_config.save(&path)?;
                    path
                }
                None => app_config.save_default()?,
            };
            println!("Wrote {}", written.display());
            Ok(())
        }
    }
}

/// Real hardware, or two simulated ports with emulated devices behind them
fn build_transport(simulate: bool) -> anyhow::Result<(Arc<dyn Transport>, Vec<EmulatorHandle>)> {
    if !simulate {
        return Ok((Arc::new(SerialPortTransport::new()), Vec::new()));
    }

    let sim = SimulatedTransport::with_ports(["SIM0", "SIM1"]);
    let mut emulators = Vec::new();
    for (n, port) in ["SIM0", "SIM1"].into_iter().enumerate() {
        let ident = format!("SerialBench;Simulator;SIM-{n};2024-06;SIM{n}-0001;0.1.0");
        emulators.push(
            sim.spawn_device_emulator(port, ident, Duration::from_millis(100))
                .context("Failed to start device emulator")?,
        );
    }
    tracing::info!("Using simulated ports SIM0, SIM1");
    Ok((Arc::new(sim), emulators))
}

fn list_ports(transport: Arc<dyn Transport>, app_config: AppConfig) -> anyhow::Result<()> {
    let registry = ConnectionRegistry::new(transport, app_config);
    registry.refresh_ports().context("Failed to enumerate ports")?;

    let ports = registry.available_ports();
    if ports.is_empty() {
        println!("No serial ports found");
    }
    for port in ports {
        println!("{}", port);
    }
    Ok(())
}

fn watch_ports(
    transport: Arc<dyn Transport>,
    mut app_config: AppConfig,
    duration: Option<u64>,
) -> anyhow::Result<()> {
    app_config.discovery.enabled = true;
    let registry = ConnectionRegistry::new(transport, app_config);
    let events = registry.subscribe();
    registry.start_discovery()?;

    let deadline = duration.map(|s| Instant::now() + Duration::from_secs(s));
    while deadline.map_or(true, |d| Instant::now() < d) {
        match events.recv_timeout(Duration::from_millis(200)) {
            Some(DeviceEvent::PortAdded(port)) => println!("+ {}", port),
            Some(DeviceEvent::PortRemoved(port)) => println!("- {}", port),
            _ => {}
        }
    }

    registry.shutdown();
    Ok(())
}

struct MonitorOptions {
    ports: Vec<String>,
    baud: Option<u32>,
    send: Option<String>,
    auto_send: bool,
    duration: Option<u64>,
}

fn monitor(
    transport: Arc<dyn Transport>,
    app_config: AppConfig,
    options: MonitorOptions,
) -> anyhow::Result<()> {
    let baud = options
        .baud
        .unwrap_or(app_config.connection.default_baud_rate);
    let registry = ConnectionRegistry::new(transport, app_config);
    let events = registry.subscribe();
    registry.start_discovery()?;

    for port in &options.ports {
        if let Err(e) = registry.connect(port, baud) {
            registry.shutdown();
            bail!("{}", e);
        }
        if let Some(text) = &options.send {
            registry.set_outgoing(port, text.clone());
            if options.auto_send {
                if !registry.start_auto_send(port) {
                    tracing::warn!("Auto-send could not start on {}", port);
                }
            } else {
                registry.send_outgoing(port);
            }
        }
    }

    let deadline = options
        .duration
        .map(|s| Instant::now() + Duration::from_secs(s));
    while deadline.map_or(true, |d| Instant::now() < d) {
        let Some(event) = events.recv_timeout(Duration::from_millis(200)) else {
            if registry.connected_ports().is_empty() {
                println!("No ports left open");
                break;
            }
            continue;
        };
        print_event(&event);
    }

    registry.shutdown();
    Ok(())
}

fn print_event(event: &DeviceEvent) {
    match event {
        DeviceEvent::Connected { port, baud_rate } => {
            println!("[{}] connected at {} baud", port, baud_rate)
        }
        DeviceEvent::Disconnected(port) => println!("[{}] disconnected", port),
        DeviceEvent::MessageReceived { port, index, text } => {
            println!("[{}] #{} {}", port, index, text.trim_end())
        }
        DeviceEvent::Identified { port, properties } => {
            println!("[{}] identified: {}", port, properties)
        }
        DeviceEvent::SampleRate {
            port,
            messages_per_second,
        } => println!("[{}] {} msg/s", port, messages_per_second),
        DeviceEvent::TransportFault { port, error } => {
            eprintln!("[{}] transport fault: {}", port, error)
        }
        DeviceEvent::PortAdded(port) => println!("+ {}", port),
        DeviceEvent::PortRemoved(port) => println!("- {}", port),
    }
}
