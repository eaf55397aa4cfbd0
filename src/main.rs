//! NAS service daemon - config deployment and lifecycle control for file-sharing services.

use std::env;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use tokio::signal;
use tokio::sync::Notify;
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use nas_daemon::config::Settings;
use nas_daemon::services::{ServiceType, SystemdController};
use nas_daemon::socket::SocketListener;

const VERSION: &str = env!("CARGO_PKG_VERSION");
const NAME: &str = env!("CARGO_PKG_NAME");
const DEFAULT_CONFIG_PATH: &str = "/etc/nas-daemon/daemon.toml";
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, PartialEq)]
enum Invocation {
    Help,
    Version,
    Run { config_path: String, check_only: bool },
}

fn parse_args(args: &[String]) -> Result<Invocation, String> {
    let mut config_path = DEFAULT_CONFIG_PATH.to_string();
    let mut check_only = false;
    let mut rest = args.iter().skip(1);

    while let Some(arg) = rest.next() {
        match arg.as_str() {
            "-h" | "--help" => return Ok(Invocation::Help),
            "-V" | "--version" => return Ok(Invocation::Version),
            "--check-config" => check_only = true,
            "-c" | "--config" => {
                config_path = rest
                    .next()
                    .ok_or_else(|| format!("{} requires a path", arg))?
                    .clone();
            }
            other => match other.strip_prefix("--config=") {
                Some(path) => config_path = path.to_string(),
                None => return Err(format!("unrecognized argument '{}'", other)),
            },
        }
    }

    Ok(Invocation::Run {
        config_path,
        check_only,
    })
}

fn main() -> ExitCode {
    let args: Vec<String> = env::args().collect();

    let (config_path, check_only) = match parse_args(&args) {
        Ok(Invocation::Help) => {
            print_help();
            return ExitCode::SUCCESS;
        }
        Ok(Invocation::Version) => {
            println!("{} {}", NAME, VERSION);
            return ExitCode::SUCCESS;
        }
        Ok(Invocation::Run {
            config_path,
            check_only,
        }) => (config_path, check_only),
        Err(message) => {
            eprintln!("{}: {} (see --help)", NAME, message);
            return ExitCode::from(2);
        }
    };

    let settings = match Settings::load(&config_path) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Error loading configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };

    if check_only {
        println!("{}: configuration OK", config_path);
        return ExitCode::SUCCESS;
    }

    init_logging(&settings);
    info!(version = VERSION, config = %config_path, "Starting {}", NAME);
    log_managed_services(&settings);

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(error = %e, "Failed to create Tokio runtime");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(serve(settings)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Daemon failed");
            ExitCode::FAILURE
        }
    }
}

fn log_managed_services(settings: &Settings) {
    for service_type in ServiceType::ALL {
        let service = settings.services.get(service_type);
        info!(
            service = %service_type,
            enabled = service.enabled,
            unit = %service.unit,
            config = %service.config_path.display(),
            "Managed service"
        );
    }
}

async fn serve(settings: Settings) -> Result<(), Box<dyn std::error::Error>> {
    let controller = Arc::new(SystemdController::new(settings.limits.control_timeout()));
    let listener = SocketListener::bind(Arc::new(settings), controller).await?;
    let shutdown = Arc::new(Notify::new());

    tokio::select! {
        result = listener.run(Arc::clone(&shutdown)) => result?,
        _ = shutdown_signal() => {
            info!("Shutdown signal received, draining connections");
            shutdown.notify_waiters();
            listener.wait_for_drain(DRAIN_TIMEOUT).await;
        }
    }

    info!("Daemon stopped");
    Ok(())
}

/// Resolves on SIGTERM or SIGINT. A handler that cannot be installed never fires.
async fn shutdown_signal() {
    let interrupt = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = interrupt => {},
        _ = terminate => {},
    }
}

fn print_help() {
    println!(
        r#"{} {}
Deploys Samba, NFS and vsftpd configs and controls their services via a Unix socket.

USAGE:
    {} [OPTIONS]

OPTIONS:
    -c, --config <PATH>    Path to configuration file
                           [default: {}]
        --check-config     Load and validate the configuration, then exit
    -h, --help             Print help information
    -V, --version          Print version information
"#,
        NAME, VERSION, NAME, DEFAULT_CONFIG_PATH
    );
}

/// `RUST_LOG` overrides the configured level.
fn init_logging(settings: &Settings) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&settings.logging.level));
    let registry = tracing_subscriber::registry().with(filter);

    if settings.logging.format.eq_ignore_ascii_case("json") {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer().pretty()).init();
    }
}
