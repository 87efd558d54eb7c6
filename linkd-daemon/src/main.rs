//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

mod manager;

use clap::{Arg, ArgAction, Command};
use manager::{Config, Manager};
use tokio::signal::unix::{SignalKind, signal};
use tracing::{error, info};
use tracing_subscriber::prelude::*;

fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::builder()
        .with_default_directive("linkd=debug".parse().unwrap())
        .from_env_lossy();
    let stdout = tracing_subscriber::fmt::layer().with_target(false);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout)
        .init();
}

// ===== main =====

fn main() {
    // Parse command-line parameters.
    let matches = Command::new("linkd")
        .about("P4Runtime/gNMI link discovery agent")
        .version(clap::crate_version!())
        .arg(Arg::new("uuid").long("uuid").value_name("uuid").help(
            "Externally assigned UUID of this agent; auto-generated and \
             persisted if omitted",
        ))
        .arg(
            Arg::new("target-address")
                .long("target-address")
                .value_name("host:port")
                .help("Address of the device P4Runtime/gNMI endpoint"),
        )
        .arg(
            Arg::new("bind-port")
                .long("bind-port")
                .value_name("port")
                .value_parser(clap::value_parser!(u16))
                .help("Port of the northbound gNMI service"),
        )
        .arg(
            Arg::new("no-tls")
                .long("no-tls")
                .action(ArgAction::SetTrue)
                .help("Serve the northbound gNMI service without TLS"),
        )
        .arg(
            Arg::new("caPath")
                .long("caPath")
                .value_name("file")
                .help("Path to the CA certificate bundle"),
        )
        .arg(
            Arg::new("keyPath")
                .long("keyPath")
                .value_name("file")
                .help("Path to the northbound TLS key"),
        )
        .arg(
            Arg::new("certPath")
                .long("certPath")
                .value_name("file")
                .help("Path to the northbound TLS certificate"),
        )
        .get_matches();

    // Initialize tracing.
    init_tracing();

    // Set panic handler to abort the process if any child task panics.
    let default_panic = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        default_panic(info);
        std::process::exit(1);
    }));

    let config = Config {
        agent_uuid: matches.get_one::<String>("uuid").cloned(),
        target_address: matches.get_one::<String>("target-address").cloned(),
        bind_port: matches.get_one::<u16>("bind-port").copied(),
        no_tls: matches.get_flag("no-tls"),
        ca_path: matches.get_one::<String>("caPath").cloned(),
        key_path: matches.get_one::<String>("keyPath").cloned(),
        cert_path: matches.get_one::<String>("certPath").cloned(),
        ..Default::default()
    };

    info!("starting up");

    let exit_code = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("failed to create async runtime")
        .block_on(run(config));
    std::process::exit(exit_code);
}

async fn run(config: Config) -> i32 {
    let manager = match Manager::start(config) {
        Ok(manager) => manager,
        Err(error) => {
            error!(%error, "startup failed");
            return 1;
        }
    };

    wait_shutdown().await;
    manager.stop().await;
    0
}

// Blocks until SIGINT or SIGTERM arrives.
async fn wait_shutdown() {
    let mut sigterm = signal(SignalKind::terminate())
        .expect("failed to install SIGTERM handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => (),
        _ = sigterm.recv() => (),
    }
    info!("shutting down");
}
