use anyhow::{Context, Result};
use colored::Colorize;
use fleetd::{AgentRegistry, config::structs::Config, helpers, server};
use macros_rs::crashln;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal::unix::{SignalKind, signal};

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

pub fn start(config: Config) {
    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(err) => crashln!("{} Cannot start runtime.\n{}", *helpers::FAIL, err.to_string().white()),
    };

    if let Err(err) = runtime.block_on(run(config)) {
        crashln!("{} Server stopped with an error.\n{}", *helpers::FAIL, format!("{err:#}").white());
    }
}

async fn run(config: Config) -> Result<()> {
    let address = config.fmt_address();
    let listener = TcpListener::bind(&address).await.with_context(|| format!("Cannot listen on {address}"))?;
    let registry = AgentRegistry::new();

    if config.server.address == "0.0.0.0" || config.server.address == "::" {
        println!("{} Accepting agents on every interface", *helpers::WARN);
    }

    log::info!("[Daemon] Listening for agents on {address}");
    println!("{} Listening for agents on {}", *helpers::SUCCESS, address.bold());

    tokio::select! {
        _ = server::serve(listener, registry.clone()) => {}
        result = shutdown_signal() => result?,
    }

    log::info!(
        "[Daemon] Shutting down with {} agent(s) on {} connection(s)",
        registry.agent_count(),
        registry.connection_count()
    );
    if tokio::time::timeout(SHUTDOWN_TIMEOUT, registry.shutdown()).await.is_err() {
        log::warn!("[Daemon] Registry teardown did not finish within {}s", SHUTDOWN_TIMEOUT.as_secs());
    }

    println!("{} Server stopped", *helpers::SUCCESS);
    Ok(())
}

async fn shutdown_signal() -> Result<()> {
    let mut terminate = signal(SignalKind::terminate()).context("Cannot listen for SIGTERM")?;

    tokio::select! {
        interrupt = tokio::signal::ctrl_c() => interrupt.context("Cannot listen for ctrl-c")?,
        _ = terminate.recv() => {}
    }

    Ok(())
}
