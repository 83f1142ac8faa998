use std::{sync::Arc, time::Duration};

use dormant_agent::{
    config, freeze, query,
    terminal::{Terminal, TerminalOptions},
};
use tokio::io::{AsyncBufReadExt, BufReader};

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(60);

async fn relay_console(terminal: Terminal) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => return,
            Err(e) => {
                tracing::debug!(error = %e, "console input closed");
                return;
            }
        };
        let command = line.trim();
        if command.is_empty() {
            continue;
        }
        match terminal.execute(command, "user").await {
            Ok(out) => tracing::debug!(%command, output = %out.trim_end(), "console command done"),
            Err(e) if e.is_precondition() => {
                tracing::info!(%command, code = e.code(), "console command not sent: {e}")
            }
            Err(e) => tracing::warn!(%command, code = e.code(), error = %e, "console command failed"),
        }
    }
}

async fn shutdown(terminal: &Terminal) {
    if !terminal.is_active() {
        return;
    }
    // The server lives in its own session and never saw the signal; stop it
    // through the console so the world is saved.
    let stopped = match terminal.execute("stop", "shutdown").await {
        Ok(_) => tokio::time::timeout(SHUTDOWN_TIMEOUT, terminal.wait_exit())
            .await
            .is_ok(),
        Err(e) => {
            tracing::warn!(code = e.code(), error = %e, "could not send stop to game server");
            false
        }
    };

    if !stopped {
        let snapshot = terminal.snapshot();
        tracing::warn!(
            pid = ?terminal.pid(),
            state = %snapshot.state,
            uptime_secs = snapshot.uptime_secs,
            "leaving game server running in its own session"
        );
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cfg = config::AgentConfig::from_env()?;

    let (scheduler, freeze_rx) = freeze::FreezeScheduler::channel();
    let terminal = Terminal::new(
        Arc::new(scheduler),
        TerminalOptions {
            execute_idle: cfg.execute_idle,
        },
    );

    tokio::spawn({
        let terminal = terminal.clone();
        let delay = cfg.freeze_delay;
        async move {
            freeze::debounce(freeze_rx, delay, || {
                let terminal = terminal.clone();
                async move {
                    if !freeze::is_idle(terminal.stats()) {
                        return;
                    }
                    tracing::info!(delay_secs = delay.as_secs(), "no players online, stopping game server");
                    if let Err(e) = terminal.execute("stop", "freeze").await {
                        tracing::warn!(code = e.code(), error = %e, "freeze stop failed");
                    }
                }
            })
            .await;
        }
    });

    tokio::spawn({
        let cfg = cfg.clone();
        let terminal = terminal.clone();
        async move {
            if let Err(e) = query::serve(cfg, terminal).await {
                tracing::error!(error = ?e, "query responder stopped");
            }
        }
    });

    if cfg.start_on_boot {
        if let Err(e) = terminal.start(&cfg.server_dir, &cfg.server_command).await {
            tracing::error!(code = e.code(), error = %e, "failed to start game server");
        }
    }

    tokio::spawn(relay_console(terminal.clone()));

    tracing::info!(
        server_dir = %cfg.server_dir.display(),
        query_port = cfg.query_port,
        "dormant-agent running"
    );

    tokio::signal::ctrl_c().await?;
    tracing::info!("interrupt received, shutting down");
    shutdown(&terminal).await;

    match serde_json::to_string(&terminal.snapshot()) {
        Ok(status) => tracing::info!(%status, "final server status"),
        Err(e) => tracing::debug!(error = %e, "encode final server status"),
    }

    Ok(())
}
