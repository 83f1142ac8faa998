use std::{
    path::Path,
    sync::{Arc, Mutex as StdMutex},
    time::{Duration, Instant},
};

use dormant_core::{GameRawMessage, ServerState, StatusSnapshot};
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader},
    process::{Child, ChildStdin, Command},
    sync::{Mutex, watch},
    task::JoinHandle,
};

use crate::channel::CommandChannel;
use crate::error::TerminalError;
use crate::freeze::FreezeHook;
use crate::status::ServerStats;

const TELLRAW_TAG: &str = "[dormant]";

#[derive(Debug, Clone, Copy)]
pub struct TerminalOptions {
    pub execute_idle: Duration,
}

impl Default for TerminalOptions {
    fn default() -> Self {
        Self {
            execute_idle: Duration::from_millis(200),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Run {
    pid: Option<u32>,
    started_at: Instant,
}

struct Inner {
    active: watch::Sender<bool>,
    run: StdMutex<Option<Run>>,
    stdin: Mutex<Option<ChildStdin>>,
    // Serializes launches so two callers can't both observe "inactive".
    launch: Mutex<()>,
    stats: ServerStats,
    freeze: Arc<dyn FreezeHook>,
    output: CommandChannel,
    execute_idle: Duration,
}

#[derive(Clone)]
pub struct Terminal {
    inner: Arc<Inner>,
}

impl Terminal {
    pub fn new(freeze: Arc<dyn FreezeHook>, opts: TerminalOptions) -> Self {
        let (active, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                active,
                run: StdMutex::new(None),
                stdin: Mutex::new(None),
                launch: Mutex::new(()),
                stats: ServerStats::default(),
                freeze,
                output: CommandChannel::default(),
                execute_idle: opts.execute_idle,
            }),
        }
    }

    pub fn stats(&self) -> &ServerStats {
        &self.inner.stats
    }

    pub fn is_active(&self) -> bool {
        *self.inner.active.borrow()
    }

    fn current_run(&self) -> Option<Run> {
        match self.inner.run.lock() {
            Ok(g) => *g,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    // Rounded to the nearest second, 0 when inactive.
    pub fn uptime(&self) -> u64 {
        if !self.is_active() {
            return 0;
        }
        self.current_run()
            .map(|run| (run.started_at.elapsed().as_millis() as u64 + 500) / 1000)
            .unwrap_or(0)
    }

    pub fn pid(&self) -> Option<u32> {
        self.current_run().and_then(|run| run.pid)
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        let stats = self.stats();
        StatusSnapshot {
            state: stats.state(),
            load_progress: stats.load_progress(),
            player_count: stats.player_count(),
            suspended: stats.suspended(),
            active: self.is_active(),
            uptime_secs: self.uptime(),
        }
    }

    pub async fn wait_exit(&self) {
        let mut rx = self.inner.active.subscribe();
        let _ = rx.wait_for(|active| !*active).await;
    }

    pub async fn start(&self, dir: &Path, command_line: &str) -> Result<(), TerminalError> {
        let _launch = self.inner.launch.lock().await;

        if self.is_active() {
            tracing::warn!("server terminal already active");
            return Ok(());
        }

        let mut cmd = build_command(dir, command_line)?;
        let mut child = cmd.spawn().map_err(TerminalError::ProcessStart)?;

        let (stdin, stdout, stderr) =
            match (child.stdin.take(), child.stdout.take(), child.stderr.take()) {
                (Some(i), Some(o), Some(e)) => (i, o, e),
                (i, o, e) => {
                    let missing: Vec<&str> = [
                        ("stdin", i.is_none()),
                        ("stdout", o.is_none()),
                        ("stderr", e.is_none()),
                    ]
                    .into_iter()
                    .filter_map(|(name, missing)| missing.then_some(name))
                    .collect();
                    let _ = child.start_kill();
                    let _ = child.wait().await;
                    return Err(TerminalError::PipeSetup(format!(
                        "missing {}",
                        missing.join(", ")
                    )));
                }
            };

        // Status must read Starting before the scanners see the first line.
        self.inner.stats.reset_for_launch();
        *self.inner.stdin.lock().await = Some(stdin);
        let run = Run {
            pid: child.id(),
            started_at: Instant::now(),
        };
        match self.inner.run.lock() {
            Ok(mut g) => *g = Some(run),
            Err(poisoned) => *poisoned.into_inner() = Some(run),
        }
        self.inner.active.send_replace(true);
        tracing::info!(pid = ?child.id(), dir = %dir.display(), "game server is starting");

        let out_task = tokio::spawn({
            let inner = self.inner.clone();
            async move {
                scan_lines(stdout, |line| inner.on_stdout(line)).await;
            }
        });
        let err_task = tokio::spawn({
            let inner = self.inner.clone();
            async move {
                scan_lines(stderr, |line| inner.on_stderr(line)).await;
            }
        });

        tokio::spawn(supervise(self.inner.clone(), child, out_task, err_task));

        Ok(())
    }

    // Unrelated lines printed meanwhile are included in the output.
    pub async fn execute(&self, command: &str, origin: &str) -> Result<String, TerminalError> {
        self.check_running()?;

        tracing::info!(%command, %origin, "server command");

        // Listen before writing so a fast reply isn't dropped.
        let listener = self.inner.output.listen();
        self.write_stdin(format!("{command}\n").as_bytes()).await?;

        Ok(listener.drain(self.inner.execute_idle).await)
    }

    pub async fn tell_raw(&self, reason: &str, text: &str, origin: &str) -> Result<(), TerminalError> {
        self.check_running()?;

        let message = GameRawMessage {
            text: format!("{TELLRAW_TAG} {reason}: {text}"),
            color: "aqua".to_string(),
            bold: false,
        };
        let line = format!("tellraw @a {}\n", serde_json::to_string(&message)?);

        tracing::info!(command = %line.trim_end(), %origin, "server tellraw");

        self.write_stdin(line.as_bytes()).await
    }

    fn check_running(&self) -> Result<(), TerminalError> {
        if !self.is_active() {
            return Err(TerminalError::NotRunning);
        }
        if self.inner.stats.state() != ServerState::Online {
            return Err(TerminalError::NotOnline);
        }
        if self.inner.stats.suspended() {
            return Err(TerminalError::Suspended);
        }
        Ok(())
    }

    async fn write_stdin(&self, buf: &[u8]) -> Result<(), TerminalError> {
        let mut guard = self.inner.stdin.lock().await;
        let stdin = guard.as_mut().ok_or(TerminalError::NotRunning)?;
        stdin.write_all(buf).await.map_err(TerminalError::PipeWrite)?;
        stdin.flush().await.map_err(TerminalError::PipeWrite)?;
        Ok(())
    }
}

impl Inner {
    fn on_stdout(&self, line: &str) {
        tracing::info!(target: "dormant::server", stream = "stdout", "{line}");
        self.output.publish(line);
        crate::classifier::apply(&self.stats, self.freeze.as_ref(), line);
    }

    fn on_stderr(&self, line: &str) {
        tracing::info!(target: "dormant::server", stream = "stderr", "{line}");
    }
}

fn build_command(dir: &Path, command_line: &str) -> Result<Command, TerminalError> {
    let mut parts = command_line.split_whitespace();
    let program = parts.next().ok_or_else(|| {
        TerminalError::ProcessStart(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "empty server command",
        ))
    })?;

    let mut cmd = Command::new(program);
    cmd.args(parts)
        .current_dir(dir)
        .stdin(std::process::Stdio::piped())
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped());

    // New session: a Ctrl-C aimed at the agent must not reach the server,
    // which has to be stopped through its console to save the world.
    #[cfg(unix)]
    {
        unsafe {
            cmd.pre_exec(|| {
                if libc::setsid() == -1 {
                    return Err(std::io::Error::last_os_error());
                }
                Ok(())
            });
        }
    }

    Ok(cmd)
}

// Invalid UTF-8 is replaced rather than ending the scan.
async fn scan_lines<R, F>(reader: R, mut on_line: F)
where
    R: AsyncRead + Unpin,
    F: FnMut(&str),
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                while matches!(buf.last(), Some(b'\n' | b'\r')) {
                    buf.pop();
                }
                on_line(&String::from_utf8_lossy(&buf));
            }
            Err(e) => {
                tracing::warn!(error = %e, "read server console failed");
                break;
            }
        }
    }
}

async fn supervise(
    inner: Arc<Inner>,
    mut child: Child,
    out_task: JoinHandle<()>,
    err_task: JoinHandle<()>,
) {
    // Scanners first so every buffered line is classified, then reap the
    // process so it doesn't linger as a zombie.
    let (out, err) = tokio::join!(out_task, err_task);
    for res in [out, err] {
        if let Err(e) = res {
            tracing::error!(error = %e, "console scanner task failed");
        }
    }

    match child.wait().await {
        Ok(status) => tracing::info!(code = ?status.code(), "game server process exited"),
        Err(e) => tracing::warn!(error = %e, "wait for game server process failed"),
    }

    if let Some(mut stdin) = inner.stdin.lock().await.take()
        && let Err(e) = stdin.shutdown().await
    {
        tracing::debug!(error = %e, "close server stdin");
    }

    match inner.run.lock() {
        Ok(mut g) => *g = None,
        Err(poisoned) => *poisoned.into_inner() = None,
    }
    inner.stats.mark_offline();
    inner.active.send_replace(false);
    tracing::info!("game server is offline");
}
