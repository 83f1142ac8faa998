use std::time::Duration;

use tokio::sync::broadcast;

const CAPACITY: usize = 256;

// Publishing never blocks: with no listener the line is dropped, and a
// lagging listener skips ahead.
#[derive(Debug, Clone)]
pub struct CommandChannel {
    tx: broadcast::Sender<String>,
}

impl Default for CommandChannel {
    fn default() -> Self {
        let (tx, _) = broadcast::channel(CAPACITY);
        Self { tx }
    }
}

impl CommandChannel {
    pub fn publish(&self, line: &str) {
        if self.tx.receiver_count() == 0 {
            return;
        }
        let _ = self.tx.send(line.to_string());
    }

    pub fn listen(&self) -> Listener {
        Listener {
            rx: self.tx.subscribe(),
        }
    }
}

pub struct Listener {
    rx: broadcast::Receiver<String>,
}

impl Listener {
    pub async fn drain(mut self, idle: Duration) -> String {
        let mut out = String::new();
        loop {
            match tokio::time::timeout(idle, self.rx.recv()).await {
                Ok(Ok(line)) => {
                    out.push_str(&line);
                    out.push('\n');
                }
                Ok(Err(broadcast::error::RecvError::Lagged(skipped))) => {
                    tracing::debug!(skipped, "command output listener lagged");
                }
                Ok(Err(broadcast::error::RecvError::Closed)) | Err(_) => break,
            }
        }
        out
    }
}
