use std::{future::Future, time::Duration};

use dormant_core::ServerState;
use tokio::sync::mpsc;

use crate::status::ServerStats;

// Called from the stdout scanner; implementations must not block.
pub trait FreezeHook: Send + Sync {
    fn schedule(&self);
}

#[derive(Debug, Clone)]
pub struct FreezeScheduler {
    tx: mpsc::UnboundedSender<()>,
}

impl FreezeScheduler {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl FreezeHook for FreezeScheduler {
    fn schedule(&self) {
        // Policy task gone means the agent is shutting down.
        let _ = self.tx.send(());
    }
}

pub async fn debounce<F, Fut>(mut rx: mpsc::UnboundedReceiver<()>, delay: Duration, mut fire: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    while rx.recv().await.is_some() {
        loop {
            match tokio::time::timeout(delay, rx.recv()).await {
                Ok(Some(())) => continue,
                Ok(None) => return,
                Err(_) => break,
            }
        }
        fire().await;
    }
}

pub fn is_idle(stats: &ServerStats) -> bool {
    stats.state() == ServerState::Online && !stats.suspended() && stats.player_count() <= 0
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    use super::*;

    #[tokio::test]
    async fn debounce_collapses_bursts() {
        let (sched, rx) = FreezeScheduler::channel();
        let fired = Arc::new(AtomicUsize::new(0));

        let task = tokio::spawn({
            let fired = fired.clone();
            async move {
                debounce(rx, Duration::from_millis(50), || {
                    let fired = fired.clone();
                    async move {
                        fired.fetch_add(1, Ordering::SeqCst);
                    }
                })
                .await;
            }
        });

        for _ in 0..5 {
            sched.schedule();
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        drop(sched);
        task.await.unwrap();
    }

    #[test]
    fn idle_requires_online_empty_and_awake() {
        let stats = ServerStats::default();
        assert!(!is_idle(&stats));

        stats.set_state(ServerState::Online);
        assert!(is_idle(&stats));

        stats.add_players(1);
        assert!(!is_idle(&stats));

        stats.add_players(-2);
        assert!(is_idle(&stats));

        stats.set_suspended(true);
        assert!(!is_idle(&stats));
    }
}
