use std::sync::{
    Mutex,
    atomic::{AtomicBool, AtomicI32, AtomicU8, Ordering},
};

use dormant_core::ServerState;

#[derive(Debug)]
pub struct ServerStats {
    state: AtomicU8,
    load_progress: Mutex<String>,
    player_count: AtomicI32,
    suspended: AtomicBool,
}

impl Default for ServerStats {
    fn default() -> Self {
        Self {
            state: AtomicU8::new(ServerState::Offline.as_u8()),
            load_progress: Mutex::new("0%".to_string()),
            player_count: AtomicI32::new(0),
            suspended: AtomicBool::new(false),
        }
    }
}

impl ServerStats {
    pub fn state(&self) -> ServerState {
        ServerState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn set_state(&self, state: ServerState) {
        self.state.store(state.as_u8(), Ordering::Release);
    }

    pub fn load_progress(&self) -> String {
        match self.load_progress.lock() {
            Ok(g) => g.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn set_load_progress(&self, progress: impl Into<String>) {
        let progress = progress.into();
        match self.load_progress.lock() {
            Ok(mut g) => *g = progress,
            Err(poisoned) => *poisoned.into_inner() = progress,
        }
    }

    pub fn player_count(&self) -> i32 {
        self.player_count.load(Ordering::Acquire)
    }

    // Not clamped: unmatched leave lines can push it below zero.
    pub fn add_players(&self, delta: i32) -> i32 {
        self.player_count
            .fetch_add(delta, Ordering::AcqRel)
            .wrapping_add(delta)
    }

    pub fn suspended(&self) -> bool {
        self.suspended.load(Ordering::Acquire)
    }

    pub fn set_suspended(&self, suspended: bool) {
        self.suspended.store(suspended, Ordering::Release);
    }

    pub(crate) fn reset_for_launch(&self) {
        self.set_load_progress("0%");
        self.player_count.store(0, Ordering::Release);
        self.set_state(ServerState::Starting);
    }

    pub(crate) fn mark_offline(&self) {
        self.set_state(ServerState::Offline);
        self.set_suspended(false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_offline() {
        let s = ServerStats::default();
        assert_eq!(s.state(), ServerState::Offline);
        assert_eq!(s.load_progress(), "0%");
        assert_eq!(s.player_count(), 0);
        assert!(!s.suspended());
    }

    #[test]
    fn reset_for_launch_clears_metadata() {
        let s = ServerStats::default();
        s.set_load_progress("87%");
        s.add_players(3);
        s.reset_for_launch();
        assert_eq!(s.state(), ServerState::Starting);
        assert_eq!(s.load_progress(), "0%");
        assert_eq!(s.player_count(), 0);
    }

    #[test]
    fn mark_offline_clears_suspension() {
        let s = ServerStats::default();
        s.set_state(ServerState::Online);
        s.set_suspended(true);
        s.mark_offline();
        assert_eq!(s.state(), ServerState::Offline);
        assert!(!s.suspended());
    }

    #[test]
    fn player_count_is_not_clamped() {
        let s = ServerStats::default();
        assert_eq!(s.add_players(-1), -1);
        assert_eq!(s.add_players(1), 0);
    }
}
