//! Per-connection heartbeat: probe on a fixed interval, evict on a bounded
//! pong timeout. Prevents connection leaks from abrupt disconnects — a peer
//! that vanishes without a close handshake is detected within
//! interval + timeout and removed so presence stays accurate.

use axum::extract::ws::{CloseFrame, Message};
use std::time::Instant;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval, timeout};

use crate::config::HeartbeatConfig;
use crate::ws::ConnectionSender;

/// Heartbeat states. ALIVE means the last probe was answered; SUSPECT means
/// a probe is in flight and the pong deadline is armed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatState {
    Alive,
    Suspect,
}

/// The per-connection heartbeat state machine. Pure transitions; the async
/// driver below owns the timers.
#[derive(Debug)]
pub struct Heartbeat {
    state: HeartbeatState,
    last_pong_at: Option<Instant>,
}

impl Heartbeat {
    pub fn new() -> Self {
        Self {
            state: HeartbeatState::Alive,
            last_pong_at: None,
        }
    }

    /// A probe was sent: arm the pong deadline.
    pub fn probe(&mut self) {
        self.state = HeartbeatState::Suspect;
    }

    /// A pong arrived: cancel any armed deadline.
    pub fn pong(&mut self) {
        self.state = HeartbeatState::Alive;
        self.last_pong_at = Some(Instant::now());
    }

    /// The deadline fired. Terminal iff the probe was never answered.
    pub fn is_dead_on_timeout(&self) -> bool {
        self.state == HeartbeatState::Suspect
    }

    pub fn state(&self) -> HeartbeatState {
        self.state
    }

    pub fn last_pong_at(&self) -> Option<Instant> {
        self.last_pong_at
    }
}

impl Default for Heartbeat {
    fn default() -> Self {
        Self::new()
    }
}

/// Drive the heartbeat for one connection.
///
/// Every `interval` send a WebSocket ping through the writer channel and
/// wait up to `timeout` for the reader to report a pong. On a missed
/// deadline, push a close frame and fire `dead_tx` so the connection actor
/// tears the session down. Returns quietly if the writer or reader side is
/// already gone — the actor's cleanup path handles those exits.
pub async fn run_heartbeat(
    cfg: HeartbeatConfig,
    tx: ConnectionSender,
    mut pong_rx: mpsc::UnboundedReceiver<()>,
    dead_tx: oneshot::Sender<()>,
) {
    let mut heartbeat = Heartbeat::new();
    let mut ticker = interval(cfg.interval());
    // Skip the first immediate tick
    ticker.tick().await;

    loop {
        ticker.tick().await;

        // Account for pongs that arrived between ticks (unsolicited or late)
        while pong_rx.try_recv().is_ok() {
            heartbeat.pong();
        }

        heartbeat.probe();
        if tx.send(Message::Ping(vec![1, 2, 3, 4].into())).is_err() {
            // Writer task has died — connection is gone
            return;
        }

        match timeout(cfg.timeout(), pong_rx.recv()).await {
            Ok(Some(())) => {
                heartbeat.pong();
            }
            Ok(None) => {
                // Reader dropped the pong channel — connection is closing
                return;
            }
            Err(_) => {
                if heartbeat.is_dead_on_timeout() {
                    let silent_for = heartbeat
                        .last_pong_at()
                        .map(|t| t.elapsed().as_millis())
                        .unwrap_or(0);
                    tracing::warn!(
                        silent_ms = silent_for,
                        "Pong timeout, declaring connection dead"
                    );
                    let _ = tx.send(Message::Close(Some(CloseFrame {
                        code: 1001,
                        reason: "Heartbeat timeout".into(),
                    })));
                    let _ = dead_tx.send(());
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_alive() {
        let hb = Heartbeat::new();
        assert_eq!(hb.state(), HeartbeatState::Alive);
        assert!(!hb.is_dead_on_timeout());
    }

    #[test]
    fn probe_arms_suspicion_and_pong_clears_it() {
        let mut hb = Heartbeat::new();
        hb.probe();
        assert_eq!(hb.state(), HeartbeatState::Suspect);
        assert!(hb.is_dead_on_timeout());

        hb.pong();
        assert_eq!(hb.state(), HeartbeatState::Alive);
        assert!(!hb.is_dead_on_timeout());
        assert!(hb.last_pong_at().is_some());
    }

    #[test]
    fn pong_while_alive_is_fine() {
        let mut hb = Heartbeat::new();
        hb.pong();
        assert_eq!(hb.state(), HeartbeatState::Alive);
    }

    #[test]
    fn repeated_probe_pong_cycles_never_die() {
        let mut hb = Heartbeat::new();
        for _ in 0..100 {
            hb.probe();
            hb.pong();
        }
        assert!(!hb.is_dead_on_timeout());
    }
}
