//! Keep-alive accounting.
//!
//! A ping goes out on every tick while the session is ready. Any pong
//! clears the counter; too many consecutive unanswered pings mark the
//! socket as stuck.

/// What to do on a keep-alive tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    /// Send another ping.
    Ping,
    /// The connection stopped answering; force a reconnect.
    Stale,
}

#[derive(Debug, Clone)]
pub struct KeepAlive {
    unanswered: u32,
    max_missed: u32,
}

impl KeepAlive {
    pub fn new(max_missed: u32) -> Self {
        Self {
            unanswered: 0,
            max_missed: max_missed.max(1),
        }
    }

    pub fn on_tick(&mut self) -> Tick {
        if self.unanswered >= self.max_missed {
            return Tick::Stale;
        }
        self.unanswered += 1;
        Tick::Ping
    }

    pub fn on_pong(&mut self) {
        self.unanswered = 0;
    }

    /// Forget outstanding pings (new connection).
    pub fn reset(&mut self) {
        self.unanswered = 0;
    }

    pub fn unanswered(&self) -> u32 {
        self.unanswered
    }
}
