use std::io::Write;
use std::time::{Duration, Instant};

/// Repeating terminal bell raised when a batch of captures completes.
///
/// Rings immediately when started, then once per interval until stopped.
#[derive(Debug, Clone)]
pub struct CompletionAlert {
    interval: Duration,
    active: bool,
    last_ring: Option<Instant>,
}

impl CompletionAlert {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            active: false,
            last_ring: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn start(&mut self) {
        self.active = true;
        self.last_ring = None;
    }

    pub fn stop(&mut self) {
        self.active = false;
    }

    pub fn toggle(&mut self) {
        if self.active {
            self.stop();
        } else {
            self.start();
        }
    }

    /// Whether the bell is due at `now`. Records the ring when it is.
    pub fn due(&mut self, now: Instant) -> bool {
        if !self.active {
            return false;
        }
        let due = self
            .last_ring
            .map_or(true, |last| now.duration_since(last) >= self.interval);
        if due {
            self.last_ring = Some(now);
        }
        due
    }

    /// Ring the terminal bell if due.
    pub fn tick(&mut self, now: Instant) {
        if self.due(now) {
            let mut stdout = std::io::stdout();
            let _ = stdout.write_all(b"\x07").and_then(|()| stdout.flush());
        }
    }
}
