//! Read and write deadlines

use tokio::time::Instant;

/// Absolute deadlines; `None` means no limit
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Deadlines {
    pub read: Option<Instant>,
    pub write: Option<Instant>,
}

impl Deadlines {
    pub fn read_expired(&self, now: Instant) -> bool {
        expired(self.read, now)
    }

    pub fn write_expired(&self, now: Instant) -> bool {
        expired(self.write, now)
    }
}

fn expired(deadline: Option<Instant>, now: Instant) -> bool {
    deadline.is_some_and(|at| at <= now)
}
