use std::time::Instant;

/// Monotonic nanosecond clock anchored at creation.
///
/// The protocol engine takes time as an argument rather than reading a
/// clock; the event loop uses this as the source of those arguments, and
/// tests substitute virtual timestamps.
#[derive(Debug, Clone)]
pub struct Clock {
    origin: Instant,
}

impl Clock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }

    pub fn now_ns(&self) -> u64 {
        self.origin.elapsed().as_nanos() as u64
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}
