//! Wall-clock timing for benchmark endpoints.

use std::time::{Duration, Instant};

/// Monotonic stopwatch started on construction.
#[derive(Debug, Clone, Copy)]
pub struct Stopwatch {
    started: Instant,
}

impl Stopwatch {
    pub fn start_new() -> Self {
        Self {
            started: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Whole milliseconds since start, truncated.
    pub fn elapsed_millis(&self) -> u128 {
        self.elapsed().as_millis()
    }

    /// The plain-text body returned by timed endpoints.
    pub fn execution_time_message(&self) -> String {
        execution_time_message(self.elapsed())
    }
}

pub fn execution_time_message(elapsed: Duration) -> String {
    format!("Execution time: {}ms", elapsed.as_millis())
}
