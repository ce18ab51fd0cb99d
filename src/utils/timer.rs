//! Wall-clock timing of batch phases

use std::fmt;
use std::time::{Duration, Instant};

/// Durations of consecutive phases, each measured from the end of the last
#[derive(Debug)]
pub struct PhaseTimer {
    started: Instant,
    phase_started: Instant,
    phases: Vec<(&'static str, Duration)>,
}

impl PhaseTimer {
    pub fn start() -> Self {
        let now = Instant::now();
        Self {
            started: now,
            phase_started: now,
            phases: Vec::new(),
        }
    }

    /// Close the running phase under `name` and return how long it took
    pub fn end_phase(&mut self, name: &'static str) -> Duration {
        let now = Instant::now();
        let took = now - self.phase_started;
        self.phase_started = now;
        self.phases.push((name, took));
        took
    }

    pub fn total(&self) -> Duration {
        self.started.elapsed()
    }
}

/// `build 12ms, shards 3400ms, total 3415ms`
impl fmt::Display for PhaseTimer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, took) in &self.phases {
            write!(f, "{} {}ms, ", name, took.as_millis())?;
        }
        write!(f, "total {}ms", self.total().as_millis())
    }
}
