//! Logical clock used to name nodes created by a document replica.

use std::fmt;

use rand::Rng;

/// Minimum valid session id. Lower ids are reserved.
pub const MIN_SESSION_ID: u64 = 65_536;

/// Returns `true` when the provided session id is valid.
pub fn is_valid_session_id(sid: u64) -> bool {
    sid >= MIN_SESSION_ID
}

/// Generates a random session id that satisfies [`is_valid_session_id`].
pub fn generate_session_id() -> u64 {
    let mut rng = rand::thread_rng();
    rng.gen_range(MIN_SESSION_ID..=i64::MAX as u64)
}

/// A logical timestamp: `(session_id, logical_time)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Ts {
    pub sid: u64,
    pub time: u64,
}

impl Ts {
    pub const fn new(sid: u64, time: u64) -> Self {
        Self { sid, time }
    }
}

impl fmt::Display for Ts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.sid, self.time)
    }
}

/// Per-replica clock. Every created node consumes one tick.
#[derive(Debug, Clone)]
pub struct LogicalClock {
    pub sid: u64,
    pub time: u64,
}

impl LogicalClock {
    pub fn new(sid: u64) -> Self {
        Self { sid, time: 0 }
    }

    pub fn tick(&mut self) -> Ts {
        self.time += 1;
        Ts::new(self.sid, self.time)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_session_ids_are_valid() {
        for _ in 0..16 {
            assert!(is_valid_session_id(generate_session_id()));
        }
    }

    #[test]
    fn tick_is_monotonic() {
        let mut clock = LogicalClock::new(MIN_SESSION_ID);
        let a = clock.tick();
        let b = clock.tick();
        assert_eq!(a.sid, b.sid);
        assert!(b > a);
    }
}
