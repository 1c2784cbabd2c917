use std::collections::{HashMap, VecDeque};
use std::net::IpAddr;
use std::time::{Duration, Instant};

/// Length of the sliding login window.
pub const LOGIN_WINDOW: Duration = Duration::from_secs(60);
/// Logins accepted from one address per window.
pub const MAX_LOGINS: usize = 20;

/// Sliding-window login limiter for one master, keyed by source address.
///
/// Each attempt's time is kept, so a burst straddling a window boundary is
/// still counted in full.
#[derive(Debug, Default)]
pub struct LoginLimiter {
    attempts: HashMap<IpAddr, VecDeque<Instant>>,
}

fn expire(times: &mut VecDeque<Instant>, now: Instant) {
    while times
        .front()
        .is_some_and(|t| now.saturating_duration_since(*t) >= LOGIN_WINDOW)
    {
        times.pop_front();
    }
}

impl LoginLimiter {
    /// Records a login attempt from `ip`. Returns the drop reason when the
    /// address is over its limit; refused attempts are not recorded.
    pub fn check_and_record(&mut self, ip: IpAddr, now: Instant) -> Option<&'static str> {
        let times = self.attempts.entry(ip).or_default();
        expire(times, now);
        if times.len() >= MAX_LOGINS {
            return Some("login_rate");
        }
        times.push_back(now);
        None
    }

    /// Forgets addresses with no attempts left in the window.
    pub fn prune(&mut self, now: Instant) {
        self.attempts.retain(|_, times| {
            expire(times, now);
            !times.is_empty()
        });
    }

    /// Number of addresses currently tracked.
    #[must_use]
    pub fn tracked(&self) -> usize {
        self.attempts.len()
    }
}
