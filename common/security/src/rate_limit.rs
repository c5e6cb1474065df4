use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Outcome of `RateLimiter::check`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allowed,
    Blocked { retry_after: Duration },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IpState {
    Fresh,
    Counted,
    Blocked,
}

struct Entry {
    state: IpState,
    window_start: Instant,
    count: u32,
    blocked_until: Option<Instant>,
    /// Duration of the most recent block, so a re-offense inside the
    /// observation window doubles it instead of resetting to the base.
    last_block: Duration,
    /// When the most recent block ended, to detect a re-offense inside its
    /// last block window.
    last_block_ended: Option<Instant>,
}

impl Entry {
    fn fresh(now: Instant, base_block: Duration) -> Self {
        Self {
            state: IpState::Fresh,
            window_start: now,
            count: 0,
            blocked_until: None,
            last_block: base_block,
            last_block_ended: None,
        }
    }
}

/// Sliding-window rate limiter with escalating blocks, one entry per IP;
/// each entry cycles `Fresh -> Counted -> Blocked -> Fresh`.
pub struct RateLimiter {
    window: Duration,
    capacity: u32,
    base_block: Duration,
    block_ceiling: Duration,
    entries: Mutex<HashMap<IpAddr, Entry>>,
}

impl RateLimiter {
    pub fn new(window: Duration, capacity: u32, base_block: Duration, block_ceiling: Duration) -> Self {
        Self {
            window,
            capacity,
            base_block,
            block_ceiling,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// `Blocked` rejects before counting; otherwise the request is counted
    /// against the current window and `Allowed` unless that pushes the
    /// count past capacity, which starts (or escalates) a block.
    pub fn check(&self, ip: IpAddr) -> RateDecision {
        let now = Instant::now();
        let mut guard = self.entries.lock().expect("rate limiter mutex poisoned");
        let entry = guard
            .entry(ip)
            .or_insert_with(|| Entry::fresh(now, self.base_block));

        if let Some(until) = entry.blocked_until {
            if now < until {
                return RateDecision::Blocked {
                    retry_after: until - now,
                };
            }
            entry.state = IpState::Fresh;
            entry.blocked_until = None;
            entry.count = 0;
            entry.window_start = now;
        }

        if now.duration_since(entry.window_start) >= self.window {
            entry.window_start = now;
            entry.count = 0;
            entry.state = IpState::Fresh;
        }

        entry.count += 1;
        if entry.count > self.capacity {
            let re_offense = entry
                .last_block_ended
                .map(|ended| now.saturating_duration_since(ended) <= self.window)
                .unwrap_or(false);
            entry.last_block = if re_offense {
                (entry.last_block * 2).min(self.block_ceiling)
            } else {
                self.base_block
            };
            entry.blocked_until = Some(now + entry.last_block);
            entry.last_block_ended = Some(now + entry.last_block);
            entry.state = IpState::Blocked;
            return RateDecision::Blocked {
                retry_after: entry.last_block,
            };
        }

        entry.state = IpState::Counted;
        RateDecision::Allowed
    }

    /// Drop entries whose window has expired and that are not (or no
    /// longer) blocked, so memory does not grow with every IP ever seen.
    pub fn sweep(&self) {
        let now = Instant::now();
        let mut guard = self.entries.lock().expect("rate limiter mutex poisoned");
        guard.retain(|_, entry| {
            let blocked = entry.blocked_until.map(|until| now < until).unwrap_or(false);
            blocked || now.duration_since(entry.window_start) < self.window
        });
    }

    /// Number of IPs currently tracked, for sweep logging and metrics.
    pub fn entry_count(&self) -> usize {
        self.entries.lock().expect("rate limiter mutex poisoned").len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(n: u8) -> IpAddr {
        IpAddr::V4(std::net::Ipv4Addr::new(10, 0, 0, n))
    }

    #[test]
    fn allows_up_to_capacity() {
        let limiter = RateLimiter::new(Duration::from_secs(60), 3, Duration::from_secs(10), Duration::from_secs(600));
        for _ in 0..3 {
            assert_eq!(limiter.check(ip(1)), RateDecision::Allowed);
        }
        assert!(matches!(limiter.check(ip(1)), RateDecision::Blocked { .. }));
    }

    #[test]
    fn blocked_rejects_before_counting() {
        let limiter = RateLimiter::new(Duration::from_secs(60), 1, Duration::from_secs(300), Duration::from_secs(600));
        assert_eq!(limiter.check(ip(2)), RateDecision::Allowed);
        let first_block = limiter.check(ip(2));
        assert!(matches!(first_block, RateDecision::Blocked { .. }));
        let second = limiter.check(ip(2));
        assert!(matches!(second, RateDecision::Blocked { .. }));
    }

    #[test]
    fn sweep_drops_expired_unblocked_entries() {
        let limiter = RateLimiter::new(Duration::from_millis(1), 10, Duration::from_secs(10), Duration::from_secs(600));
        limiter.check(ip(3));
        std::thread::sleep(Duration::from_millis(5));
        limiter.sweep();
        assert_eq!(limiter.entry_count(), 0);
    }

    #[test]
    fn different_ips_are_independent() {
        let limiter = RateLimiter::new(Duration::from_secs(60), 1, Duration::from_secs(10), Duration::from_secs(600));
        assert_eq!(limiter.check(ip(4)), RateDecision::Allowed);
        assert_eq!(limiter.check(ip(5)), RateDecision::Allowed);
    }
}
