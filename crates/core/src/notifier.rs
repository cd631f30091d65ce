//! Launch Notifier
//!
//! The service gives no readiness signal, so "probably ready" is a fixed delay
//! after each (re)start. The notifier is polled from the main loop; arming it
//! again replaces any pending notification.

use std::time::{Duration, Instant};

#[derive(Debug)]
pub struct LaunchNotifier {
    delay: Duration,
    pending: Option<(Instant, String)>,
}

impl LaunchNotifier {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            pending: None,
        }
    }

    /// Schedule `url` to be reported `delay` after `now`
    pub fn arm(&mut self, url: impl Into<String>, now: Instant) {
        self.pending = Some((now + self.delay, url.into()));
    }

    pub fn cancel(&mut self) {
        self.pending = None;
    }

    pub fn is_armed(&self) -> bool {
        self.pending.is_some()
    }

    /// The URL once its deadline has passed; fires at most once per arm
    pub fn take_due(&mut self, now: Instant) -> Option<String> {
        match &self.pending {
            Some((deadline, _)) if now >= *deadline => self.pending.take().map(|(_, url)| url),
            _ => None,
        }
    }
}
