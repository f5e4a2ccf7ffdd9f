use chrono::{DateTime, Duration, Utc};

/// Longest accepted window (one year); larger configured values are clamped.
pub const MAX_COOLDOWN_SECS: i64 = 365 * 24 * 60 * 60;

/// Suppresses saying the exact same line twice in a row within a window.
#[derive(Debug, Clone)]
pub struct Cooldown {
    window: Duration,
    pub last_text: Option<String>,
    pub last_at: Option<DateTime<Utc>>,
}

impl Cooldown {
    pub fn new(cooldown_secs: i64) -> Self {
        Self {
            window: Duration::seconds(cooldown_secs.clamp(0, MAX_COOLDOWN_SECS)),
            last_text: None,
            last_at: None,
        }
    }

    /// True when `text` repeats the previous line inside the window at `now`.
    pub fn is_repeat(&self, text: &str, now: DateTime<Utc>) -> bool {
        if self.window <= Duration::zero() {
            return false;
        }
        match (&self.last_text, self.last_at) {
            (Some(last), Some(at)) => last == text && now - at < self.window,
            _ => false,
        }
    }

    pub fn record(&mut self, text: &str, now: DateTime<Utc>) {
        self.last_text = Some(text.to_string());
        self.last_at = Some(now);
    }
}
