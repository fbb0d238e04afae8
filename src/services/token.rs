use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Source of the suffix that makes container names unique.
pub trait TokenSource: Send + Sync + Debug {
    fn next_token(&self) -> String;
}

static LAST_TOKEN: AtomicU64 = AtomicU64::new(0);

/// Nanosecond wall-clock tokens, forced strictly increasing across the whole
/// process so repeated builds never collide even within one clock tick.
///
/// Uniqueness is best-effort across processes.
#[derive(Debug, Default, Clone, Copy)]
pub struct ClockTokens;

impl TokenSource for ClockTokens {
    fn next_token(&self) -> String {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0);

        let mut prev = LAST_TOKEN.load(Ordering::Relaxed);
        loop {
            let candidate = now.max(prev + 1);
            match LAST_TOKEN.compare_exchange_weak(
                prev,
                candidate,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return candidate.to_string(),
                Err(actual) => prev = actual,
            }
        }
    }
}
