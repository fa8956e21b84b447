use crate::{conn::PendingRegistry, FepError, FepResult, TRACE_MODULUS};
use std::sync::atomic::{AtomicU32, Ordering};

// Monotonic trace-number source for field 11. Values run 1..=999999 and
// wrap; on wrap-around a candidate whose key is still pending is skipped
// rather than reused, so an old in-flight request can never be completed
// by a stranger's response.
#[derive(Debug)]
pub(crate) struct TraceSource {
    counter: AtomicU32,
}

impl TraceSource {
    pub(crate) fn new() -> Self {
        Self {
            counter: AtomicU32::new(0),
        }
    }

    #[cfg(test)]
    pub(crate) fn starting_at(value: u32) -> Self {
        Self {
            counter: AtomicU32::new(value),
        }
    }

    // Next trace key that is not currently pending in `registry`.
    pub(crate) fn next_free(&self, registry: &PendingRegistry) -> FepResult<String> {
        for _ in 0..TRACE_MODULUS {
            let raw = self.counter.fetch_add(1, Ordering::Relaxed);
            let value = raw % (TRACE_MODULUS - 1) + 1; // 1..=999999, zero unused
            let key = format!("{value:06}");
            if !registry.contains(&key) {
                return Ok(key);
            }
            trace!("trace {key} still pending after wrap-around, skipping");
        }
        Err(FepError::Overloaded)
    }
}
