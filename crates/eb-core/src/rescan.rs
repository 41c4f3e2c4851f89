//! Debounced rescan scheduling.
//!
//! The in-page script re-applies hide rules after DOM mutations. Bursts of
//! mutations are coalesced: each new mutation replaces the pending timer
//! instead of adding another one, so at most one rescan is ever queued.

/// Default delay between the last observed mutation and the rescan.
pub const DEFAULT_RESCAN_DELAY_MS: u32 = 100;

/// Holds the handle of the single pending rescan timer, if any.
///
/// `H` is whatever the host environment uses to cancel a timer (a
/// `setTimeout` id in the browser).
#[derive(Debug)]
pub struct RescanSlot<H> {
    pending: Option<H>,
}

impl<H> Default for RescanSlot<H> {
    fn default() -> Self {
        Self { pending: None }
    }
}

impl<H> RescanSlot<H> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a freshly scheduled timer.
    ///
    /// Returns the previously pending timer, which the caller must cancel.
    pub fn replace(&mut self, handle: H) -> Option<H> {
        self.pending.replace(handle)
    }

    /// Take the pending timer when it fires or when the page tears down.
    pub fn take(&mut self) -> Option<H> {
        self.pending.take()
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replace_returns_previous_timer() {
        let mut slot = RescanSlot::new();
        assert!(!slot.is_pending());
        assert_eq!(slot.replace(1), None);
        assert_eq!(slot.replace(2), Some(1));
        assert_eq!(slot.replace(3), Some(2));
        assert!(slot.is_pending());
    }

    #[test]
    fn test_burst_leaves_one_pending_timer() {
        let mut slot = RescanSlot::new();
        let mut cancelled = Vec::new();
        for id in 0..10 {
            if let Some(old) = slot.replace(id) {
                cancelled.push(old);
            }
        }
        assert_eq!(cancelled, (0..9).collect::<Vec<_>>());
        assert_eq!(slot.take(), Some(9));
        assert_eq!(slot.take(), None);
        assert!(!slot.is_pending());
    }
}
