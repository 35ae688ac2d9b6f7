//! Single-slot pending result
//!
//! Platform callbacks (link up, chunk acknowledged, permission result,
//! adapter-enable result) arrive on their own thread. A [`Completion`] holds
//! at most one waiter; the first callback takes it out of the slot and
//! delivers, every later callback finds the slot empty and does nothing.

use std::sync::Mutex;
use tokio::sync::oneshot;

#[derive(Debug)]
pub struct Completion<T> {
    slot: Mutex<Option<oneshot::Sender<T>>>,
}

impl<T> Default for Completion<T> {
    fn default() -> Self {
        Self {
            slot: Mutex::new(None),
        }
    }
}

impl<T> Completion<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a waiter. Returns `None` while another waiter is pending.
    pub fn arm(&self) -> Option<oneshot::Receiver<T>> {
        let mut slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        if slot.as_ref().is_some_and(|tx| !tx.is_closed()) {
            return None;
        }
        let (tx, rx) = oneshot::channel();
        *slot = Some(tx);
        Some(rx)
    }

    /// Deliver `value` to the pending waiter, clearing the slot.
    ///
    /// Returns `false` when nobody was waiting: no waiter armed, already
    /// fulfilled, or the waiter gave up (timeout, superseded operation).
    pub fn fulfill(&self, value: T) -> bool {
        let sender = self
            .slot
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        match sender {
            Some(tx) => tx.send(value).is_ok(),
            None => false,
        }
    }

    /// Drop the pending waiter without a value.
    pub fn cancel(&self) {
        self.slot.lock().unwrap_or_else(|e| e.into_inner()).take();
    }

    pub fn is_pending(&self) -> bool {
        self.slot
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .is_some_and(|tx| !tx.is_closed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fulfills_exactly_once() {
        let completion = Completion::new();
        let rx = completion.arm().unwrap();

        assert!(completion.fulfill(true));
        assert!(!completion.fulfill(false));
        assert_eq!(rx.await, Ok(true));
        assert!(!completion.is_pending());
    }

    #[test]
    fn test_second_waiter_rejected_while_pending() {
        let completion: Completion<u8> = Completion::new();
        let _rx = completion.arm().unwrap();
        assert!(completion.arm().is_none());
    }

    #[test]
    fn test_late_callback_after_waiter_dropped_is_noop() {
        let completion = Completion::new();
        let rx = completion.arm().unwrap();
        drop(rx);

        assert!(!completion.is_pending());
        assert!(!completion.fulfill(1u8));
        // A new operation can arm again.
        assert!(completion.arm().is_some());
    }

    #[tokio::test]
    async fn test_cancel_wakes_waiter_with_error() {
        let completion: Completion<()> = Completion::new();
        let rx = completion.arm().unwrap();
        completion.cancel();
        assert!(rx.await.is_err());
        assert!(!completion.fulfill(()));
    }
}
