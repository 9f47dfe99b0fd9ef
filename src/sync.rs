use core::{future::poll_fn, task::Poll};

use atomic_waker::AtomicWaker;
use portable_atomic::{AtomicBool, Ordering};

/// A single slot saturating signal between the interrupt handler and the
/// receive task.
///
/// Multiple edges raised before the task runs collapse into one wake-up,
/// which is why the drain loop re-checks for remaining data instead of
/// assuming one frame per wake.
pub struct RxSignal {
    waker: AtomicWaker,
    pending: AtomicBool,
}
impl RxSignal {
    pub const fn new() -> Self {
        Self {
            waker: AtomicWaker::new(),
            pending: AtomicBool::new(false),
        }
    }
    /// Raise the signal. Safe to call from interrupt context.
    pub fn put(&self) {
        self.pending.store(true, Ordering::Release);
        self.waker.wake();
    }
    /// Drop any pending signal.
    pub fn reset(&self) {
        self.pending.store(false, Ordering::Relaxed);
    }
    /// Asynchronously wait for the signal, consuming it.
    pub async fn wait(&self) {
        poll_fn(|cx| {
            if self.pending.swap(false, Ordering::Acquire) {
                return Poll::Ready(());
            }
            self.waker.register(cx.waker());
            // An edge may have fired between the check and the registration.
            if self.pending.swap(false, Ordering::Acquire) {
                Poll::Ready(())
            } else {
                Poll::Pending
            }
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embassy_futures::block_on;
    use embassy_time::{with_timeout, Duration};

    #[test]
    fn put_before_wait_completes_immediately() {
        let signal = RxSignal::new();
        signal.put();
        block_on(signal.wait());
    }

    #[test]
    fn multiple_puts_collapse_into_one_wake() {
        let signal = RxSignal::new();
        signal.put();
        signal.put();
        signal.put();
        block_on(signal.wait());
        let second = block_on(with_timeout(Duration::from_millis(10), signal.wait()));
        assert!(second.is_err());
    }

    #[test]
    fn reset_drops_a_pending_signal() {
        let signal = RxSignal::new();
        signal.put();
        signal.reset();
        let res = block_on(with_timeout(Duration::from_millis(10), signal.wait()));
        assert!(res.is_err());
    }
}
