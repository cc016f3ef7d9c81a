//! Timeout enforcement.
//!
//! # Responsibilities
//! - Race an operation against a deadline on independent tasks
//! - Report exactly one outcome: finished or elapsed
//! - Cancel the losing side cleanly
//!
//! # Design Decisions
//! - The operation and the timer each run on their own task
//! - Both hold a claim on a single one-shot sender; the first to take it
//!   reports, the other finds the slot empty
//! - Timeout errors are distinct from the operation's own errors

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::oneshot;

/// The deadline won the race, or the race was torn down underneath us.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DeadlineError {
    #[error("deadline of {0:?} elapsed")]
    Elapsed(Duration),
    #[error("operation abandoned before reporting")]
    Abandoned,
}

enum Outcome<T> {
    Finished(T),
    Elapsed,
}

type Slot<T> = Arc<Mutex<Option<oneshot::Sender<Outcome<T>>>>>;

fn claim<T>(slot: &Slot<T>) -> Option<oneshot::Sender<Outcome<T>>> {
    slot.lock().ok().and_then(|mut guard| guard.take())
}

/// Run `operation` on its own task and report whichever of
/// {operation output, deadline} arrives first.
///
/// The loser is aborted. When the operation loses, its future is dropped
/// together with everything it owns.
pub async fn race_deadline<F>(operation: F, deadline: Duration) -> Result<F::Output, DeadlineError>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    let (tx, rx) = oneshot::channel();
    let slot: Slot<F::Output> = Arc::new(Mutex::new(Some(tx)));

    let op_slot = Arc::clone(&slot);
    let op = tokio::spawn(async move {
        let output = operation.await;
        if let Some(tx) = claim(&op_slot) {
            let _ = tx.send(Outcome::Finished(output));
        }
    });

    let timer = tokio::spawn(async move {
        tokio::time::sleep(deadline).await;
        if let Some(tx) = claim(&slot) {
            let _ = tx.send(Outcome::Elapsed);
        }
    });

    let outcome = rx.await;
    op.abort();
    timer.abort();

    match outcome {
        Ok(Outcome::Finished(output)) => Ok(output),
        Ok(Outcome::Elapsed) => Err(DeadlineError::Elapsed(deadline)),
        Err(_) => Err(DeadlineError::Abandoned),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[tokio::test]
    async fn operation_wins() {
        let result = race_deadline(async { 7 }, Duration::from_secs(5)).await;
        assert_eq!(result, Ok(7));
    }

    #[tokio::test]
    async fn operation_error_is_passed_through() {
        let result: Result<Result<(), &str>, _> =
            race_deadline(async { Err("handshake failed") }, Duration::from_secs(5)).await;
        assert_eq!(result, Ok(Err("handshake failed")));
    }

    #[tokio::test]
    async fn deadline_wins_and_loser_is_dropped() {
        struct SetOnDrop(Arc<AtomicBool>);
        impl Drop for SetOnDrop {
            fn drop(&mut self) {
                self.0.store(true, Ordering::SeqCst);
            }
        }

        let dropped = Arc::new(AtomicBool::new(false));
        let guard = SetOnDrop(Arc::clone(&dropped));
        let slow = async move {
            let _guard = guard;
            tokio::time::sleep(Duration::from_secs(30)).await;
        };

        let result = race_deadline(slow, Duration::from_millis(50)).await;
        assert_eq!(result, Err(DeadlineError::Elapsed(Duration::from_millis(50))));

        // Abort is delivered on the loser's next poll.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(dropped.load(Ordering::SeqCst));
    }
}
