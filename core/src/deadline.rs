//! Running protected operations, with or without a deadline
//!
//! Without a deadline the operation runs inline on the caller's thread. With
//! one it runs on a dedicated worker thread while the caller waits on a
//! channel; at the deadline the caller cancels the operation's token and
//! returns. An operation that ignores its token keeps running in the
//! background, its eventual result is discarded.

use crossbeam_channel::RecvTimeoutError;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

/// Cooperative cancellation signal handed to cancellable operations
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// True once the call's deadline has passed
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    pub(crate) fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }
}

/// Boxed operation as run by the breaker
pub type OperationFn<T, E> = Box<dyn FnOnce(&CancelToken) -> Result<T, E> + Send>;

/// How an attempt ended
#[derive(Debug)]
pub(crate) enum Attempt<T, E> {
    Finished(Result<T, E>),
    TimedOut,
    Panicked,
    NoWorker(std::io::Error),
}

/// Run `operation`, giving up after `deadline` when one is set
pub(crate) fn run<T, E>(
    circuit: &str,
    operation: OperationFn<T, E>,
    deadline: Option<Duration>,
) -> Attempt<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    let token = CancelToken::new();

    let Some(deadline) = deadline else {
        return match panic::catch_unwind(AssertUnwindSafe(|| operation(&token))) {
            Ok(result) => Attempt::Finished(result),
            Err(_) => Attempt::Panicked,
        };
    };

    let (tx, rx) = crossbeam_channel::bounded(1);
    let worker_token = token.clone();
    let spawned = thread::Builder::new()
        .name(format!("breaker-{circuit}"))
        .spawn(move || {
            let result = panic::catch_unwind(AssertUnwindSafe(|| operation(&worker_token)));
            // The caller may have stopped listening at the deadline
            let _ = tx.send(result);
        });

    if let Err(e) = spawned {
        return Attempt::NoWorker(e);
    }

    match rx.recv_timeout(deadline) {
        Ok(Ok(result)) => Attempt::Finished(result),
        Ok(Err(_)) | Err(RecvTimeoutError::Disconnected) => Attempt::Panicked,
        Err(RecvTimeoutError::Timeout) => {
            token.cancel();
            Attempt::TimedOut
        }
    }
}
