//! Run blocking calls on a private pool and stop waiting after a deadline.
//!
//! The call itself is not cancelled: a timed-out call keeps running on the
//! pool and its result is dropped.

use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeadlineError {
    #[error("no answer within {0:?}")]
    TimedOut(Duration),

    #[error("the call panicked before answering")]
    Abandoned,
}

/// Build a named private rayon pool.
pub fn private_pool(
    threads: usize,
    name: &'static str,
) -> Result<rayon::ThreadPool, rayon::ThreadPoolBuildError> {
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads.max(1))
        .thread_name(move |i| format!("{name}-{i}"))
        .panic_handler(move |_| tracing::error!(pool = name, "pooled call panicked"))
        .build()
}

pub fn call_with_timeout<T, F>(
    pool: &rayon::ThreadPool,
    timeout: Duration,
    f: F,
) -> Result<T, DeadlineError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    pool.spawn(move || {
        let _ = tx.send(f());
    });
    match rx.recv_timeout(timeout) {
        Ok(value) => Ok(value),
        Err(RecvTimeoutError::Timeout) => Err(DeadlineError::TimedOut(timeout)),
        Err(RecvTimeoutError::Disconnected) => Err(DeadlineError::Abandoned),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fast_call_returns_value() {
        let pool = private_pool(1, "test").unwrap();
        let got = call_with_timeout(&pool, Duration::from_secs(1), || 7);
        assert_eq!(got, Ok(7));
    }

    #[test]
    fn slow_call_times_out() {
        let pool = private_pool(1, "test").unwrap();
        let got = call_with_timeout(&pool, Duration::from_millis(10), || {
            std::thread::sleep(Duration::from_millis(200));
            7
        });
        assert_eq!(got, Err(DeadlineError::TimedOut(Duration::from_millis(10))));
    }

    #[test]
    fn panicking_call_is_abandoned() {
        let pool = private_pool(1, "test").unwrap();
        let got: Result<i32, _> =
            call_with_timeout(&pool, Duration::from_secs(1), || panic!("boom"));
        assert_eq!(got, Err(DeadlineError::Abandoned));
    }
}
