//! Scripted snapshot source for tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use junghome_core::protocol::FunctionDescriptor;

use crate::application::ports::{SnapshotError, SnapshotSource};

/// A [`SnapshotSource`] that returns whatever the test last configured.
#[derive(Debug)]
pub struct StaticSnapshotSource {
    next: Mutex<Result<Vec<FunctionDescriptor>, SnapshotError>>,
    delay: Mutex<Duration>,
    fetches: AtomicUsize,
}

impl StaticSnapshotSource {
    pub fn new(functions: Vec<FunctionDescriptor>) -> Self {
        Self {
            next: Mutex::new(Ok(functions)),
            delay: Mutex::new(Duration::ZERO),
            fetches: AtomicUsize::new(0),
        }
    }

    fn next(&self) -> MutexGuard<'_, Result<Vec<FunctionDescriptor>, SnapshotError>> {
        self.next.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Replaces the function list returned by later fetches.
    pub fn set(&self, functions: Vec<FunctionDescriptor>) {
        *self.next() = Ok(functions);
    }

    /// Makes later fetches fail with `err`.
    pub fn fail_with(&self, err: SnapshotError) {
        *self.next() = Err(err);
    }

    /// Holds every later response for `delay`.  The response still carries
    /// the list configured when the fetch started.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap_or_else(|p| p.into_inner()) = delay;
    }

    /// Number of fetches so far.
    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SnapshotSource for StaticSnapshotSource {
    async fn fetch(&self) -> Result<Vec<FunctionDescriptor>, SnapshotError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let response = self.next().clone();
        let delay = *self.delay.lock().unwrap_or_else(|p| p.into_inner());
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_source_returns_latest_configuration() {
        let source = StaticSnapshotSource::new(Vec::new());
        assert_eq!(source.fetch().await, Ok(Vec::new()));

        source.fail_with(SnapshotError::Status(503));

        assert_eq!(source.fetch().await, Err(SnapshotError::Status(503)));
        assert_eq!(source.fetches(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delayed_fetch_answers_with_list_from_request_time() {
        // Arrange
        let source = StaticSnapshotSource::new(Vec::new());
        source.set_delay(Duration::from_secs(2));
        let start = tokio::time::Instant::now();

        // Act
        let result = source.fetch().await;

        // Assert
        assert_eq!(result, Ok(Vec::new()));
        assert!(start.elapsed() >= Duration::from_secs(2));
    }
}
