use std::time::Duration;

use async_trait::async_trait;

use crate::error::EnvError;

/// Strictly synchronous request/reply channel.
///
/// `&mut self` keeps a single request in flight; the reply wait is bounded by
/// the channel's receive timeout.
#[async_trait]
pub trait RequestPort: Send {
    async fn request(&mut self, seqno: u64, payload: &str) -> Result<String, EnvError>;

    fn receive_timeout(&self) -> Duration;

    async fn close(&mut self) -> Result<(), EnvError>;
}

/// Topic-filtered broadcast subscription.
#[async_trait]
pub trait BroadcastPort: Send {
    /// Waits at most `max_wait` for one frame; `None` when nothing arrived.
    ///
    /// Frames are returned undecoded. Only transport failures are errors here.
    async fn poll(&mut self, max_wait: Duration) -> Result<Option<Vec<u8>>, EnvError>;

    fn receive_timeout(&self) -> Duration;

    /// Blocks for the full receive timeout before failing with `BroadcastTimeout`.
    async fn recv(&mut self) -> Result<Vec<u8>, EnvError> {
        let window = self.receive_timeout();
        match self.poll(window).await? {
            Some(message) => Ok(message),
            None => Err(EnvError::BroadcastTimeout {
                timeout_ms: window.as_millis() as u64,
            }),
        }
    }

    async fn close(&mut self) -> Result<(), EnvError>;
}
