pub mod facebook;

use async_trait::async_trait;

use crate::error::ChannelError;
use crate::types::OutboundMessage;

pub use facebook::FacebookChannel;

/// Outbound side of a chat channel.
///
/// A failed send is returned to the caller; nothing is retried or queued.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Channel name (e.g., "facebook").
    fn name(&self) -> &str;

    /// Send a message through this channel.
    async fn send(&self, msg: &OutboundMessage) -> Result<(), ChannelError>;
}
