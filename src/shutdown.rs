use std::sync::Arc;
use tokio::sync::watch;

/// Cooperative cancellation for the post office's background loops. Clones share state:
///  signalling one clone is observed by all of them.
///
/// Loops check the token at well-defined points only, so work that is in progress when the
///  token is signalled runs to completion.
#[derive(Clone, Debug)]
pub struct ShutdownToken {
    sender: Arc<watch::Sender<bool>>,
}

impl Default for ShutdownToken {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownToken {
    pub fn new() -> ShutdownToken {
        let (sender, _) = watch::channel(false);
        ShutdownToken {
            sender: Arc::new(sender),
        }
    }

    pub fn signal(&self) {
        self.sender.send_replace(true);
    }

    pub fn is_signalled(&self) -> bool {
        *self.sender.borrow()
    }

    /// completes when the token is signalled, immediately if that happened already
    pub async fn signalled(&self) {
        let mut receiver = self.sender.subscribe();
        // the sender lives in self, so the channel can not be closed while we wait
        let _ = receiver.wait_for(|&signalled| signalled).await;
    }
}
