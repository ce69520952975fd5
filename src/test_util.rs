use std::sync::{Arc, Mutex};
use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::mpsc;
use tokio::sync::RwLock;
use tracing::trace;
use crate::message::Message;
use crate::transport::Transport;

/// [Transport] that records sent messages instead of sending them
#[derive(Clone, Debug, Default)]
pub struct TrackingTransport {
    tracker: Arc<RwLock<Vec<Message>>>,
}
impl TrackingTransport {
    pub fn new() -> Self {
        Default::default()
    }

    /// returns sent messages, clearing the internal buffer
    pub async fn sent_messages(&self) -> Vec<Message> {
        let mut lock = self.tracker.write().await;
        std::mem::take(&mut *lock)
    }

    /// number of messages sent since the buffer was last cleared
    pub async fn num_sent(&self) -> usize {
        self.tracker.read().await.len()
    }
}

#[async_trait]
impl Transport for TrackingTransport {
    async fn send(&self, message: &Message) {
        self.tracker.write().await.push(message.clone());
    }
}

/// [Transport] that forwards sent messages to an in-process channel, e.g. to wire two post
///  offices together without a network
#[derive(Clone, Debug)]
pub struct ChannelTransport {
    channel: mpsc::UnboundedSender<Message>,
}
impl ChannelTransport {
    pub fn new(channel: mpsc::UnboundedSender<Message>) -> Self {
        ChannelTransport { channel }
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn send(&self, message: &Message) {
        if self.channel.send(message.clone()).is_err() {
            trace!("receiving side is gone - dropping {:?}", message);
        }
    }
}

/// Decorates a [Transport], dropping each message with a given probability. The random number
///  generator is seeded so that test runs are reproducible.
pub struct LossyTransport {
    inner: Arc<dyn Transport>,
    drop_rate: f64,
    rng: Mutex<StdRng>,
}
impl LossyTransport {
    pub fn new(inner: Arc<dyn Transport>, drop_rate: f64, seed: u64) -> Self {
        LossyTransport {
            inner,
            drop_rate,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    fn should_drop(&self) -> bool {
        let mut rng = self.rng.lock()
            .unwrap_or_else(|e| e.into_inner());
        rng.random::<f64>() < self.drop_rate
    }
}

#[async_trait]
impl Transport for LossyTransport {
    async fn send(&self, message: &Message) {
        if self.should_drop() {
            trace!("simulated loss: {:?}", message);
            return;
        }
        self.inner.send(message).await;
    }
}
