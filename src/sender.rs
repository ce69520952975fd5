//! The send side of the post office: a sliding-window ARQ engine on top of an unreliable
//!  [Transport].
//!
//! Every endpoint (see [EndpointKey]) has its own FIFO of pending messages, its own sequence
//!  number counter and its own window of in-flight messages. A message gets its sequence number
//!  when it leaves the pending queue, i.e. when it is actually transmitted for the first time,
//!  and it stays in the window until it and all messages before it are acknowledged. Messages
//!  in the window that are not acknowledged are retransmitted periodically.
//!
//! All endpoints share a single lock. Every operation holds it for its whole duration,
//!  including the transport sends it does, so operations never observe an endpoint's queue or
//!  window half-way through a change.

mod endpoint_state;

pub use endpoint_state::AckState;

use std::sync::Arc;

use rustc_hash::FxHashMap;
use tokio::select;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

use crate::config::SenderConfig;
use crate::endpoint_key::EndpointKey;
use crate::message::{Message, SequenceNumber};
use crate::sender::endpoint_state::EndpointState;
use crate::shutdown::ShutdownToken;
use crate::transport::Transport;

#[derive(Default)]
struct SenderInner {
    endpoints: FxHashMap<EndpointKey, EndpointState>,
}

/// Handle to the send engine. Clones are cheap and share all state, which is how the background
///  loops get hold of the engine.
#[derive(Clone)]
pub struct PostOfficeSender {
    config: Arc<SenderConfig>,
    inner: Arc<Mutex<SenderInner>>,
    transport: Arc<dyn Transport>,
    /// signalled whenever a dispatch pass may be able to move a message into a window
    work_available: Arc<Notify>,
    shutdown: ShutdownToken,
}

impl PostOfficeSender {
    pub fn new(config: Arc<SenderConfig>, transport: Arc<dyn Transport>) -> anyhow::Result<PostOfficeSender> {
        config.validate()?;

        Ok(PostOfficeSender {
            config,
            inner: Default::default(),
            transport,
            work_available: Default::default(),
            shutdown: ShutdownToken::new(),
        })
    }

    pub fn config(&self) -> &SenderConfig {
        self.config.as_ref()
    }

    /// The token that stops this sender's background loops. Hosts can pass it on to other
    ///  loops (e.g. a transport's receive loop) to shut everything down together.
    pub fn shutdown_token(&self) -> ShutdownToken {
        self.shutdown.clone()
    }

    /// Registers a message for sending on its endpoint. The message is transmitted by a later
    ///  dispatch pass once the endpoint's window has room.
    ///
    /// Messages for an endpoint that was stopped are discarded silently. Messages with a payload
    ///  exceeding [SenderConfig::max_payload_len] are discarded with a warning: they could never
    ///  be delivered, and their window slot would never be released.
    pub async fn send(&self, message: Message) {
        let key = message.key();

        if message.payload.len() > self.config.max_payload_len {
            warn!("payload of {} bytes exceeds the maximum of {} - discarding {:?}", message.payload.len(), self.config.max_payload_len, message);
            return;
        }

        let mut inner = self.inner.lock().await;
        let state = inner.endpoints
            .entry(key)
            .or_insert_with(|| {
                debug!("initializing send state for endpoint {}", key);
                EndpointState::new()
            });

        if state.is_stopped() {
            debug!("endpoint {} is stopped - discarding {:?}", key, message);
            return;
        }

        trace!("enqueueing {:?}", message);
        state.enqueue(message);
        drop(inner);

        self.work_available.notify_one();
    }

    /// Transmits pending messages for all endpoints until either their pending queue is empty
    ///  or their window is full.
    ///
    /// This is what the dispatch loop does on every iteration. It is public so that hosts
    ///  without a dispatch loop (and tests) can drive the sender explicitly.
    pub async fn dispatch_pass(&self) {
        let mut inner = self.inner.lock().await;
        let window_capacity = self.config.window_capacity;

        for (key, state) in inner.endpoints.iter_mut() {
            while let Some(message) = state.admit_next(window_capacity) {
                trace!("sending {:?} on {}", message, key);
                self.transport.send(message).await;
            }
        }
    }

    /// Retransmits every message that is in a window and not acknowledged. This changes
    ///  neither sequence numbers nor windows, so calling it repeatedly is harmless.
    ///
    /// This is intended to be called periodically, either by a host's timer or by
    ///  [PostOfficeSender::spawn_resend_loop].
    pub async fn resend_all_unacked(&self) {
        let inner = self.inner.lock().await;

        let mut num_resent = 0usize;
        for (key, state) in inner.endpoints.iter() {
            for message in state.unacked() {
                trace!("resending {:?} on {}", message, key);
                self.transport.send(message).await;
                num_resent += 1;
            }
        }

        if num_resent > 0 {
            debug!("resent {} unacknowledged messages", num_resent);
        }
    }

    /// Processes an acknowledgment received from a peer. The acknowledgment travels in the
    ///  opposite direction of the data it acknowledges, so it is matched against the reverse of
    ///  its own endpoint.
    ///
    /// Acknowledgments for unknown endpoints or without a sequence number are ignored.
    pub async fn ack_message(&self, ack: &Message) {
        let sequence = match ack.sequence {
            Some(seq) => seq,
            None => {
                debug!("ignoring acknowledgment without sequence number: {:?}", ack);
                return;
            }
        };
        let key = EndpointKey::for_ack(ack);

        let mut inner = self.inner.lock().await;
        let state = match inner.endpoints.get_mut(&key) {
            Some(state) => state,
            None => {
                debug!("ignoring acknowledgment for unknown endpoint {}", key);
                return;
            }
        };

        let num_released = state.on_ack(sequence);
        trace!("ack #{} on {}: released {} messages, {} still in flight", sequence, key, num_released, state.window_len());
        drop(inner);

        if num_released > 0 {
            self.work_available.notify_one();
        }
    }

    /// Rejects all further messages for the endpoint. Messages that were sent before (pending
    ///  or in flight) are still dispatched and retransmitted as usual.
    pub async fn stop(&self, key: EndpointKey) {
        debug!("stopping endpoint {}", key);
        self.inner.lock().await
            .endpoints
            .entry(key)
            .or_default()
            .stop();
    }

    /// Discards all send state for the endpoint, including unsent and unacknowledged messages.
    ///  Sending on the endpoint afterwards starts from scratch, with sequence number 0.
    pub async fn close(&self, key: EndpointKey) {
        let removed = self.inner.lock().await
            .endpoints
            .remove(&key);

        if let Some(state) = removed {
            debug!("closed endpoint {}, discarding {} pending and {} in-flight messages", key, state.pending_len(), state.window_len());
        }
    }

    pub async fn is_queue_empty(&self, key: &EndpointKey) -> bool {
        self.inner.lock().await
            .endpoints
            .get(key)
            .map(|state| state.pending_len() == 0)
            .unwrap_or(true)
    }

    /// true if no message on the endpoint is waiting for an acknowledgment
    pub async fn is_window_empty(&self, key: &EndpointKey) -> bool {
        self.inner.lock().await
            .endpoints
            .get(key)
            .map(|state| state.window_len() == 0)
            .unwrap_or(true)
    }

    pub async fn pending_len(&self, key: &EndpointKey) -> usize {
        self.inner.lock().await
            .endpoints
            .get(key)
            .map(|state| state.pending_len())
            .unwrap_or(0)
    }

    pub async fn window_len(&self, key: &EndpointKey) -> usize {
        self.inner.lock().await
            .endpoints
            .get(key)
            .map(|state| state.window_len())
            .unwrap_or(0)
    }

    /// sequence numbers and ack state of the endpoint's window, oldest first
    pub async fn in_flight_sequences(&self, key: &EndpointKey) -> Vec<(SequenceNumber, AckState)> {
        self.inner.lock().await
            .endpoints
            .get(key)
            .map(|state| state.in_flight().collect())
            .unwrap_or_default()
    }

    /// the sequence number the endpoint's next dispatched message will get, `None` for an
    ///  unknown endpoint
    pub async fn next_sequence(&self, key: &EndpointKey) -> Option<SequenceNumber> {
        self.inner.lock().await
            .endpoints
            .get(key)
            .map(|state| state.next_sequence())
    }

    pub async fn endpoints(&self) -> Vec<EndpointKey> {
        self.inner.lock().await
            .endpoints
            .keys()
            .cloned()
            .collect()
    }

    /// Signals the background loops to finish. A dispatch pass or resend that is in progress
    ///  completes first.
    pub fn terminate(&self) {
        info!("terminating post office sender");
        self.shutdown.signal();
    }

    pub fn spawn_dispatch_loop(&self) -> JoinHandle<()> {
        tokio::spawn(self.clone().dispatch_loop(self.shutdown.clone()))
    }

    pub fn spawn_resend_loop(&self) -> JoinHandle<()> {
        tokio::spawn(self.clone().resend_loop(self.shutdown.clone()))
    }

    async fn dispatch_loop(self, shutdown: ShutdownToken) {
        info!("starting dispatch loop");

        while !shutdown.is_signalled() {
            self.dispatch_pass().await;
            tokio::task::yield_now().await;

            select! {
                _ = self.work_available.notified() => {}
                _ = shutdown.signalled() => {}
            }
        }

        info!("dispatch loop terminated");
    }

    async fn resend_loop(self, shutdown: ShutdownToken) {
        info!("starting resend loop with interval {:?}", self.config.resend_interval);

        let interval = self.config.resend_interval;
        let mut ticks = time::interval_at(Instant::now() + interval, interval);
        ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            select! {
                _ = shutdown.signalled() => break,
                _ = ticks.tick() => self.resend_all_unacked().await,
            }
        }

        info!("resend loop terminated");
    }
}
