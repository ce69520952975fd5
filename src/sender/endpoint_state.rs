use std::collections::VecDeque;

use tracing::error;

use crate::message::{Message, SequenceNumber};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum AckState {
    Acked,
    NotAcked,
}

#[derive(Debug)]
struct InFlight {
    message: Message,
    ack_state: AckState,
}

/// Send-side bookkeeping for a single endpoint: messages waiting to be sent, and the window of
///  messages that were sent but are not yet released by an acknowledgment.
///
/// The window is released strictly from its head. An acknowledged message behind an
///  unacknowledged one stays in the window (marked [AckState::Acked], and no longer resent)
///  until everything before it is acknowledged as well.
#[derive(Debug)]
pub struct EndpointState {
    pending: VecDeque<Message>,
    next_sequence: SequenceNumber,
    /// set once [SequenceNumber::MAX] was handed out
    sequences_exhausted: bool,
    window: VecDeque<InFlight>,
    stopped: bool,
}

impl Default for EndpointState {
    fn default() -> Self {
        Self::new()
    }
}

impl EndpointState {
    pub fn new() -> EndpointState {
        EndpointState {
            pending: VecDeque::new(),
            next_sequence: SequenceNumber::ZERO,
            sequences_exhausted: false,
            window: VecDeque::new(),
            stopped: false,
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    pub fn stop(&mut self) {
        self.stopped = true;
    }

    pub fn enqueue(&mut self, message: Message) {
        self.pending.push_back(message);
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn window_len(&self) -> usize {
        self.window.len()
    }

    pub fn next_sequence(&self) -> SequenceNumber {
        self.next_sequence
    }

    /// Moves the head of the pending queue into the window if the window has room, assigning
    ///  the next sequence number unless the message already carries one. Returns the admitted
    ///  message so it can be transmitted.
    ///
    /// When the sequence number space runs out, the endpoint is stopped, and messages that still
    ///  need a sequence number stay pending until the endpoint is closed.
    pub fn admit_next(&mut self, window_capacity: usize) -> Option<&Message> {
        if self.window.len() >= window_capacity {
            return None;
        }

        let needs_sequence = self.pending.front()?.sequence.is_none();
        if needs_sequence && self.sequences_exhausted {
            return None;
        }

        let mut message = self.pending.pop_front()?;
        if needs_sequence {
            message.sequence = Some(self.next_sequence);
            match self.next_sequence.checked_next() {
                Some(next) => self.next_sequence = next,
                None => {
                    error!("sequence numbers exhausted after {:?} - stopping the endpoint", message);
                    self.sequences_exhausted = true;
                    self.stopped = true;
                }
            }
        }

        self.window.push_back(InFlight {
            message,
            ack_state: AckState::NotAcked,
        });
        self.window.back().map(|f| &f.message)
    }

    /// Marks all in-flight messages with the given sequence number as acknowledged and slides
    ///  the window past the acknowledged prefix. Returns the number of released messages.
    pub fn on_ack(&mut self, sequence: SequenceNumber) -> usize {
        for in_flight in self.window.iter_mut() {
            if in_flight.message.sequence == Some(sequence) {
                in_flight.ack_state = AckState::Acked;
            }
        }

        let mut num_released = 0;
        while let Some(head) = self.window.front() {
            if head.ack_state != AckState::Acked {
                break;
            }
            self.window.pop_front();
            num_released += 1;
        }
        num_released
    }

    pub fn unacked(&self) -> impl Iterator<Item = &Message> {
        self.window.iter()
            .filter(|f| f.ack_state == AckState::NotAcked)
            .map(|f| &f.message)
    }

    pub fn in_flight(&self) -> impl Iterator<Item = (SequenceNumber, AckState)> + '_ {
        self.window.iter()
            .filter_map(|f| f.message.sequence.map(|seq| (seq, f.ack_state)))
    }
}
