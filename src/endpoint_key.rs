use std::fmt::{Debug, Display, Formatter};

use crate::message::Message;

/// One direction of a logical connection: data with this key travels from
///  `(src_host, src_port)` to `(dest_host, dest_port)`.
///
/// Acknowledgments travel in the opposite direction, so the key of an inbound ack has to be
///  reversed to find the outbound endpoint it refers to (see [EndpointKey::for_ack]).
///
/// NB: Equality and hashing compare all four fields. Folding source and destination into sums
///      (as a naive implementation might) makes e.g. `1->4` and `2->3` collide.
#[derive(Clone, Copy, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct EndpointKey {
    pub src_host: u32,
    pub src_port: u16,
    pub dest_host: u32,
    pub dest_port: u16,
}

impl Debug for EndpointKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}]", self)
    }
}

impl Display for EndpointKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}->{}:{}", self.src_host, self.src_port, self.dest_host, self.dest_port)
    }
}

impl EndpointKey {
    pub fn new(src_host: u32, src_port: u16, dest_host: u32, dest_port: u16) -> EndpointKey {
        EndpointKey {
            src_host,
            src_port,
            dest_host,
            dest_port,
        }
    }

    /// the endpoint a data message is sent on
    pub fn for_message(message: &Message) -> EndpointKey {
        EndpointKey::new(message.src_host, message.src_port, message.dest_host, message.dest_port)
    }

    /// the outbound endpoint that an inbound acknowledgment refers to
    pub fn for_ack(ack: &Message) -> EndpointKey {
        EndpointKey::for_message(ack).reverse()
    }

    pub fn reverse(&self) -> EndpointKey {
        EndpointKey::new(self.dest_host, self.dest_port, self.src_host, self.src_port)
    }
}
