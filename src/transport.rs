use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::BytesMut;
#[cfg(test)] use mockall::automock;
use rustc_hash::FxHashMap;
use tokio::net::UdpSocket;
use tokio::select;
use tracing::{debug, error, info, trace, warn};

use crate::message::Message;
use crate::shutdown::ShutdownToken;

/// This is the unreliable datagram primitive the post office is built on. Implementations are
///  best effort: a message may be dropped, duplicated or reordered, and failures are logged
///  rather than returned - compensating for them is what the sender's retransmission is for.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn send(&self, message: &Message);
}

/// Receiving side of a transport: whatever demultiplexes inbound messages (and feeds
///  acknowledgments into the sender) implements this.
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    async fn on_message(&self, message: Message);
}

/// [Transport] over a UDP socket. Logical host ids are mapped to UDP addresses by a static host
///  table; messages for hosts that are not in the table are dropped.
pub struct UdpTransport {
    socket: Arc<UdpSocket>,
    hosts: FxHashMap<u32, SocketAddr>,
}

impl UdpTransport {
    pub async fn bind(addr: SocketAddr, hosts: FxHashMap<u32, SocketAddr>) -> anyhow::Result<UdpTransport> {
        let socket = UdpSocket::bind(addr).await?;
        info!("bound UDP transport to {:?}", socket.local_addr()?);

        Ok(UdpTransport {
            socket: Arc::new(socket),
            hosts,
        })
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Receives datagrams until `shutdown` is signalled, passing every message that decodes
    ///  cleanly to `handler`. Corrupted or truncated datagrams are dropped.
    pub async fn recv_loop(&self, handler: Arc<dyn MessageHandler>, shutdown: ShutdownToken) {
        info!("starting UDP receive loop");

        let mut buf = vec![0u8; Message::MAX_DATAGRAM_LEN];
        loop {
            let (num_read, from) = select! {
                _ = shutdown.signalled() => break,
                received = self.socket.recv_from(&mut buf) => match received {
                    Ok(x) => x,
                    Err(e) => {
                        error!("socket error: {}", e);
                        continue;
                    }
                }
            };

            match Message::try_deser(&buf[..num_read]) {
                Ok(message) => {
                    trace!("received {:?} from {:?}", message, from);
                    handler.on_message(message).await;
                }
                Err(e) => {
                    debug!("dropping undecodable datagram from {:?}: {}", from, e);
                }
            }
        }

        info!("UDP receive loop terminated");
    }
}

#[async_trait]
impl Transport for UdpTransport {
    async fn send(&self, message: &Message) {
        let to = match self.hosts.get(&message.dest_host) {
            Some(addr) => *addr,
            None => {
                warn!("no address for host {} - dropping {:?}", message.dest_host, message);
                return;
            }
        };

        if message.payload.len() > Message::MAX_PAYLOAD_LEN {
            warn!("payload of {} bytes exceeds the maximum of {} - dropping {:?}", message.payload.len(), Message::MAX_PAYLOAD_LEN, message);
            return;
        }

        let mut buf = BytesMut::with_capacity(message.serialized_len());
        message.ser(&mut buf);

        trace!("UDP transport: sending {:?} to {:?}", message, to);
        if let Err(e) = self.socket.send_to(&buf, to).await {
            error!("error sending UDP packet to {:?}: {}", to, e);
        }
    }
}
