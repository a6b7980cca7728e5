use std::net::SocketAddr;
use std::sync::Arc;

use tracing::{debug, error, warn};

use crate::messaging::codec;
use crate::messaging::message::{Message, Response};
use crate::messaging::transport::DatagramSender;


/// The server's side channel for push notifications: broadcast responses are encoded once and
///  sent to the multicast group, bypassing the unicast reply path.
pub struct BroadcastFanout {
    socket: Arc<dyn DatagramSender>,
    group_addr: SocketAddr,
    max_datagram_size: usize,
}

impl BroadcastFanout {
    pub fn new(socket: Arc<dyn DatagramSender>, group_addr: SocketAddr, max_datagram_size: usize) -> BroadcastFanout {
        BroadcastFanout {
            socket,
            group_addr,
            max_datagram_size,
        }
    }

    /// Returns `true` if the notification was handed to the socket. Failures are logged here and
    ///  not retried.
    pub async fn publish(&self, response: Response) -> bool {
        if !response.is_broadcast() {
            error!(?response, "attempting to broadcast a response that is not a broadcast - dropping");
            return false;
        }

        let datagram = match codec::encode_bounded(&Message::Response(response), self.max_datagram_size) {
            Ok(datagram) => datagram,
            Err(e) => {
                warn!("could not encode broadcast: {}", e);
                return false;
            }
        };

        debug!(group = ?self.group_addr, len = datagram.len(), "broadcasting");
        match self.socket.send_datagram(self.group_addr, &datagram).await {
            Ok(()) => true,
            Err(e) => {
                warn!(group = ?self.group_addr, "error sending broadcast: {}", e);
                false
            }
        }
    }
}
