use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[cfg(test)] use mockall::automock;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::messaging::codec;
use crate::messaging::message::Response;


/// Receives server-initiated broadcasts. These are push notifications, they never relate to a
///  request of this client.
#[cfg_attr(test, automock)]
pub trait NotificationSink: Send + Sync + 'static {
    fn on_broadcast(&self, notification: Response);
}

/// Prints broadcasts to the console, interleaved with the interactive session.
pub struct ConsoleNotificationSink;

impl NotificationSink for ConsoleNotificationSink {
    fn on_broadcast(&self, notification: Response) {
        println!("[BROADCAST] {}", notification.message());
    }
}

/// The client's listener on the multicast group. It runs independently of request/response
///  correlation and delivers broadcasts straight to a [NotificationSink].
pub struct BroadcastListener {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Drop for BroadcastListener {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

impl BroadcastListener {
    pub fn spawn(socket: UdpSocket, sink: Arc<dyn NotificationSink>, running: Arc<AtomicBool>, poll_timeout: Duration, max_datagram_size: usize) -> BroadcastListener {
        let handle = tokio::spawn(Self::listen_loop(socket, sink, running.clone(), poll_timeout, max_datagram_size));
        BroadcastListener {
            running,
            handle: Some(handle),
        }
    }

    pub async fn shutdown(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }

    async fn listen_loop(socket: UdpSocket, sink: Arc<dyn NotificationSink>, running: Arc<AtomicBool>, poll_timeout: Duration, max_datagram_size: usize) {
        let mut buf = vec![0u8; max_datagram_size];

        while running.load(Ordering::Acquire) {
            let (len, from) = match tokio::time::timeout(poll_timeout, socket.recv_from(&mut buf)).await {
                Err(_) => continue,
                Ok(Ok(received)) => received,
                Ok(Err(e)) => {
                    debug!("error receiving on multicast socket: {}", e);
                    continue;
                }
            };

            match codec::decode_response(&buf[..len]) {
                Ok(response) if response.is_broadcast() => {
                    debug!(?from, "received broadcast");
                    sink.on_broadcast(response);
                }
                Ok(response) => {
                    warn!(?from, request_id = ?response.request_id(), "ignoring non-broadcast response on the multicast group");
                }
                Err(e) => {
                    warn!(?from, len, "dropping undecodable broadcast: {}", e);
                }
            }
        }
        info!("broadcast listener shut down");
    }
}
