use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::client::pending::PendingRequestTable;
use crate::error::ClientError;
use crate::messaging::codec;
use crate::messaging::message::{Message, Request, Response};
use crate::messaging::transport::DatagramSender;


/// Pairs outgoing requests with incoming responses over one unicast socket.
///
/// A receiver task reads every datagram arriving on the socket and hands decoded responses to the
///  [PendingRequestTable], where the waiting [Correlator::send_and_await] call picks them up.
pub struct Correlator {
    socket: Arc<UdpSocket>,
    server_addr: SocketAddr,
    table: Arc<PendingRequestTable>,
    max_datagram_size: usize,
    running: Arc<AtomicBool>,
    receiver: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for Correlator {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.receiver.get_mut().take() {
            handle.abort();
        }
    }
}

impl Correlator {
    pub fn new(socket: UdpSocket, server_addr: SocketAddr, running: Arc<AtomicBool>, poll_timeout: Duration, max_datagram_size: usize) -> Correlator {
        let socket = Arc::new(socket);
        let table = Arc::new(PendingRequestTable::new());

        let receiver = tokio::spawn(Self::receive_loop(socket.clone(), table.clone(), running.clone(), poll_timeout, max_datagram_size));

        Correlator {
            socket,
            server_addr,
            table,
            max_datagram_size,
            running,
            receiver: Mutex::new(Some(receiver)),
        }
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn pending_requests(&self) -> &PendingRequestTable {
        &self.table
    }

    /// Sends a request and waits for the matching response.
    ///
    /// The request must be freshly created: a retry after [ClientError::Timeout] needs a new
    ///  [Request] with a new id, otherwise a late response to the first attempt could not be told
    ///  apart from the answer to the retry.
    pub async fn send_and_await(&self, request: Request, timeout: Duration) -> Result<Response, ClientError> {
        if !self.running.load(Ordering::Acquire) {
            return Err(ClientError::Shutdown);
        }

        let request_id = request.request_id();
        let datagram = codec::encode_bounded(&Message::Request(request), self.max_datagram_size)
            .map_err(ClientError::Encode)?;

        let slot = self.table.register(request_id)
            .ok_or(ClientError::DuplicateRequest(request_id))?;

        trace!(%request_id, server = ?self.server_addr, "sending request");
        if let Err(e) = self.socket.send_datagram(self.server_addr, &datagram).await {
            self.table.remove(request_id);
            return Err(ClientError::Transport(e));
        }

        match tokio::time::timeout(timeout, slot).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => {
                // the table was cleared on shutdown
                self.table.remove(request_id);
                Err(ClientError::Shutdown)
            }
            Err(_) => {
                self.table.remove(request_id);
                debug!(%request_id, ?timeout, "request timed out");
                Err(ClientError::Timeout { request_id, timeout })
            }
        }
    }

    /// Sends a request without waiting for a response. This is for commands whose result arrives
    ///  as a broadcast, which is never correlated with the request.
    pub async fn send(&self, request: Request) -> Result<(), ClientError> {
        if !self.running.load(Ordering::Acquire) {
            return Err(ClientError::Shutdown);
        }

        let request_id = request.request_id();
        let datagram = codec::encode_bounded(&Message::Request(request), self.max_datagram_size)
            .map_err(ClientError::Encode)?;

        trace!(%request_id, server = ?self.server_addr, "sending request without awaiting a response");
        self.socket.send_datagram(self.server_addr, &datagram).await?;
        Ok(())
    }

    /// Stops the receiver task. Calls that are still waiting fail with [ClientError::Shutdown],
    ///  and so do all calls made afterwards.
    pub async fn shutdown(&self) {
        self.running.store(false, Ordering::Release);
        let cancelled = self.table.clear();
        if cancelled > 0 {
            debug!(cancelled, "cancelled pending requests on shutdown");
        }

        let handle = self.receiver.lock().await.take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }

        let stats = self.table.stats();
        info!(
            registered = stats.registered.load(Ordering::Relaxed),
            completed = stats.completed.load(Ordering::Relaxed),
            removed = stats.removed.load(Ordering::Relaxed),
            discarded = stats.discarded.load(Ordering::Relaxed),
            "correlator shut down"
        );
    }

    async fn receive_loop(socket: Arc<UdpSocket>, table: Arc<PendingRequestTable>, running: Arc<AtomicBool>, poll_timeout: Duration, max_datagram_size: usize) {
        let mut buf = vec![0u8; max_datagram_size];

        while running.load(Ordering::Acquire) {
            let (len, from) = match tokio::time::timeout(poll_timeout, socket.recv_from(&mut buf)).await {
                Err(_) => {
                    // idle, so drop the entries of calls that were cancelled while waiting
                    table.remove_abandoned();
                    continue;
                }
                Ok(Ok(received)) => received,
                Ok(Err(e)) => {
                    // e.g. an ICMP 'port unreachable' for an earlier send, reported on some platforms
                    debug!("error receiving datagram: {}", e);
                    continue;
                }
            };

            match codec::decode_response(&buf[..len]) {
                Ok(response) if response.is_broadcast() => {
                    warn!(?from, "ignoring broadcast received on the unicast socket");
                }
                Ok(response) => {
                    table.complete(response);
                }
                Err(e) => {
                    warn!(?from, len, "dropping undecodable datagram: {}", e);
                }
            }
        }
        info!("response receiver shut down");
    }
}
