use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::{debug, error, trace, warn};

use crate::dispatch::CommandDispatcher;
use crate::messaging::codec;
use crate::messaging::message::{ErrorDetail, ErrorKind, Message, Request, Response, ResponseKind};
use crate::messaging::transport::DatagramSender;
use crate::server::broadcast::BroadcastFanout;
use crate::server::worker_pool::{StageHandler, StageSubmitter};


pub const DECODE_STAGE: &str = "decode";
pub const DISPATCH_STAGE: &str = "dispatch";
pub const SEND_STAGE: &str = "send";

/// raw bytes of a received datagram, copied out of the receive buffer
#[derive(Debug)]
pub struct DatagramTask {
    pub datagram: Bytes,
    pub sender: SocketAddr,
}

#[derive(Debug)]
pub struct RequestTask {
    pub request: Request,
    pub sender: SocketAddr,
}

#[derive(Debug)]
pub struct ResponseTask {
    pub response: Response,
    pub recipient: SocketAddr,
}

/// Counters for everything that is dropped by the pipeline rather than rejected at a queue.
#[derive(Debug, Default)]
pub struct PipelineStats {
    pub datagrams_received: AtomicU64,
    pub undecodable_datagrams: AtomicU64,
    pub broadcasts_sent: AtomicU64,
    pub send_failures: AtomicU64,
}

pub struct DecodeStage {
    pub dispatch: StageSubmitter<RequestTask>,
    pub stats: Arc<PipelineStats>,
}

#[async_trait]
impl StageHandler<DatagramTask> for DecodeStage {
    async fn handle(&self, task: DatagramTask) {
        let request = match codec::decode_request(&task.datagram) {
            Ok(request) => request,
            Err(e) => {
                // there is no meaningful way to answer a datagram we cannot read
                self.stats.undecodable_datagrams.fetch_add(1, Ordering::Relaxed);
                warn!(sender = ?task.sender, len = task.datagram.len(), "dropping undecodable datagram: {}", e);
                return;
            }
        };

        let request_id = request.request_id();
        trace!(sender = ?task.sender, %request_id, command = request.command_name(), "decoded request");
        if let Err(e) = self.dispatch.submit(RequestTask { request, sender: task.sender }).await {
            warn!(sender = ?task.sender, %request_id, "dropping request: {}", e);
        }
    }
}

pub struct DispatchStage {
    pub dispatcher: Arc<dyn CommandDispatcher>,
    pub send: StageSubmitter<ResponseTask>,
    pub fanout: Arc<BroadcastFanout>,
    pub stats: Arc<PipelineStats>,
}

impl DispatchStage {
    /// Runs the command on the blocking pool since commands may block on persistence. A panicking
    ///  command still produces a response for its request.
    async fn execute(&self, request: Request) -> Response {
        let request_id = request.request_id();
        let dispatcher = self.dispatcher.clone();

        match tokio::task::spawn_blocking(move || dispatcher.execute(&request)).await {
            Ok(response) => response,
            Err(e) => {
                error!(%request_id, "command execution failed: {}", e);
                Response::error(request_id, ErrorDetail::new(ErrorKind::Internal, "Внутренняя ошибка сервера."))
            }
        }
    }
}

#[async_trait]
impl StageHandler<RequestTask> for DispatchStage {
    async fn handle(&self, task: RequestTask) {
        let request_id = task.request.request_id();
        let response = self.execute(task.request).await;

        match response.kind() {
            ResponseKind::Normal => {
                if response.request_id() != Some(request_id) {
                    warn!(%request_id, response_id = ?response.request_id(), "dispatcher returned a response for a different request id");
                }
                if let Err(e) = self.send.submit(ResponseTask { response, recipient: task.sender }).await {
                    warn!(%request_id, recipient = ?task.sender, "dropping response: {}", e);
                }
            }
            ResponseKind::Broadcast => {
                debug!(%request_id, "routing broadcast to the multicast group");
                if self.fanout.publish(response).await {
                    self.stats.broadcasts_sent.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    }
}

pub struct SendStage {
    pub socket: Arc<dyn DatagramSender>,
    pub max_datagram_size: usize,
    pub stats: Arc<PipelineStats>,
}

#[async_trait]
impl StageHandler<ResponseTask> for SendStage {
    async fn handle(&self, task: ResponseTask) {
        let request_id = task.response.request_id();
        let datagram = match codec::encode_bounded(&Message::Response(task.response), self.max_datagram_size) {
            Ok(datagram) => datagram,
            Err(e) => {
                self.stats.send_failures.fetch_add(1, Ordering::Relaxed);
                error!(?request_id, recipient = ?task.recipient, "could not encode response: {}", e);
                return;
            }
        };

        // no retry: the client's timeout is the only recovery mechanism
        if let Err(e) = self.socket.send_datagram(task.recipient, &datagram).await {
            self.stats.send_failures.fetch_add(1, Ordering::Relaxed);
            warn!(?request_id, recipient = ?task.recipient, "error sending response: {}", e);
        }
    }
}
