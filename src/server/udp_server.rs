use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::anyhow;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::ServerConfig;
use crate::dispatch::persistence::Persistence;
use crate::dispatch::CommandDispatcher;
use crate::messaging::transport::bind_multicast_sender;
use crate::server::broadcast::BroadcastFanout;
use crate::server::ingest::{ControlCommand, IngestLoop};
use crate::server::stages::{DecodeStage, DispatchStage, PipelineStats, SendStage, DECODE_STAGE, DISPATCH_STAGE, SEND_STAGE};
use crate::server::worker_pool::WorkerPool;


pub struct UdpServer {
    config: ServerConfig,
    dispatcher: Arc<dyn CommandDispatcher>,
    persistence: Arc<dyn Persistence>,
}

impl UdpServer {
    pub fn new(config: ServerConfig, dispatcher: Arc<dyn CommandDispatcher>, persistence: Arc<dyn Persistence>) -> anyhow::Result<UdpServer> {
        config.validate()?;
        Ok(UdpServer {
            config,
            dispatcher,
            persistence,
        })
    }

    /// Binds all sockets and starts the pipeline. Failing to bind is the only fatal error, and it
    ///  happens here before any work is accepted.
    pub async fn start(self) -> anyhow::Result<ServerHandle> {
        let config = self.config;

        let socket = Arc::new(UdpSocket::bind(config.self_addr).await?);
        let local_addr = socket.local_addr()?;
        let multicast_socket = bind_multicast_sender(config.multicast_ttl, config.multicast_loop)?;

        let stats = Arc::new(PipelineStats::default());
        let fanout = Arc::new(BroadcastFanout::new(Arc::new(multicast_socket), config.multicast_addr(), config.max_datagram_size));

        // stages are built back to front, each handler owning the submitter of the next stage
        let (send_pool, send) = WorkerPool::spawn(SEND_STAGE, config.send_workers, config.send_queue_capacity, config.handoff_timeout, SendStage {
            socket: socket.clone(),
            max_datagram_size: config.max_datagram_size,
            stats: stats.clone(),
        });
        let (dispatch_pool, dispatch) = WorkerPool::spawn(DISPATCH_STAGE, config.dispatch_workers, config.dispatch_queue_capacity, config.handoff_timeout, DispatchStage {
            dispatcher: self.dispatcher,
            send,
            fanout,
            stats: stats.clone(),
        });
        let (decode_pool, decode) = WorkerPool::spawn(DECODE_STAGE, config.decode_workers, config.decode_queue_capacity, config.handoff_timeout, DecodeStage {
            dispatch,
            stats: stats.clone(),
        });

        let (control, control_receiver) = mpsc::channel(16);
        let running = Arc::new(AtomicBool::new(true));

        let persistence = self.persistence;
        let ingest = IngestLoop {
            socket,
            decode,
            control: control_receiver,
            persistence: persistence.clone(),
            running: running.clone(),
            poll_timeout: config.poll_timeout,
            max_datagram_size: config.max_datagram_size,
            stats: stats.clone(),
        };

        let grace_period = config.shutdown_grace_period;
        let join_handle = tokio::spawn(async move {
            ingest.run().await;

            // upstream first: each stage stops accepting once the stage before it has exited
            decode_pool.shutdown(grace_period).await;
            dispatch_pool.shutdown(grace_period).await;
            send_pool.shutdown(grace_period).await;

            // commands that completed while draining are not in the snapshot taken before
            match persistence.save() {
                Ok(()) => info!("collection saved after draining the pipeline"),
                Err(e) => error!("error saving collection after draining the pipeline: {:#}", e),
            }

            info!(
                datagrams_received = stats.datagrams_received.load(Ordering::Relaxed),
                undecodable_datagrams = stats.undecodable_datagrams.load(Ordering::Relaxed),
                broadcasts_sent = stats.broadcasts_sent.load(Ordering::Relaxed),
                send_failures = stats.send_failures.load(Ordering::Relaxed),
                "server shut down"
            );
        });

        info!(?local_addr, multicast = ?config.multicast_addr(), "server started");
        Ok(ServerHandle {
            local_addr,
            control,
            running,
            join_handle,
        })
    }
}

/// Control of a running server, feeding the same channel as the operator console.
pub struct ServerHandle {
    local_addr: SocketAddr,
    control: mpsc::Sender<ControlCommand>,
    running: Arc<AtomicBool>,
    join_handle: JoinHandle<()>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// a sender for operator input, e.g. for [crate::server::ingest::spawn_stdin_reader]
    pub fn control(&self) -> mpsc::Sender<ControlCommand> {
        self.control.clone()
    }

    pub async fn save(&self) -> anyhow::Result<()> {
        self.control.send(ControlCommand::Save).await
            .map_err(|_| anyhow!("server is not running"))
    }

    /// Requests shutdown and waits until the pipeline is drained.
    pub async fn shutdown(self) -> anyhow::Result<()> {
        if self.control.send(ControlCommand::Shutdown).await.is_err() {
            warn!("server was already shutting down");
        }
        self.join().await
    }

    /// Waits until the server stops, e.g. after `shutdown` was entered at the console.
    pub async fn join(self) -> anyhow::Result<()> {
        self.join_handle.await?;
        Ok(())
    }
}
