use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, trace_span, warn};

use crate::dispatch::persistence::Persistence;
use crate::server::stages::{DatagramTask, PipelineStats};
use crate::server::worker_pool::StageSubmitter;


pub const UNKNOWN_CONTROL_COMMAND_MESSAGE: &str = "Неизвестное имя команды. Введите одну из доступных: shutdown/save.";

/// Operator commands, delivered out of band from the network traffic.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ControlCommand {
    /// persist, then drain the pipeline and stop
    Shutdown,
    Save,
}

impl ControlCommand {
    /// `Ok(None)` for blank lines, `Err` with a message for the operator for anything unknown
    pub fn parse(line: &str) -> Result<Option<ControlCommand>, &'static str> {
        match line.trim() {
            "" => Ok(None),
            "shutdown" => Ok(Some(ControlCommand::Shutdown)),
            "save" => Ok(Some(ControlCommand::Save)),
            _ => Err(UNKNOWN_CONTROL_COMMAND_MESSAGE),
        }
    }
}

/// Forwards operator commands from stdin. End of input counts as `shutdown`.
pub fn spawn_stdin_reader(control: mpsc::Sender<ControlCommand>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            let line = match lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => {
                    info!("end of operator input, shutting down");
                    let _ = control.send(ControlCommand::Shutdown).await;
                    return;
                }
                Err(e) => {
                    error!("error reading operator input: {}", e);
                    let _ = control.send(ControlCommand::Shutdown).await;
                    return;
                }
            };

            match ControlCommand::parse(&line) {
                Ok(Some(command)) => {
                    let is_shutdown = command == ControlCommand::Shutdown;
                    if control.send(command).await.is_err() || is_shutdown {
                        return;
                    }
                }
                Ok(None) => {}
                Err(message) => {
                    warn!(%line, "unknown operator command");
                    println!("{}", message);
                }
            }
        }
    })
}

/// The server's receive loop. It owns the socket and does nothing but move datagrams into the
///  decode stage, checking the control channel between datagrams so that operator commands are
///  never starved by traffic.
pub struct IngestLoop {
    pub socket: Arc<UdpSocket>,
    pub decode: StageSubmitter<DatagramTask>,
    pub control: mpsc::Receiver<ControlCommand>,
    pub persistence: Arc<dyn Persistence>,
    pub running: Arc<AtomicBool>,
    pub poll_timeout: Duration,
    pub max_datagram_size: usize,
    pub stats: Arc<PipelineStats>,
}

impl IngestLoop {
    /// Runs until shutdown. The decode stage's submitter is dropped on return, which lets the
    ///  pipeline drain.
    #[tracing::instrument(name = "ingest", skip_all)]
    pub async fn run(mut self) {
        let mut buf = vec![0u8; self.max_datagram_size];
        info!(local_addr = ?self.socket.local_addr().ok(), "ingestion loop started");

        while self.running.load(Ordering::Acquire) {
            match self.control.try_recv() {
                Ok(ControlCommand::Save) => self.save(),
                Ok(ControlCommand::Shutdown) => {
                    info!("shutdown requested");
                    self.save();
                    self.running.store(false, Ordering::Release);
                    break;
                }
                Err(TryRecvError::Disconnected) => {
                    info!("control channel closed, shutting down");
                    self.save();
                    self.running.store(false, Ordering::Release);
                    break;
                }
                Err(TryRecvError::Empty) => {}
            }

            match tokio::time::timeout(self.poll_timeout, self.socket.readable()).await {
                Err(_) => continue,
                Ok(Err(e)) => {
                    error!("error polling socket: {}", e);
                    continue;
                }
                Ok(Ok(())) => {}
            }

            match self.socket.try_recv_from(&mut buf) {
                Ok((len, sender)) => {
                    let _span = trace_span!("datagram", ?sender, len).entered();
                    self.stats.datagrams_received.fetch_add(1, Ordering::Relaxed);
                    trace!("received datagram");

                    // the buffer is reused for the next datagram
                    let datagram = Bytes::copy_from_slice(&buf[..len]);
                    if let Err(e) = self.decode.try_submit(DatagramTask { datagram, sender }) {
                        warn!(?sender, len, "rejecting datagram: {}", e);
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
                Err(e) => {
                    // e.g. an ICMP 'port unreachable' for an earlier response, reported on some platforms
                    debug!("error receiving datagram: {}", e);
                }
            }
        }
        info!("ingestion loop stopped");
    }

    fn save(&self) {
        match self.persistence.save() {
            Ok(()) => info!("collection saved"),
            Err(e) => error!("error saving collection: {:#}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use crate::dispatch::persistence::MockPersistence;
    use crate::server::stages::DECODE_STAGE;
    use crate::server::worker_pool::{StageHandler, WorkerPool};
    use super::*;

    #[rstest]
    #[case::shutdown("shutdown", Ok(Some(ControlCommand::Shutdown)))]
    #[case::save("  save\n", Ok(Some(ControlCommand::Save)))]
    #[case::blank("   ", Ok(None))]
    #[case::unknown("exit", Err(UNKNOWN_CONTROL_COMMAND_MESSAGE))]
    fn test_parse_control_command(#[case] line: &str, #[case] expected: Result<Option<ControlCommand>, &'static str>) {
        assert_eq!(ControlCommand::parse(line), expected);
    }

    struct Forward(mpsc::UnboundedSender<DatagramTask>);
    #[async_trait::async_trait]
    impl StageHandler<DatagramTask> for Forward {
        async fn handle(&self, item: DatagramTask) {
            let _ = self.0.send(item);
        }
    }

    #[tokio::test]
    async fn test_datagrams_are_forwarded_until_shutdown() {
        let socket = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
        let server_addr = socket.local_addr().unwrap();
        let (forwarded_tx, mut forwarded) = mpsc::unbounded_channel();
        let (decode_pool, decode) = WorkerPool::spawn(DECODE_STAGE, 2, 16, Duration::from_millis(100), Forward(forwarded_tx));
        let (control_tx, control) = mpsc::channel(4);

        let mut persistence = MockPersistence::new();
        persistence.expect_save()
            .times(2)
            .returning(|| Ok(()));

        let running = Arc::new(AtomicBool::new(true));
        let stats = Arc::new(PipelineStats::default());
        let ingest = tokio::spawn(IngestLoop {
            socket,
            decode,
            control,
            persistence: Arc::new(persistence),
            running: running.clone(),
            poll_timeout: Duration::from_millis(20),
            max_datagram_size: 65535,
            stats: stats.clone(),
        }.run());

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        client.send_to(b"first", server_addr).await.unwrap();
        client.send_to(b"second", server_addr).await.unwrap();

        let mut received = vec![forwarded.recv().await.unwrap(), forwarded.recv().await.unwrap()];
        received.sort_by(|a, b| a.datagram.cmp(&b.datagram));
        assert_eq!(&received[0].datagram[..], b"first");
        assert_eq!(&received[1].datagram[..], b"second");
        assert_eq!(received[0].sender, client.local_addr().unwrap());

        control_tx.send(ControlCommand::Save).await.unwrap();
        control_tx.send(ControlCommand::Shutdown).await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), ingest).await.unwrap().unwrap();

        assert!(!running.load(Ordering::Acquire));
        assert_eq!(stats.datagrams_received.load(Ordering::Relaxed), 2);
        decode_pool.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn test_full_decode_queue_rejects_without_stopping() {
        struct Stuck;
        #[async_trait::async_trait]
        impl StageHandler<DatagramTask> for Stuck {
            async fn handle(&self, _item: DatagramTask) {
                std::future::pending::<()>().await;
            }
        }

        let socket = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
        let server_addr = socket.local_addr().unwrap();
        let (decode_pool, decode) = WorkerPool::spawn(DECODE_STAGE, 1, 1, Duration::from_millis(10), Stuck);
        let (control_tx, control) = mpsc::channel(4);

        let mut persistence = MockPersistence::new();
        persistence.expect_save().returning(|| Ok(()));

        let stats = Arc::new(PipelineStats::default());
        let ingest = tokio::spawn(IngestLoop {
            socket,
            decode,
            control,
            persistence: Arc::new(persistence),
            running: Arc::new(AtomicBool::new(true)),
            poll_timeout: Duration::from_millis(20),
            max_datagram_size: 65535,
            stats: stats.clone(),
        }.run());

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        for _ in 0..5 {
            client.send_to(b"x", server_addr).await.unwrap();
        }
        while stats.datagrams_received.load(Ordering::Relaxed) < 5 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        control_tx.send(ControlCommand::Shutdown).await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), ingest).await.unwrap().unwrap();

        let decode_stats = decode_pool.shutdown(Duration::from_millis(10)).await;
        assert_eq!(decode_stats.submitted + decode_stats.rejected, 5);
        assert!(decode_stats.rejected >= 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_shutdown_is_not_starved_by_traffic() {
        struct Discard;
        #[async_trait::async_trait]
        impl StageHandler<DatagramTask> for Discard {
            async fn handle(&self, _item: DatagramTask) {}
        }

        let socket = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
        let server_addr = socket.local_addr().unwrap();
        let (decode_pool, decode) = WorkerPool::spawn(DECODE_STAGE, 2, 1024, Duration::from_millis(10), Discard);
        let (control_tx, control) = mpsc::channel(4);

        let mut persistence = MockPersistence::new();
        persistence.expect_save()
            .once()
            .returning(|| Ok(()));

        let running = Arc::new(AtomicBool::new(true));
        let stats = Arc::new(PipelineStats::default());
        let ingest = tokio::spawn(IngestLoop {
            socket,
            decode,
            control,
            persistence: Arc::new(persistence),
            running: running.clone(),
            poll_timeout: Duration::from_millis(100),
            max_datagram_size: 65535,
            stats: stats.clone(),
        }.run());

        let flooding = Arc::new(AtomicBool::new(true));
        let flood = {
            let flooding = flooding.clone();
            tokio::spawn(async move {
                let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
                while flooding.load(Ordering::Acquire) {
                    let _ = client.send_to(b"flood", server_addr).await;
                }
            })
        };

        tokio::time::timeout(Duration::from_secs(5), async {
            while stats.datagrams_received.load(Ordering::Relaxed) < 100 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        }).await.unwrap();

        // traffic keeps coming while the shutdown request is pending
        control_tx.send(ControlCommand::Shutdown).await.unwrap();
        tokio::time::timeout(Duration::from_secs(2), ingest).await
            .expect("ingestion loop did not stop under load")
            .unwrap();
        assert!(!running.load(Ordering::Acquire));

        flooding.store(false, Ordering::Release);
        flood.await.unwrap();
        decode_pool.shutdown(Duration::from_secs(1)).await;
    }
}
