use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::client::multicast::NotificationSink;
use crate::messaging::message::Response;
use crate::messaging::transport::DatagramSender;


/// Records every datagram instead of sending it
#[derive(Debug, Default)]
pub struct TrackingDatagramSender {
    tracker: Arc<RwLock<Vec<(SocketAddr, Vec<u8>)>>>,
}
impl TrackingDatagramSender {
    pub fn new() -> Self {
        Default::default()
    }

    pub async fn sent(&self) -> Vec<(SocketAddr, Vec<u8>)> {
        self.tracker.read().await.clone()
    }
}

#[async_trait]
impl DatagramSender for TrackingDatagramSender {
    async fn send_datagram(&self, to: SocketAddr, datagram: &[u8]) -> std::io::Result<()> {
        self.tracker.write().await.push((to, datagram.to_vec()));
        Ok(())
    }
}

/// Collects broadcast messages in the order they arrive
#[derive(Debug, Default)]
pub struct RecordingNotificationSink {
    received: std::sync::Mutex<Vec<String>>,
}
impl RecordingNotificationSink {
    pub fn received(&self) -> Vec<String> {
        match self.received.lock() {
            Ok(received) => received.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl NotificationSink for RecordingNotificationSink {
    fn on_broadcast(&self, notification: Response) {
        if let Ok(mut received) = self.received.lock() {
            received.push(notification.message().to_string());
        }
    }
}
