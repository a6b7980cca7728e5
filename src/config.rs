use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use anyhow::bail;

/// UDP preserves message boundaries up to this size, and every message is a single datagram.
pub const MAX_DATAGRAM_SIZE: usize = 65535;

pub const DEFAULT_MULTICAST_GROUP: Ipv4Addr = Ipv4Addr::new(230, 0, 0, 1);
pub const DEFAULT_MULTICAST_PORT: u16 = 4446;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub self_addr: SocketAddr,

    pub multicast_group: Ipv4Addr,
    pub multicast_port: u16,
    pub multicast_ttl: u32,
    /// deliver broadcasts to listeners on the sending host as well
    pub multicast_loop: bool,

    /// Upper bound for a single wait on socket readiness. This is not a protocol timeout, it only
    ///  bounds how long it takes for the ingestion loop to notice operator commands and shutdown.
    pub poll_timeout: Duration,

    pub decode_workers: usize,
    pub dispatch_workers: usize,
    pub send_workers: usize,

    pub decode_queue_capacity: usize,
    pub dispatch_queue_capacity: usize,
    pub send_queue_capacity: usize,

    /// how long a stage waits for room in the next stage's queue before the item is rejected
    pub handoff_timeout: Duration,
    /// time each stage gets to drain in-flight work on shutdown before its workers are aborted
    pub shutdown_grace_period: Duration,

    pub max_datagram_size: usize,
}

impl ServerConfig {
    pub fn new(self_addr: SocketAddr) -> ServerConfig {
        let cores = num_cpus::get().max(1);

        ServerConfig {
            self_addr,
            multicast_group: DEFAULT_MULTICAST_GROUP,
            multicast_port: DEFAULT_MULTICAST_PORT,
            multicast_ttl: 1,
            multicast_loop: true,
            poll_timeout: Duration::from_millis(100),
            decode_workers: 4 * cores,
            dispatch_workers: cores,
            send_workers: 4 * cores,
            decode_queue_capacity: 4096,
            dispatch_queue_capacity: 1024,
            send_queue_capacity: 1024,
            handoff_timeout: Duration::from_millis(500),
            shutdown_grace_period: Duration::from_secs(5),
            max_datagram_size: MAX_DATAGRAM_SIZE,
        }
    }

    pub fn multicast_addr(&self) -> SocketAddr {
        SocketAddr::from((self.multicast_group, self.multicast_port))
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if !self.multicast_group.is_multicast() {
            bail!("{} is not a multicast address", self.multicast_group);
        }
        if self.decode_workers == 0 || self.dispatch_workers == 0 || self.send_workers == 0 {
            bail!("every pipeline stage needs at least one worker");
        }
        if self.decode_queue_capacity == 0 || self.dispatch_queue_capacity == 0 || self.send_queue_capacity == 0 {
            bail!("pipeline queue capacities must be positive");
        }
        if self.poll_timeout.is_zero() {
            bail!("poll timeout must be positive");
        }
        if self.max_datagram_size == 0 || self.max_datagram_size > MAX_DATAGRAM_SIZE {
            bail!("max datagram size must be between 1 and {}", MAX_DATAGRAM_SIZE);
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub server_addr: SocketAddr,
    /// local address of the unicast socket, typically with port 0
    pub self_addr: SocketAddr,

    pub multicast_group: Ipv4Addr,
    pub multicast_port: u16,
    pub multicast_interface: Ipv4Addr,

    pub request_timeout: Duration,
    /// bounds a single wait of the receiver tasks so they notice shutdown
    pub receive_poll_timeout: Duration,

    pub max_datagram_size: usize,
}

impl ClientConfig {
    pub fn new(server_addr: SocketAddr) -> ClientConfig {
        ClientConfig {
            server_addr,
            self_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)),
            multicast_group: DEFAULT_MULTICAST_GROUP,
            multicast_port: DEFAULT_MULTICAST_PORT,
            multicast_interface: Ipv4Addr::UNSPECIFIED,
            request_timeout: Duration::from_secs(10),
            receive_poll_timeout: Duration::from_millis(100),
            max_datagram_size: MAX_DATAGRAM_SIZE,
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if !self.multicast_group.is_multicast() {
            bail!("{} is not a multicast address", self.multicast_group);
        }
        if self.request_timeout.is_zero() {
            bail!("request timeout must be positive");
        }
        if self.receive_poll_timeout.is_zero() {
            bail!("receive poll timeout must be positive");
        }
        if self.max_datagram_size == 0 || self.max_datagram_size > MAX_DATAGRAM_SIZE {
            bail!("max datagram size must be between 1 and {}", MAX_DATAGRAM_SIZE);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_server_defaults_are_valid() {
        let config = ServerConfig::new(SocketAddr::from(([127, 0, 0, 1], 9876)));
        config.validate().unwrap();
        assert_eq!(config.poll_timeout, Duration::from_millis(100));
        assert_eq!(config.dispatch_workers, num_cpus::get().max(1));
        assert_eq!(config.multicast_addr(), SocketAddr::from(([230, 0, 0, 1], 4446)));
    }

    #[test]
    fn test_client_defaults_are_valid() {
        let config = ClientConfig::new(SocketAddr::from(([127, 0, 0, 1], 9876)));
        config.validate().unwrap();
        assert_eq!(config.request_timeout, Duration::from_secs(10));
    }

    #[rstest]
    #[case::unicast_group(|c: &mut ServerConfig| c.multicast_group = Ipv4Addr::new(10, 0, 0, 1))]
    #[case::no_dispatch_workers(|c: &mut ServerConfig| c.dispatch_workers = 0)]
    #[case::no_queue(|c: &mut ServerConfig| c.send_queue_capacity = 0)]
    #[case::zero_poll(|c: &mut ServerConfig| c.poll_timeout = Duration::ZERO)]
    #[case::huge_datagram(|c: &mut ServerConfig| c.max_datagram_size = MAX_DATAGRAM_SIZE + 1)]
    fn test_server_validate_rejects(#[case] tweak: fn(&mut ServerConfig)) {
        let mut config = ServerConfig::new(SocketAddr::from(([127, 0, 0, 1], 9876)));
        tweak(&mut config);
        assert!(config.validate().is_err());
    }
}
