use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use async_trait::async_trait;
#[cfg(test)] use mockall::automock;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tracing::{debug, trace};


/// This is an abstraction for sending a datagram, introduced to facilitate mocking the I/O part
///  away for testing. Failures are returned rather than logged so the caller can attribute them
///  to the request they belong to.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait DatagramSender: Send + Sync + 'static {
    async fn send_datagram(&self, to: SocketAddr, datagram: &[u8]) -> std::io::Result<()>;
}

#[async_trait]
impl DatagramSender for UdpSocket {
    async fn send_datagram(&self, to: SocketAddr, datagram: &[u8]) -> std::io::Result<()> {
        trace!("UDP socket: sending {} bytes to {:?}", datagram.len(), to);
        let sent = self.send_to(datagram, to).await?;
        if sent != datagram.len() {
            return Err(std::io::Error::new(std::io::ErrorKind::WriteZero, format!("sent only {} of {} bytes", sent, datagram.len())));
        }
        Ok(())
    }
}

/// The server side of the broadcast channel: an unbound send-only socket with multicast options
///  set. It is never joined to the group.
pub fn bind_multicast_sender(ttl: u32, multicast_loop: bool) -> anyhow::Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_multicast_ttl_v4(ttl)?;
    socket.set_multicast_loop_v4(multicast_loop)?;
    socket.bind(&SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)).into())?;
    socket.set_nonblocking(true)?;

    let socket = UdpSocket::from_std(socket.into())?;
    debug!("multicast sender socket bound to {:?}", socket.local_addr()?);
    Ok(socket)
}

/// The client side of the broadcast channel. Several listeners on the same host share the port,
///  so the address is marked reusable before binding.
pub fn bind_multicast_listener(group: Ipv4Addr, port: u16, interface: Ipv4Addr) -> anyhow::Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    socket.bind(&SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port)).into())?;
    socket.join_multicast_v4(&group, &interface)?;
    socket.set_nonblocking(true)?;

    debug!("joined multicast group {}:{} on interface {}", group, port, interface);
    Ok(UdpSocket::from_std(socket.into())?)
}
