//! Datagram transport seam.
//!
//! Stations never touch sockets directly; they hold a
//! [`DatagramTransport`].  [`UdpTransport`] is the production
//! implementation: one bound socket plus the fixed address of the other
//! station.
//!
//! # Contract
//!
//! * `send` – transmit one datagram to the peer.  Best effort; no
//!   acknowledgement or retry.
//! * `recv_timeout` – wait for one datagram.  Returns
//!   [`LinkError::Timeout`] when none arrived in time, which callers treat as
//!   an idle cycle.
//! * `try_recv` – take a datagram only if one is already queued.

use std::io::ErrorKind;
use std::net::SocketAddr;
use std::time::Duration;

use abyss_types::LinkError;
use async_trait::async_trait;
use tokio::net::UdpSocket;
use tracing::trace;

use crate::codec::RECV_BUFFER_SIZE;

/// One received datagram and its sender.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Datagram {
    pub payload: Vec<u8>,
    pub peer: SocketAddr,
}

/// A best-effort datagram link to a single peer.
#[async_trait]
pub trait DatagramTransport: Send + Sync {
    /// Send `payload` to the peer.  Returns the number of bytes written.
    async fn send(&self, payload: &[u8]) -> Result<usize, LinkError>;

    /// Wait up to `timeout` for the next datagram.
    async fn recv_timeout(&self, timeout: Duration) -> Result<Datagram, LinkError>;

    /// Return a queued datagram without waiting, or `Ok(None)`.
    fn try_recv(&self) -> Result<Option<Datagram>, LinkError>;
}

/// UDP implementation of [`DatagramTransport`].
#[derive(Debug)]
pub struct UdpTransport {
    socket: UdpSocket,
    peer: SocketAddr,
}

impl UdpTransport {
    /// Bind `local` and address all sends to `peer`.
    ///
    /// # Errors
    ///
    /// [`LinkError::Io`] when the socket cannot be bound.
    pub async fn bind(local: SocketAddr, peer: SocketAddr) -> Result<Self, LinkError> {
        let socket = UdpSocket::bind(local)
            .await
            .map_err(|e| LinkError::Io(format!("bind {local}: {e}")))?;
        Ok(Self { socket, peer })
    }

    /// The address the socket is actually bound to (useful with port 0).
    pub fn local_addr(&self) -> Result<SocketAddr, LinkError> {
        self.socket
            .local_addr()
            .map_err(|e| LinkError::Io(e.to_string()))
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Redirect subsequent sends.
    pub fn set_peer(&mut self, peer: SocketAddr) {
        self.peer = peer;
    }
}

#[async_trait]
impl DatagramTransport for UdpTransport {
    async fn send(&self, payload: &[u8]) -> Result<usize, LinkError> {
        self.socket
            .send_to(payload, self.peer)
            .await
            .map_err(|e| LinkError::Transmit(format!("send to {}: {e}", self.peer)))
    }

    async fn recv_timeout(&self, timeout: Duration) -> Result<Datagram, LinkError> {
        let mut buf = vec![0u8; RECV_BUFFER_SIZE];
        match tokio::time::timeout(timeout, self.socket.recv_from(&mut buf)).await {
            Err(_) => Err(LinkError::Timeout),
            Ok(Ok((n, peer))) => {
                buf.truncate(n);
                trace!(size = n, %peer, "datagram received");
                Ok(Datagram { payload: buf, peer })
            }
            Ok(Err(e)) => Err(LinkError::Io(format!("recv: {e}"))),
        }
    }

    fn try_recv(&self) -> Result<Option<Datagram>, LinkError> {
        let mut buf = vec![0u8; RECV_BUFFER_SIZE];
        match self.socket.try_recv_from(&mut buf) {
            Ok((n, peer)) => {
                buf.truncate(n);
                Ok(Some(Datagram { payload: buf, peer }))
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(LinkError::Io(format!("recv: {e}"))),
        }
    }
}
