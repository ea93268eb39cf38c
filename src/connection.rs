use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, ToSocketAddrs, UdpSocket};

#[cfg(unix)]
use std::os::unix::io::IntoRawFd;

use tracing::{debug, error};

use crate::common::{EmitError, TransmitError};

/// A single-destination datagram transport.
///
/// The production implementation is [`UdpTransport`]; tests substitute a
/// scripted transport to exercise the failure paths without a network.
pub(crate) trait Transport {
    /// Writes the whole payload in one operation, returning the number of
    /// bytes the kernel accepted. Failures come back tagged so the caller
    /// knows whether the handle can still be closed.
    fn send(&mut self, payload: &[u8]) -> Result<usize, TransmitError>;

    /// Releases the underlying handle. With `stale` set the handle was
    /// already closed elsewhere and must not be closed a second time.
    fn close(self, stale: bool) -> io::Result<()>;
}

/// Factory for [`Transport`]s, invoked on every (re)connect.
pub(crate) trait Connect {
    type Transport: Transport;

    fn connect(&self, host: &str, port: &str) -> Result<Self::Transport, EmitError>;
}

/// Resolves a host/port pair to one concrete datagram destination.
///
/// Resolution may return several candidate addresses, but since this is UDP
/// there is no way to verify a connection anyway, so the first candidate is
/// always used and no fallback is attempted.
pub(crate) fn resolve(host: &str, port: &str) -> Result<SocketAddr, EmitError> {
    let resolution_error = |source| EmitError::Resolution {
        host: host.to_string(),
        port: port.to_string(),
        source,
    };

    format!("{}:{}", host, port)
        .to_socket_addrs()
        .map_err(resolution_error)?
        .next()
        .ok_or_else(|| {
            resolution_error(io::Error::new(
                io::ErrorKind::Other,
                "resolution returned no addresses",
            ))
        })
}

/// A UDP socket pinned to a single destination.
pub(crate) struct UdpTransport {
    socket: UdpSocket,
}

impl UdpTransport {
    /// Creates a socket and sets `addr` as its default send destination.
    /// "Connecting" a datagram socket performs no handshake; it only binds
    /// the destination for subsequent `send` calls.
    pub(crate) fn connect(addr: SocketAddr) -> Result<UdpTransport, EmitError> {
        let bind_addr: SocketAddr = if addr.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };

        let socket = UdpSocket::bind(bind_addr).map_err(EmitError::SocketCreation)?;
        socket.connect(addr).map_err(EmitError::SocketCreation)?;

        Ok(UdpTransport { socket })
    }
}

impl Transport for UdpTransport {
    fn send(&mut self, payload: &[u8]) -> Result<usize, TransmitError> {
        self.socket.send(payload).map_err(TransmitError::classify)
    }

    fn close(self, stale: bool) -> io::Result<()> {
        if stale {
            // The descriptor was closed out from under us. Dropping the
            // socket would close whatever descriptor now occupies that
            // slot, so leak the stale number instead.
            #[cfg(unix)]
            {
                let _ = self.socket.into_raw_fd();
            }
            return Ok(());
        }

        drop(self.socket);
        Ok(())
    }
}

/// Connects [`UdpTransport`]s for the configured destination.
pub(crate) struct UdpConnector;

impl Connect for UdpConnector {
    type Transport = UdpTransport;

    fn connect(&self, host: &str, port: &str) -> Result<UdpTransport, EmitError> {
        let addr = resolve(host, port)?;
        UdpTransport::connect(addr)
    }
}

/// Owns the lazily-established transport to the metrics daemon.
///
/// The transport is dialed on first use and reused across emissions until a
/// send failure invalidates it; the next emission after that redials from
/// scratch, resolution included.
pub(crate) struct ConnectionManager<C: Connect> {
    connector: C,
    transport: Option<C::Transport>,
}

impl<C: Connect> ConnectionManager<C> {
    pub(crate) fn new(connector: C) -> ConnectionManager<C> {
        ConnectionManager {
            connector,
            transport: None,
        }
    }

    /// Returns the live transport, dialing the destination if there is none.
    /// On a dial failure the manager stays disconnected and the current
    /// emission is aborted by the caller.
    pub(crate) fn ensure_connected(
        &mut self,
        host: &str,
        port: &str,
    ) -> Result<&mut C::Transport, EmitError> {
        let transport = match self.transport.take() {
            Some(transport) => transport,
            None => {
                let transport = self.connector.connect(host, port)?;
                debug!(host, port, "connected to metrics daemon");
                transport
            }
        };

        Ok(self.transport.insert(transport))
    }

    /// Drops the current transport, if any, so the next emission redials.
    /// Close failures are reported but never block invalidation.
    pub(crate) fn invalidate(&mut self, stale: bool) {
        if let Some(transport) = self.transport.take() {
            if let Err(err) = transport.close(stale) {
                let err = EmitError::Close(err);
                error!(error = %err, "error closing metrics socket");
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn is_connected(&self) -> bool {
        self.transport.is_some()
    }
}

impl<C: Connect> Drop for ConnectionManager<C> {
    fn drop(&mut self) {
        self.invalidate(false);
    }
}
