use std::sync::Mutex;

use crate::client::{Inner, StatsdClient};
use crate::common::{DEFAULT_HOST, DEFAULT_MAX_PACKET_SIZE, DEFAULT_PORT};
use crate::connection::{ConnectionManager, UdpConnector};
use crate::formatting::strip_newline;

/// Builder for creating a [`StatsdClient`].
///
/// The builder is the only mutation window for the client configuration:
/// hosts are expected to configure destination and key affixes during their
/// own initialization phase, before any metric is emitted, and [`build`]
/// closes that window for good.
///
/// [`build`]: StatsdBuilder::build
pub struct StatsdBuilder {
    host: String,
    port: String,
    prefix: String,
    suffix: String,
    max_packet_size: usize,
}

impl StatsdBuilder {
    /// Creates a new [`StatsdBuilder`] targeting `localhost:8125` with empty
    /// key affixes.
    pub fn new() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT.to_string(),
            prefix: String::new(),
            suffix: String::new(),
            max_packet_size: DEFAULT_MAX_PACKET_SIZE,
        }
    }

    /// Points the client at a metrics daemon other than the default
    /// `localhost:8125`.
    ///
    /// The port is kept as a string and handed to name resolution together
    /// with the host, so service names work as well as numeric ports.
    #[must_use]
    pub fn set_destination<H, P>(mut self, host: H, port: P) -> Self
    where
        H: Into<String>,
        P: Into<String>,
    {
        self.host = host.into();
        self.port = port.into();
        self
    }

    /// Sets the text prepended to every metric key.
    ///
    /// The stored value is truncated at the first line terminator; see
    /// [`strip_newline`](crate::formatting::strip_newline) for why.
    #[must_use]
    pub fn set_prefix<P>(mut self, prefix: P) -> Self
    where
        P: Into<String>,
    {
        let mut prefix = prefix.into();
        let stripped = strip_newline(&prefix).len();
        prefix.truncate(stripped);
        self.prefix = prefix;
        self
    }

    /// Sets the text appended to every metric key, before the value. Same
    /// line-terminator handling as [`set_prefix`](StatsdBuilder::set_prefix).
    #[must_use]
    pub fn set_suffix<S>(mut self, suffix: S) -> Self
    where
        S: Into<String>,
    {
        let mut suffix = suffix.into();
        let stripped = strip_newline(&suffix).len();
        suffix.truncate(stripped);
        self.suffix = suffix;
        self
    }

    /// Sets the packet budget for a single metric line.
    ///
    /// Defaults to 500 bytes. One byte of the budget is reserved, so
    /// formatted lines of `size - 1` bytes or more are refused rather than
    /// truncated.
    #[must_use]
    pub fn set_max_packet_size(mut self, size: usize) -> Self {
        self.max_packet_size = size;
        self
    }

    /// Builds the client. No connection is established yet; the destination
    /// is resolved and dialed lazily on the first emission.
    pub fn build(self) -> StatsdClient {
        let inner = Inner {
            host: self.host,
            port: self.port,
            prefix: self.prefix,
            suffix: self.suffix,
            max_packet_size: self.max_packet_size,
            connection: Mutex::new(ConnectionManager::new(UdpConnector)),
        };

        StatsdClient::from(inner)
    }
}

impl Default for StatsdBuilder {
    fn default() -> Self {
        StatsdBuilder::new()
    }
}
