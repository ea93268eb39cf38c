use std::io;

use thiserror::Error;

/// Default metrics daemon host.
pub const DEFAULT_HOST: &str = "localhost";

/// Default metrics daemon port, as a string so that hosts can hand it over
/// unparsed from their own configuration language.
pub const DEFAULT_PORT: &str = "8125";

/// Default size of the transmission budget for a single metric line.
///
/// One byte of the budget is reserved, so formatted lines of
/// `DEFAULT_MAX_PACKET_SIZE - 1` bytes or more are refused rather than
/// truncated.
pub const DEFAULT_MAX_PACKET_SIZE: usize = 500;

/// Errors that can occur while emitting a single metric.
///
/// Emission is best-effort: every variant means the metric was dropped, and
/// none of them should ever abort the host process. Callers that don't care
/// about individual failures can ignore the result; diagnostics are also
/// reported through `tracing`.
#[derive(Debug, Error)]
pub enum EmitError {
    /// The metric key or value was absent.
    ///
    /// This happens when the caller reads the key or value out of host
    /// context that was never populated, e.g. a request header that isn't
    /// set on this particular request.
    #[error("metric key or value is missing")]
    MissingInput,

    /// The formatted metric line reached the packet budget.
    #[error("metric line is {length} bytes, limit is {limit}")]
    LineTooLong { length: usize, limit: usize },

    /// Name resolution for the configured destination failed.
    #[error("failed to resolve {host}:{port}")]
    Resolution {
        host: String,
        port: String,
        #[source]
        source: io::Error,
    },

    /// The local datagram socket could not be created or bound to the
    /// resolved destination.
    #[error("failed to create datagram socket")]
    SocketCreation(#[source] io::Error),

    /// The write did not send the full metric line. The connection has been
    /// invalidated; the next emission dials a fresh one.
    #[error("failed to transmit metric")]
    Transmission(#[source] TransmitError),

    /// Closing a socket failed. Logged and non-fatal; invalidation and
    /// teardown proceed regardless.
    #[error("failed to close metrics socket")]
    Close(#[source] io::Error),
}

/// Classification of a failed datagram write.
///
/// The transmission primitive tags its failures so the connection manager
/// can decide how to tear the handle down: a handle that is already invalid
/// must not be closed a second time.
#[derive(Debug, Error)]
pub enum TransmitError {
    /// The socket handle was already closed out from under us. Invalidation
    /// skips the close attempt for this case.
    #[error("socket handle is no longer valid")]
    StaleHandle(#[source] io::Error),

    /// The kernel accepted fewer bytes than the full metric line.
    #[error("short write: sent {sent} of {expected} bytes")]
    Partial { sent: usize, expected: usize },

    /// Any other write error.
    #[error(transparent)]
    Io(io::Error),
}

impl TransmitError {
    /// Tags an I/O error from a datagram write. EBADF means the descriptor
    /// was closed elsewhere.
    pub(crate) fn classify(err: io::Error) -> Self {
        if err.raw_os_error() == Some(EBADF) {
            TransmitError::StaleHandle(err)
        } else {
            TransmitError::Io(err)
        }
    }

    /// Whether the underlying handle is already invalid and must not be
    /// closed again.
    pub fn is_stale_handle(&self) -> bool {
        matches!(self, TransmitError::StaleHandle(_))
    }
}

const EBADF: i32 = 9;
