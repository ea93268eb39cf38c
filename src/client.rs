use std::sync::{Arc, Mutex, PoisonError};

use crate::common::{EmitError, TransmitError};
use crate::connection::{Connect, ConnectionManager, Transport, UdpConnector};
use crate::formatting::write_metric_line;

use tracing::{debug, error, trace};

pub(crate) struct Inner<C: Connect = UdpConnector> {
    pub host: String,
    pub port: String,
    pub prefix: String,
    pub suffix: String,
    pub max_packet_size: usize,
    pub connection: Mutex<ConnectionManager<C>>,
}

impl<C: Connect> Inner<C> {
    fn emit(&self, key: Option<&str>, value: Option<i64>, mtype: &str) -> Result<(), EmitError> {
        // Keys and values read out of host context can be absent, e.g. a
        // request header that was never set. Nothing sensible can be
        // formatted from them.
        let (key, value) = match (key, value) {
            (Some(key), Some(value)) => (key, value),
            _ => {
                debug!("metric key or value is missing, dropping metric");
                return Err(EmitError::MissingInput);
            }
        };

        let mut line = String::with_capacity(
            self.prefix.len() + key.len() + self.suffix.len() + 24,
        );
        write_metric_line(&mut line, &self.prefix, key, &self.suffix, value, mtype);

        trace!(key, line = line.as_str(), "emitting metric");

        // One byte of the packet budget is reserved, so a line of
        // max_packet_size - 1 bytes is already too long. Oversized lines
        // are refused outright, never truncated.
        if line.len() + 1 >= self.max_packet_size {
            debug!(
                key,
                length = line.len(),
                limit = self.max_packet_size,
                "metric line too long, dropping metric"
            );
            return Err(EmitError::LineTooLong {
                length: line.len(),
                limit: self.max_packet_size,
            });
        }

        let mut connection = self
            .connection
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let send_result = match connection.ensure_connected(&self.host, &self.port) {
            Ok(transport) => transport.send(line.as_bytes()),
            Err(err) => {
                error!(key, error = %err, "could not get socket, dropping metric");
                return Err(err);
            }
        };

        let expected = line.len();
        let send_result = match send_result {
            Ok(sent) if sent == expected => Ok(sent),
            Ok(sent) => Err(TransmitError::Partial { sent, expected }),
            Err(err) => Err(err),
        };

        match send_result {
            Ok(sent) => {
                trace!(key, bytes = sent, "metric sent");
                Ok(())
            }
            Err(err) => {
                error!(key, error = %err, "could not write metric, resetting socket");
                // The next emission redials from scratch; no re-send is
                // attempted for this one.
                connection.invalidate(err.is_stale_handle());
                Err(EmitError::Transmission(err))
            }
        }
    }
}

/// Client for emitting metrics to a statsd daemon over UDP.
///
/// The client owns a single lazily-connected socket, shared by clones. Keys
/// and values are taken as `Option`s because hosts typically read them out
/// of request context where they may be absent; an absent input drops the
/// metric and reports [`EmitError::MissingInput`].
///
/// Emission is fire-and-forget: success means the datagram was handed to
/// the kernel, not that the daemon received it.
#[derive(Clone)]
pub struct StatsdClient {
    inner: Arc<Inner>,
}

impl StatsdClient {
    /// Creates a builder for configuring a client.
    pub fn builder() -> crate::StatsdBuilder {
        crate::StatsdBuilder::new()
    }

    /// Increments the counter `key` by one.
    pub fn increment(&self, key: Option<&str>) -> Result<(), EmitError> {
        self.inner.emit(key, Some(1), "c")
    }

    /// Records `millis` milliseconds against the timer `key`.
    pub fn timing(&self, key: Option<&str>, millis: Option<i64>) -> Result<(), EmitError> {
        self.inner.emit(key, millis, "ms")
    }

    /// Adds `delta` to the counter `key`.
    pub fn counter(&self, key: Option<&str>, delta: Option<i64>) -> Result<(), EmitError> {
        self.inner.emit(key, delta, "c")
    }

    /// Sets the gauge `key` to `value`.
    pub fn gauge(&self, key: Option<&str>, value: Option<i64>) -> Result<(), EmitError> {
        self.inner.emit(key, value, "g")
    }
}

impl From<Inner> for StatsdClient {
    fn from(inner: Inner) -> Self {
        StatsdClient {
            inner: Arc::new(inner),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Inner;
    use crate::common::{EmitError, TransmitError};
    use crate::connection::{Connect, ConnectionManager, Transport};
    use crate::StatsdBuilder;

    use std::collections::VecDeque;
    use std::io;
    use std::net::UdpSocket;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    #[derive(Default)]
    struct MockState {
        sent: Vec<String>,
        send_results: VecDeque<Result<usize, TransmitError>>,
        connects: usize,
        connect_fails: bool,
        closed: Vec<bool>,
    }

    struct MockConnector(Arc<Mutex<MockState>>);

    struct MockTransport(Arc<Mutex<MockState>>);

    impl Connect for MockConnector {
        type Transport = MockTransport;

        fn connect(&self, _host: &str, _port: &str) -> Result<MockTransport, EmitError> {
            let mut state = self.0.lock().unwrap();
            if state.connect_fails {
                return Err(EmitError::SocketCreation(io::Error::new(
                    io::ErrorKind::PermissionDenied,
                    "socket creation refused",
                )));
            }
            state.connects += 1;
            Ok(MockTransport(self.0.clone()))
        }
    }

    impl Transport for MockTransport {
        fn send(&mut self, payload: &[u8]) -> Result<usize, TransmitError> {
            let mut state = self.0.lock().unwrap();
            state
                .sent
                .push(String::from_utf8(payload.to_vec()).unwrap());
            match state.send_results.pop_front() {
                Some(result) => result,
                None => Ok(payload.len()),
            }
        }

        fn close(self, stale: bool) -> io::Result<()> {
            self.0.lock().unwrap().closed.push(stale);
            Ok(())
        }
    }

    fn mock_client(prefix: &str, suffix: &str) -> (Inner<MockConnector>, Arc<Mutex<MockState>>) {
        let state = Arc::new(Mutex::new(MockState::default()));
        let inner = Inner {
            host: "localhost".to_string(),
            port: "8125".to_string(),
            prefix: prefix.to_string(),
            suffix: suffix.to_string(),
            max_packet_size: 500,
            connection: Mutex::new(ConnectionManager::new(MockConnector(state.clone()))),
        };
        (inner, state)
    }

    #[test]
    fn test_increment_payload() {
        let (client, state) = mock_client("", "");
        client.emit(Some("hits"), Some(1), "c").unwrap();
        assert_eq!(state.lock().unwrap().sent, ["hits:1|c"]);
    }

    #[test]
    fn test_affixes_applied() {
        let (client, state) = mock_client("web.", ".prod");
        client.emit(Some("mem"), Some(333), "g").unwrap();
        assert_eq!(state.lock().unwrap().sent, ["web.mem.prod:333|g"]);
    }

    #[test]
    fn test_missing_key_sends_nothing() {
        let (client, state) = mock_client("", "");
        let err = client.emit(None, Some(1), "c").unwrap_err();
        assert!(matches!(err, EmitError::MissingInput));

        let state = state.lock().unwrap();
        assert!(state.sent.is_empty());
        // not even a connect should be attempted
        assert_eq!(state.connects, 0);
    }

    #[test]
    fn test_missing_value_sends_nothing() {
        let (client, state) = mock_client("", "");
        let err = client.emit(Some("hits"), None, "c").unwrap_err();
        assert!(matches!(err, EmitError::MissingInput));
        assert!(state.lock().unwrap().sent.is_empty());
    }

    #[test]
    fn test_oversized_line_refused() {
        let (client, state) = mock_client("", "");

        // formatted line is key + ":1|c" (4 bytes); 495 + 4 = 499, which
        // eats into the reserved byte of the 500 byte budget
        let key = "k".repeat(495);
        let err = client.emit(Some(&key), Some(1), "c").unwrap_err();
        assert!(matches!(err, EmitError::LineTooLong { length: 499, .. }));
        assert!(state.lock().unwrap().sent.is_empty());

        // one byte shorter fits
        let key = "k".repeat(494);
        client.emit(Some(&key), Some(1), "c").unwrap();
        assert_eq!(state.lock().unwrap().sent.len(), 1);
    }

    #[test]
    fn test_connection_reused_across_emissions() {
        let (client, state) = mock_client("", "");
        client.emit(Some("a"), Some(1), "c").unwrap();
        client.emit(Some("b"), Some(2), "c").unwrap();
        client.emit(Some("c"), Some(3), "c").unwrap();

        let state = state.lock().unwrap();
        assert_eq!(state.connects, 1);
        assert_eq!(state.sent.len(), 3);
    }

    #[test]
    fn test_send_failure_invalidates_and_reconnects() {
        let (client, state) = mock_client("", "");
        state.lock().unwrap().send_results.push_back(Err(
            TransmitError::Io(io::Error::new(io::ErrorKind::Other, "send failed")),
        ));

        let err = client.emit(Some("hits"), Some(1), "c").unwrap_err();
        assert!(matches!(err, EmitError::Transmission(_)));
        {
            let state = state.lock().unwrap();
            assert_eq!(state.connects, 1);
            // closed normally, not as a stale handle
            assert_eq!(state.closed, [false]);
        }

        // next emission dials a fresh connection and succeeds
        client.emit(Some("hits"), Some(1), "c").unwrap();
        let state = state.lock().unwrap();
        assert_eq!(state.connects, 2);
        assert_eq!(state.sent.len(), 2);
    }

    #[test]
    fn test_short_write_is_a_failure() {
        let (client, state) = mock_client("", "");
        state.lock().unwrap().send_results.push_back(Ok(3));

        let err = client.emit(Some("hits"), Some(1), "c").unwrap_err();
        match err {
            EmitError::Transmission(TransmitError::Partial { sent, expected }) => {
                assert_eq!(sent, 3);
                assert_eq!(expected, 8);
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(state.lock().unwrap().closed, [false]);
    }

    #[test]
    fn test_stale_handle_skips_close() {
        let (client, state) = mock_client("", "");
        state.lock().unwrap().send_results.push_back(Err(
            TransmitError::StaleHandle(io::Error::from_raw_os_error(9)),
        ));

        let err = client.emit(Some("hits"), Some(1), "c").unwrap_err();
        assert!(matches!(err, EmitError::Transmission(_)));
        assert_eq!(state.lock().unwrap().closed, [true]);
    }

    #[test]
    fn test_connect_failure_drops_metric() {
        let (client, state) = mock_client("", "");
        state.lock().unwrap().connect_fails = true;

        let err = client.emit(Some("hits"), Some(1), "c").unwrap_err();
        assert!(matches!(err, EmitError::SocketCreation(_)));
        {
            let state = state.lock().unwrap();
            assert!(state.sent.is_empty());
            assert_eq!(state.connects, 0);
        }
        assert!(!client.connection.lock().unwrap().is_connected());
    }

    fn udp_receiver() -> (UdpSocket, String) {
        let receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
        receiver
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        let port = receiver.local_addr().unwrap().port().to_string();
        (receiver, port)
    }

    fn recv_payload(receiver: &UdpSocket) -> String {
        let mut buf = [0u8; 512];
        let received = receiver.recv(&mut buf).unwrap();
        String::from_utf8(buf[..received].to_vec()).unwrap()
    }

    #[test]
    fn test_increment_over_udp() {
        let (receiver, port) = udp_receiver();
        let client = StatsdBuilder::new()
            .set_destination("127.0.0.1", port)
            .build();

        client.increment(Some("hits")).unwrap();
        assert_eq!(recv_payload(&receiver), "hits:1|c");
    }

    #[test]
    fn test_gauge_with_prefix_over_udp() {
        let (receiver, port) = udp_receiver();
        let client = StatsdBuilder::new()
            .set_destination("127.0.0.1", port)
            .set_prefix("web.")
            .build();

        client.gauge(Some("mem"), Some(333)).unwrap();
        assert_eq!(recv_payload(&receiver), "web.mem:333|g");
    }

    #[test]
    fn test_timing_over_udp() {
        let (receiver, port) = udp_receiver();
        let client = StatsdBuilder::new()
            .set_destination("127.0.0.1", port)
            .build();

        client.timing(Some("latency"), Some(320)).unwrap();
        assert_eq!(recv_payload(&receiver), "latency:320|ms");
    }

    #[test]
    fn test_counter_over_udp() {
        let (receiver, port) = udp_receiver();
        let client = StatsdBuilder::new()
            .set_destination("127.0.0.1", port)
            .build();

        client.counter(Some("bytes"), Some(4096)).unwrap();
        assert_eq!(recv_payload(&receiver), "bytes:4096|c");
    }

    #[test]
    fn test_stripped_prefix_round_trip() {
        let (receiver, port) = udp_receiver();
        let client = StatsdBuilder::new()
            .set_destination("127.0.0.1", port)
            .set_prefix("app.\n")
            .build();

        client.increment(Some("hits")).unwrap();
        assert_eq!(recv_payload(&receiver), "app.hits:1|c");
    }

    #[test]
    fn test_unresolvable_destination() {
        let client = StatsdBuilder::new()
            .set_destination("localhost", "not-a-port")
            .build();

        let err = client.increment(Some("hits")).unwrap_err();
        assert!(matches!(err, EmitError::Resolution { .. }));

        // the failure must not stick a half-made connection in the client
        assert!(!client.inner.connection.lock().unwrap().is_connected());
    }

    #[test]
    fn test_clones_share_connection() {
        let (receiver, port) = udp_receiver();
        let client = StatsdBuilder::new()
            .set_destination("127.0.0.1", port)
            .build();

        let clone = client.clone();
        client.increment(Some("a")).unwrap();
        clone.increment(Some("b")).unwrap();

        assert_eq!(recv_payload(&receiver), "a:1|c");
        assert_eq!(recv_payload(&receiver), "b:1|c");
    }
}
