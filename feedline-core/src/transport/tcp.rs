//! Newline-delimited JSON feed over TCP
//!
//! Protocol:
//! - client sends one line: `{"type":"subscribe","kind":..,"filters":..,"token":..}`
//! - server replies with one frame per line:
//!   `{"type":"data","payload":..}`, `{"type":"ping"}`,
//!   `{"type":"error","code":N,"message":".."}` or `{"type":"end"}`
//!
//! EOF without an `end` frame is a dropped connection (retryable). A line
//! that does not decode, or runs past `max_frame_len` bytes, is reported as
//! `Internal`, which classifies fatal.

use super::{boxed_stream, BoxSubscriptionStream, Transport};
use crate::core::{
    Endpoint, Message, StatusCode, SubscriptionKind, SubscriptionParams, TransportError,
};
use async_trait::async_trait;
use futures::{stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::io;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};
use tracing::{debug, trace};

/// Longest accepted server frame, newline excluded
pub const DEFAULT_MAX_FRAME_LEN: usize = 8 * 1024 * 1024;

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientFrame<'a> {
    Subscribe {
        kind: SubscriptionKind,
        filters: &'a serde_json::Value,
        #[serde(skip_serializing_if = "Option::is_none")]
        token: Option<&'a str>,
    },
}

#[derive(Debug, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ServerFrame {
    Data { payload: serde_json::Value },
    Ping,
    Error { code: u32, message: String },
    End,
}

fn decode_frame(line: &str) -> Result<ServerFrame, TransportError> {
    serde_json::from_str(line).map_err(|err| {
        TransportError::new(StatusCode::Internal, format!("malformed frame: {}", err))
    })
}

/// Every failure before the first frame (resolve, connect, subscribe
/// write) counts as the endpoint being unreachable
fn connect_failure(address: &str, err: io::Error) -> TransportError {
    let code = match err.kind() {
        io::ErrorKind::TimedOut => StatusCode::DeadlineExceeded,
        _ => StatusCode::Unavailable,
    };
    TransportError::new(code, format!("{}: {}", address, err))
}

pub struct TcpTransport {
    connect_timeout: Duration,
    max_frame_len: usize,
}

impl TcpTransport {
    pub fn new(connect_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }

    pub fn with_max_frame_len(mut self, max_frame_len: usize) -> Self {
        self.max_frame_len = max_frame_len;
        self
    }
}

impl Default for TcpTransport {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

struct Connection {
    frames: FramedRead<OwnedReadHalf, LinesCodec>,
    max_frame_len: usize,
    // Dropping the write half would half-close the socket
    _writer: OwnedWriteHalf,
}

#[async_trait]
impl Transport for TcpTransport {
    fn name(&self) -> &'static str {
        "tcp"
    }

    async fn open(
        &self,
        endpoint: &Endpoint,
        params: &SubscriptionParams,
    ) -> Result<BoxSubscriptionStream, TransportError> {
        if !endpoint.insecure {
            return Err(TransportError::new(
                StatusCode::FailedPrecondition,
                "tcp transport is plaintext only, set insecure = true or terminate TLS in a proxy",
            ));
        }

        let address = endpoint
            .address
            .strip_prefix("tcp://")
            .unwrap_or(&endpoint.address);

        let socket = tokio::time::timeout(self.connect_timeout, TcpStream::connect(address))
            .await
            .map_err(|_| {
                TransportError::new(
                    StatusCode::DeadlineExceeded,
                    format!("connect to {} timed out after {:?}", address, self.connect_timeout),
                )
            })?
            .map_err(|err| connect_failure(address, err))?;
        socket
            .set_nodelay(true)
            .map_err(|err| connect_failure(address, err))?;
        debug!(address, "tcp connection established");

        let (reader, mut writer) = socket.into_split();

        let request = ClientFrame::Subscribe {
            kind: params.kind,
            filters: &params.filters,
            token: endpoint.credentials.as_token(),
        };
        let mut line = serde_json::to_string(&request).map_err(|err| {
            TransportError::invalid_argument(format!("cannot encode subscribe request: {}", err))
        })?;
        line.push('\n');
        writer
            .write_all(line.as_bytes())
            .await
            .map_err(|err| connect_failure(address, err))?;
        writer
            .flush()
            .await
            .map_err(|err| connect_failure(address, err))?;

        let connection = Connection {
            frames: FramedRead::new(reader, LinesCodec::new_with_max_length(self.max_frame_len)),
            max_frame_len: self.max_frame_len,
            _writer: writer,
        };

        Ok(boxed_stream(stream::unfold(Some(connection), read_frame)))
    }
}

/// Read until the next data frame or terminal condition
async fn read_frame(
    state: Option<Connection>,
) -> Option<(Result<Message, TransportError>, Option<Connection>)> {
    let mut connection = state?;

    loop {
        let line = match connection.frames.next().await {
            Some(Ok(line)) => line,
            None => {
                let err = TransportError::unavailable("connection closed by remote without end frame");
                return Some((Err(err), None));
            }
            Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                let err = TransportError::new(
                    StatusCode::Internal,
                    format!("frame longer than {} bytes", connection.max_frame_len),
                );
                return Some((Err(err), None));
            }
            Some(Err(LinesCodecError::Io(err))) => return Some((Err(err.into()), None)),
        };

        if line.trim().is_empty() {
            continue;
        }

        match decode_frame(&line) {
            Ok(ServerFrame::Data { payload }) => {
                return Some((Ok(Message::new(payload)), Some(connection)))
            }
            Ok(ServerFrame::Ping) => trace!("keepalive"),
            Ok(ServerFrame::Error { code, message }) => {
                let err = TransportError::new(StatusCode::from_code(code), message);
                return Some((Err(err), None));
            }
            Ok(ServerFrame::End) => return None,
            Err(err) => return Some((Err(err), None)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Credentials;
    use futures::StreamExt;
    use serde_json::json;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    fn endpoint(address: String) -> Endpoint {
        Endpoint {
            address,
            credentials: Credentials::token("abc"),
            insecure: true,
        }
    }

    #[test]
    fn test_decode_frames() {
        assert_eq!(
            decode_frame(r#"{"type":"data","payload":{"slot":5}}"#).unwrap(),
            ServerFrame::Data {
                payload: json!({"slot": 5})
            }
        );
        assert_eq!(decode_frame(r#"{"type":"ping"}"#).unwrap(), ServerFrame::Ping);
        assert_eq!(decode_frame(r#"{"type":"end"}"#).unwrap(), ServerFrame::End);
        assert_eq!(
            decode_frame(r#"{"type":"error","code":14,"message":"draining"}"#).unwrap(),
            ServerFrame::Error {
                code: 14,
                message: "draining".to_string()
            }
        );
    }

    #[test]
    fn test_malformed_frame_is_fatal() {
        let err = decode_frame("{not json").unwrap_err();
        assert_eq!(err.code, StatusCode::Internal);
        assert!(!err.class().is_retryable());
    }

    #[test]
    fn test_subscribe_request_encoding() {
        let filters = json!({"account": ["abc"]});
        let request = ClientFrame::Subscribe {
            kind: SubscriptionKind::Accounts,
            filters: &filters,
            token: None,
        };
        let encoded: serde_json::Value =
            serde_json::from_str(&serde_json::to_string(&request).unwrap()).unwrap();
        assert_eq!(
            encoded,
            json!({"type": "subscribe", "kind": "accounts", "filters": {"account": ["abc"]}})
        );
    }

    #[tokio::test]
    async fn test_secure_endpoint_rejected() {
        let mut endpoint = endpoint("127.0.0.1:1".to_string());
        endpoint.insecure = false;
        let err = TcpTransport::default()
            .open(&endpoint, &SubscriptionParams::new(SubscriptionKind::Slots))
            .await
            .err()
            .unwrap();
        assert_eq!(err.code, StatusCode::FailedPrecondition);
    }

    #[tokio::test]
    async fn test_refused_connection_is_retryable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        drop(listener);

        let err = TcpTransport::default()
            .open(&endpoint(address), &SubscriptionParams::new(SubscriptionKind::Slots))
            .await
            .err()
            .unwrap();
        assert!(err.class().is_retryable(), "{}", err);
    }

    #[tokio::test]
    async fn test_unresolvable_host_is_retryable() {
        let err = TcpTransport::new(Duration::from_secs(2))
            .open(
                &endpoint("feedline.invalid:9000".to_string()),
                &SubscriptionParams::new(SubscriptionKind::Slots),
            )
            .await
            .err()
            .unwrap();
        assert!(err.class().is_retryable(), "{}", err);
        assert!(err.message.contains("feedline.invalid"), "{}", err);
    }

    #[test]
    fn test_connect_failure_mapping() {
        let unreachable = io::Error::new(io::ErrorKind::Other, "no usable address");
        let err = connect_failure("feed:1", unreachable);
        assert_eq!(err.code, StatusCode::Unavailable);
        assert_eq!(err.message, "feed:1: no usable address");

        let slow = io::Error::new(io::ErrorKind::TimedOut, "slow");
        assert_eq!(
            connect_failure("feed:1", slow).code,
            StatusCode::DeadlineExceeded
        );
    }

    #[tokio::test]
    async fn test_oversized_frame_is_fatal() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 1024];
            socket.read(&mut buf).await.unwrap();

            let mut frame = b"{\"type\":\"data\",\"payload\":\"".to_vec();
            frame.extend(std::iter::repeat(b'x').take(256));
            frame.extend_from_slice(b"\"}\n");
            socket.write_all(&frame).await.unwrap();
            socket
        });

        let mut stream = TcpTransport::default()
            .with_max_frame_len(64)
            .open(&endpoint(address), &SubscriptionParams::new(SubscriptionKind::Slots))
            .await
            .unwrap();

        let err = stream.next().await.unwrap().unwrap_err();
        assert_eq!(err.code, StatusCode::Internal);
        assert!(!err.class().is_retryable());
        assert!(stream.next().await.is_none());
        drop(server.await.unwrap());
    }

    #[tokio::test]
    async fn test_stream_against_local_server() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = format!("tcp://{}", listener.local_addr().unwrap());

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 1024];
            let n = socket.read(&mut buf).await.unwrap();
            let request: serde_json::Value = serde_json::from_slice(&buf[..n]).unwrap();

            socket
                .write_all(
                    b"{\"type\":\"data\",\"payload\":1}\n\
                      {\"type\":\"ping\"}\n\
                      \n\
                      {\"type\":\"data\",\"payload\":2}\n\
                      {\"type\":\"error\",\"code\":16,\"message\":\"token expired\"}\n",
                )
                .await
                .unwrap();
            request
        });

        let mut stream = TcpTransport::default()
            .open(&endpoint(address), &SubscriptionParams::new(SubscriptionKind::Blocks))
            .await
            .unwrap();

        assert_eq!(stream.next().await.unwrap().unwrap().payload, json!(1));
        assert_eq!(stream.next().await.unwrap().unwrap().payload, json!(2));
        let err = stream.next().await.unwrap().unwrap_err();
        assert_eq!(err.code, StatusCode::Unauthenticated);
        assert!(stream.next().await.is_none());

        let request = server.await.unwrap();
        assert_eq!(request["type"], "subscribe");
        assert_eq!(request["kind"], "blocks");
        assert_eq!(request["token"], "abc");
    }
}
