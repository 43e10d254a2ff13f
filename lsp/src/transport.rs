//! Byte carriers between passd and the editor.
//!
//! Stream carriers (stdio, one accepted TCP connection) use `Content-Length`
//! framing; a UDP datagram is always exactly one frame.

use std::fmt;
use std::io;
use std::net::SocketAddr;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, UdpSocket};

use crate::codec::{Frame, FrameError, FrameReader, FrameWriter};

/// Largest UDP payload over IPv4.
const MAX_DATAGRAM_BYTES: usize = 65_507;

type BoxedReader = Box<dyn AsyncRead + Unpin + Send>;
type BoxedWriter = Box<dyn AsyncWrite + Unpin + Send>;

/// Where to talk to the editor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    Stdio,
    /// `host:port` to listen on for a single TCP connection.
    Tcp4(String),
    /// `host:port` to bind a UDP socket on.
    Udp4(String),
}

impl Endpoint {
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Stdio => "stdio",
            Self::Tcp4(_) => "tcp4",
            Self::Udp4(_) => "udp4",
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stdio => f.write_str("stdio"),
            Self::Tcp4(addr) | Self::Udp4(addr) => write!(f, "{}:{addr}", self.kind()),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("failed to open {endpoint}: {source}")]
    Open {
        endpoint: String,
        #[source]
        source: io::Error,
    },
    #[error("transport I/O failed: {0}")]
    Io(#[from] io::Error),
    #[error("no datagram received yet, reply has no peer")]
    NoPeer,
}

/// Outcome of one [`Transport::receive`] call.
#[derive(Debug)]
pub enum Received {
    Frame(Frame),
    /// A frame header could not be parsed and was skipped.
    Malformed(FrameError),
    /// The peer went away; no more frames will arrive.
    Closed,
}

enum Carrier {
    Stream {
        reader: FrameReader<BoxedReader>,
        writer: FrameWriter<BoxedWriter>,
    },
    Datagram {
        socket: UdpSocket,
        /// Sender of the most recent datagram; replies go here.
        peer: Option<SocketAddr>,
        buf: Vec<u8>,
    },
}

pub struct Transport {
    kind: &'static str,
    carrier: Carrier,
}

impl Transport {
    pub async fn open(endpoint: &Endpoint) -> Result<Self, TransportError> {
        let open_error = |source| TransportError::Open {
            endpoint: endpoint.to_string(),
            source,
        };

        match endpoint {
            Endpoint::Stdio => Ok(Self::stream(
                "stdio",
                tokio::io::stdin(),
                tokio::io::stdout(),
            )),
            Endpoint::Tcp4(addr) => {
                let listener = TcpListener::bind(addr.as_str()).await.map_err(open_error)?;
                Self::accept_one(listener).await.map_err(|err| match err {
                    TransportError::Io(source) => open_error(source),
                    other => other,
                })
            }
            Endpoint::Udp4(addr) => {
                let socket = UdpSocket::bind(addr.as_str()).await.map_err(open_error)?;
                if let Ok(local) = socket.local_addr() {
                    tracing::info!("lsp@udp4 bound to {local}");
                }
                Ok(Self {
                    kind: "udp4",
                    carrier: Carrier::Datagram {
                        socket,
                        peer: None,
                        buf: vec![0u8; MAX_DATAGRAM_BYTES],
                    },
                })
            }
        }
    }

    /// Wait for one client on `listener`, then stop listening.
    pub async fn accept_one(listener: TcpListener) -> Result<Self, TransportError> {
        if let Ok(local) = listener.local_addr() {
            tracing::info!("lsp@tcp4 listening on {local}");
        }
        let (stream, peer) = listener.accept().await?;
        drop(listener);
        tracing::info!("lsp@tcp4 accepted connection from {peer}");

        let (reader, writer) = stream.into_split();
        Ok(Self::stream("tcp4", reader, writer))
    }

    /// Header-framed transport over arbitrary streams.
    pub fn from_stream<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        Self::stream("stream", reader, writer)
    }

    fn stream<R, W>(kind: &'static str, reader: R, writer: W) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        Self {
            kind,
            carrier: Carrier::Stream {
                reader: FrameReader::new(Box::new(reader)),
                writer: FrameWriter::new(Box::new(writer)),
            },
        }
    }

    /// Log prefix, e.g. `lsp@tcp4`.
    #[must_use]
    pub fn name(&self) -> String {
        format!("lsp@{}", self.kind)
    }

    /// Bound address of a datagram transport.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        match &self.carrier {
            Carrier::Datagram { socket, .. } => socket.local_addr().ok(),
            Carrier::Stream { .. } => None,
        }
    }

    /// Block until the next frame, a skipped malformed frame, or the end of input.
    ///
    /// `Err` is a transient I/O failure; calling again is allowed.
    pub async fn receive(&mut self) -> Result<Received, TransportError> {
        match &mut self.carrier {
            Carrier::Stream { reader, .. } => match reader.read_frame().await {
                Ok(Some(frame)) => Ok(Received::Frame(frame)),
                Ok(None) => Ok(Received::Closed),
                Err(FrameError::Io(err)) if is_disconnect(&err) => {
                    tracing::debug!("peer disconnected: {err}");
                    Ok(Received::Closed)
                }
                Err(FrameError::Io(err)) => Err(TransportError::Io(err)),
                Err(err) => Ok(Received::Malformed(err)),
            },
            Carrier::Datagram { socket, peer, buf } => {
                let (len, from) = socket.recv_from(buf).await?;
                if peer.is_some_and(|current| current != from) {
                    tracing::debug!("udp peer changed to {from}");
                }
                *peer = Some(from);
                Ok(Received::Frame(Frame::new(&buf[..len])))
            }
        }
    }

    pub async fn send(&mut self, payload: &[u8]) -> Result<(), TransportError> {
        match &mut self.carrier {
            Carrier::Stream { writer, .. } => Ok(writer.write_frame(payload).await?),
            Carrier::Datagram { socket, peer, .. } => {
                let peer = peer.ok_or(TransportError::NoPeer)?;
                socket.send_to(payload, peer).await?;
                Ok(())
            }
        }
    }

    pub async fn close(self) -> Result<(), TransportError> {
        match self.carrier {
            Carrier::Stream { mut writer, .. } => Ok(writer.shutdown().await?),
            Carrier::Datagram { .. } => Ok(()),
        }
    }
}

fn is_disconnect(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::encode_frame;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    #[test]
    fn endpoint_display() {
        assert_eq!(Endpoint::Stdio.to_string(), "stdio");
        assert_eq!(
            Endpoint::Tcp4("127.0.0.1:9090".into()).to_string(),
            "tcp4:127.0.0.1:9090"
        );
        assert_eq!(Endpoint::Udp4("0.0.0.0:1".into()).kind(), "udp4");
    }

    #[tokio::test]
    async fn stream_transport_frames_both_ways() {
        let (client, server) = tokio::io::duplex(1024);
        let (server_read, server_write) = tokio::io::split(server);
        let mut transport = Transport::from_stream(server_read, server_write);
        let (mut client_read, mut client_write) = tokio::io::split(client);

        client_write.write_all(&encode_frame(b"ping")).await.unwrap();
        match transport.receive().await.unwrap() {
            Received::Frame(frame) => assert_eq!(frame.payload(), b"ping"),
            other => panic!("expected frame, got {other:?}"),
        }

        transport.send(b"pong").await.unwrap();
        let expected = encode_frame(b"pong");
        let mut got = vec![0u8; expected.len()];
        client_read.read_exact(&mut got).await.unwrap();
        assert_eq!(got, expected);
    }

    #[tokio::test]
    async fn stream_malformed_then_closed() {
        let (client, server) = tokio::io::duplex(1024);
        let (server_read, server_write) = tokio::io::split(server);
        let mut transport = Transport::from_stream(server_read, server_write);
        let (_client_read, mut client_write) = tokio::io::split(client);

        client_write.write_all(b"Bogus: 1\r\n\r\n").await.unwrap();
        client_write.shutdown().await.unwrap();

        assert!(matches!(
            transport.receive().await.unwrap(),
            Received::Malformed(FrameError::MalformedHeader(_))
        ));
        assert!(matches!(transport.receive().await.unwrap(), Received::Closed));
    }

    #[tokio::test]
    async fn tcp_accepts_single_client() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = tokio::spawn(async move {
            let mut stream = TcpStream::connect(addr).await.unwrap();
            stream.write_all(&encode_frame(b"hello")).await.unwrap();
            stream
        });

        let mut transport = Transport::accept_one(listener).await.unwrap();
        assert_eq!(transport.name(), "lsp@tcp4");
        match transport.receive().await.unwrap() {
            Received::Frame(frame) => assert_eq!(frame.payload(), b"hello"),
            other => panic!("expected frame, got {other:?}"),
        }

        drop(client.await.unwrap());
        assert!(matches!(transport.receive().await.unwrap(), Received::Closed));
    }

    #[tokio::test]
    async fn tcp_open_failure_reports_endpoint() {
        let err = Transport::open(&Endpoint::Tcp4("not-an-address".into()))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, TransportError::Open { .. }));
        assert!(err.to_string().contains("tcp4:not-an-address"));
    }

    #[tokio::test]
    async fn udp_replies_to_last_sender() {
        let mut transport = Transport::open(&Endpoint::Udp4("127.0.0.1:0".into()))
            .await
            .unwrap();
        let server = transport.local_addr().unwrap();

        assert!(matches!(
            transport.send(b"early").await,
            Err(TransportError::NoPeer)
        ));

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        client.send_to(b"{\"id\":1}", server).await.unwrap();
        match transport.receive().await.unwrap() {
            Received::Frame(frame) => assert_eq!(frame.payload(), b"{\"id\":1}"),
            other => panic!("expected frame, got {other:?}"),
        }

        transport.send(b"reply").await.unwrap();
        let mut buf = [0u8; 16];
        let (len, from) = client.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..len], b"reply");
        assert_eq!(from, server);
    }
}
