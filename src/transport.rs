//! Frame transport between the sub-agent and the master agent.
//!
//! A frame is one complete PDU: the 20-byte header followed by as many
//! payload bytes as the header declares.

use std::{fmt, io, path::PathBuf, str::FromStr};

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::{
    object::BoxFuture,
    pdu::{PduHeader, PDU_HEADER_SIZE},
};

/// Default Unix-domain socket of the master agent.
pub const DEFAULT_SOCKET_PATH: &str = "/var/agentx/master";

/// Default TCP port of the master agent (RFC 2741 §8.1).
pub const DEFAULT_TCP_PORT: u16 = 705;

/// Frames declaring a larger payload are handed over header-only so that
/// decoding rejects them.
pub const MAX_PAYLOAD_LENGTH: usize = 1 << 20;

const READ_CHUNK: usize = 4096;

/// Byte-frame connection to the master agent.
pub trait Transport: Send {
    /// Writes one complete frame.
    fn send<'a>(&'a mut self, frame: &'a [u8]) -> BoxFuture<'a, io::Result<()>>;

    /// Next complete frame, `None` once the peer has disconnected.
    ///
    /// Cancel-safe: dropping the future never loses buffered bytes.
    fn recv(&mut self) -> BoxFuture<'_, io::Result<Option<Vec<u8>>>>;

    fn disconnect(&mut self) -> BoxFuture<'_, io::Result<()>>;
}

/// [`Transport`] over any byte stream.
pub struct StreamTransport<S> {
    stream: S,
    buffer: Vec<u8>,
}

impl<S> StreamTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(stream: S) -> Self {
        StreamTransport {
            stream,
            buffer: Vec::with_capacity(READ_CHUNK),
        }
    }

    pub fn into_inner(self) -> S {
        self.stream
    }

    /// Splits one frame off the front of the buffer if it is complete.
    fn take_frame(&mut self) -> Option<Vec<u8>> {
        if self.buffer.len() < PDU_HEADER_SIZE {
            return None;
        }
        let total = match PduHeader::from_bytes(&self.buffer[..PDU_HEADER_SIZE]) {
            Ok(header) if (header.payload_length as usize) <= MAX_PAYLOAD_LENGTH => {
                PDU_HEADER_SIZE + header.payload_length as usize
            }
            _ => PDU_HEADER_SIZE,
        };
        if self.buffer.len() < total {
            return None;
        }
        Some(self.buffer.drain(..total).collect())
    }

    async fn read_frame(&mut self) -> io::Result<Option<Vec<u8>>> {
        loop {
            if let Some(frame) = self.take_frame() {
                return Ok(Some(frame));
            }
            let mut chunk = [0u8; READ_CHUNK];
            let n = self.stream.read(&mut chunk).await?;
            if n == 0 {
                if self.buffer.is_empty() {
                    return Ok(None);
                }
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("connection closed inside a frame ({} bytes pending)", self.buffer.len()),
                ));
            }
            self.buffer.extend_from_slice(&chunk[..n]);
        }
    }
}

impl<S> Transport for StreamTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    fn send<'a>(&'a mut self, frame: &'a [u8]) -> BoxFuture<'a, io::Result<()>> {
        Box::pin(async move {
            self.stream.write_all(frame).await?;
            self.stream.flush().await
        })
    }

    fn recv(&mut self) -> BoxFuture<'_, io::Result<Option<Vec<u8>>>> {
        Box::pin(self.read_frame())
    }

    fn disconnect(&mut self) -> BoxFuture<'_, io::Result<()>> {
        Box::pin(async move {
            self.buffer.clear();
            self.stream.shutdown().await
        })
    }
}

/// Where the master agent listens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum MasterAddress {
    Unix(PathBuf),
    /// `host:port`
    Tcp(String),
}

impl Default for MasterAddress {
    fn default() -> Self {
        MasterAddress::Unix(PathBuf::from(DEFAULT_SOCKET_PATH))
    }
}

impl FromStr for MasterAddress {
    type Err = String;

    /// Accepts `unix:/path`, `tcp:host[:port]`, `host:port` or a bare path.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err("empty master address".to_string());
        }
        if let Some(path) = s.strip_prefix("unix:") {
            if path.is_empty() {
                return Err("missing socket path".to_string());
            }
            return Ok(MasterAddress::Unix(PathBuf::from(path)));
        }
        if let Some(addr) = s.strip_prefix("tcp:") {
            return tcp_address(addr);
        }
        if s.starts_with('/') || s.starts_with('.') {
            return Ok(MasterAddress::Unix(PathBuf::from(s)));
        }
        tcp_address(s)
    }
}

fn tcp_address(addr: &str) -> Result<MasterAddress, String> {
    if addr.is_empty() {
        return Err("missing TCP host".to_string());
    }
    // bracketed IPv6 literal or host without port
    let has_port = match addr.rsplit_once(':') {
        Some((host, port)) => {
            if host.is_empty() || (host.contains(':') && !host.ends_with(']')) {
                false
            } else {
                port.parse::<u16>()
                    .map_err(|_| format!("invalid port in {addr}"))?;
                true
            }
        }
        None => false,
    };
    if has_port {
        Ok(MasterAddress::Tcp(addr.to_string()))
    } else {
        Ok(MasterAddress::Tcp(format!("{addr}:{DEFAULT_TCP_PORT}")))
    }
}

impl TryFrom<String> for MasterAddress {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<MasterAddress> for String {
    fn from(addr: MasterAddress) -> String {
        addr.to_string()
    }
}

impl fmt::Display for MasterAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MasterAddress::Unix(path) => write!(f, "unix:{}", path.display()),
            MasterAddress::Tcp(addr) => write!(f, "tcp:{addr}"),
        }
    }
}

/// Opens a stream to the master agent.
pub async fn connect(address: &MasterAddress) -> io::Result<Box<dyn Transport>> {
    match address {
        #[cfg(unix)]
        MasterAddress::Unix(path) => {
            let stream = tokio::net::UnixStream::connect(path).await?;
            log::debug!("Connected to master agent at {}", path.display());
            Ok(Box::new(StreamTransport::new(stream)))
        }
        #[cfg(not(unix))]
        MasterAddress::Unix(path) => Err(io::Error::new(
            io::ErrorKind::Unsupported,
            format!("Unix sockets unavailable for {}", path.display()),
        )),
        MasterAddress::Tcp(addr) => {
            let stream = tokio::net::TcpStream::connect(addr.as_str()).await?;
            stream.set_nodelay(true)?;
            log::debug!("Connected to master agent at {}", addr);
            Ok(Box::new(StreamTransport::new(stream)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdu::{Payload, Pdu};

    fn ping_frame(packet_id: u32) -> Vec<u8> {
        let mut pdu = Pdu::new(Payload::Ping);
        pdu.packet_id = packet_id;
        pdu.encode()
    }

    #[tokio::test]
    async fn test_frames_split_across_writes() {
        let (client, mut server) = tokio::io::duplex(64);
        let mut transport = StreamTransport::new(client);

        let mut bytes = ping_frame(1);
        bytes.extend(ping_frame(2));
        let writer = tokio::spawn(async move {
            for chunk in bytes.chunks(7) {
                server.write_all(chunk).await.unwrap();
            }
            server
        });

        let first = transport.recv().await.unwrap().unwrap();
        let second = transport.recv().await.unwrap().unwrap();
        assert_eq!(Pdu::from_bytes(&first).unwrap().packet_id, 1);
        assert_eq!(Pdu::from_bytes(&second).unwrap().packet_id, 2);

        drop(writer.await.unwrap());
        assert!(transport.recv().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_eof_inside_frame_is_error() {
        let (client, mut server) = tokio::io::duplex(64);
        let mut transport = StreamTransport::new(client);
        let frame = ping_frame(1);
        server.write_all(&frame[..10]).await.unwrap();
        drop(server);
        let err = transport.recv().await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[tokio::test]
    async fn test_bad_version_yields_header_only_frame() {
        let (client, mut server) = tokio::io::duplex(64);
        let mut transport = StreamTransport::new(client);
        let mut frame = ping_frame(1);
        frame[0] = 9;
        server.write_all(&frame).await.unwrap();
        let got = transport.recv().await.unwrap().unwrap();
        assert_eq!(got.len(), PDU_HEADER_SIZE);
        assert!(Pdu::from_bytes(&got).is_err());
    }

    #[tokio::test]
    async fn test_send_writes_frame() {
        let (client, mut server) = tokio::io::duplex(64);
        let mut transport = StreamTransport::new(client);
        let frame = ping_frame(5);
        transport.send(&frame).await.unwrap();
        let mut got = vec![0u8; frame.len()];
        server.read_exact(&mut got).await.unwrap();
        assert_eq!(got, frame);
    }

    #[test]
    fn test_master_address_parse() {
        assert_eq!(
            "unix:/var/agentx/master".parse::<MasterAddress>().unwrap(),
            MasterAddress::default()
        );
        assert_eq!(
            "/tmp/agentx".parse::<MasterAddress>().unwrap(),
            MasterAddress::Unix(PathBuf::from("/tmp/agentx"))
        );
        assert_eq!(
            "tcp:localhost".parse::<MasterAddress>().unwrap(),
            MasterAddress::Tcp("localhost:705".to_string())
        );
        assert_eq!(
            "127.0.0.1:7050".parse::<MasterAddress>().unwrap(),
            MasterAddress::Tcp("127.0.0.1:7050".to_string())
        );
        assert_eq!(
            "tcp:[::1]:705".parse::<MasterAddress>().unwrap(),
            MasterAddress::Tcp("[::1]:705".to_string())
        );
        assert!("tcp:host:notaport".parse::<MasterAddress>().is_err());
        assert!("unix:".parse::<MasterAddress>().is_err());
        assert!("".parse::<MasterAddress>().is_err());
    }

    #[test]
    fn test_master_address_display_roundtrip() {
        for text in ["unix:/var/agentx/master", "tcp:localhost:705"] {
            let addr: MasterAddress = text.parse().unwrap();
            assert_eq!(addr.to_string(), text);
        }
    }
}
