use bytes::{Bytes, BytesMut};
use tokio::io::{self, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio_util::codec::Decoder;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::codec::FrameCodec;
use crate::command::Command;
use crate::config::ConnectionConfig;
use crate::frame::Frame;
use crate::{Error, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Owns one duplex byte stream and the buffer its replies are read into.
///
/// Reading needs `S: AsyncRead`, writing needs `S: AsyncWrite`. [`Connection::split`] turns a
/// connection into a read-only and a write-only one.
pub struct Connection<S = TcpStream> {
    id: Uuid,
    config: ConnectionConfig,
    state: ConnectionState,
    stream: Option<S>,
    // Data is read from the socket into the read buffer. When a frame is parsed, the corresponding
    // data is removed from the buffer.
    buffer: BytesMut,
    codec: FrameCodec,
}

impl Connection<TcpStream> {
    pub fn new(config: ConnectionConfig) -> Connection {
        let codec = config.codec();
        Connection {
            id: Uuid::new_v4(),
            config,
            state: ConnectionState::Disconnected,
            stream: None,
            buffer: BytesMut::new(),
            codec,
        }
    }

    /// Opens the socket. Does nothing when already connected.
    ///
    /// `connect` borrows the connection mutably, so no other attempt can be in flight. A
    /// `Connecting` state seen here belongs to an attempt whose future was dropped, and is retried.
    #[instrument(name = "connect", skip_all, fields(connection_id = %self.id, addr = %self.config.addr()))]
    pub async fn connect(&mut self) -> Result<()> {
        match (self.state, self.stream.is_some()) {
            (ConnectionState::Connected, true) => return Ok(()),
            (ConnectionState::Connecting, _) => debug!("retrying an abandoned connect"),
            _ => {}
        }

        self.state = ConnectionState::Connecting;

        let stream = match TcpStream::connect(self.config.addr()).await {
            Ok(stream) => stream,
            Err(err) => {
                warn!(%err, "failed to connect");
                self.state = ConnectionState::Disconnected;
                return Err(err.into());
            }
        };

        // Requests are written in one go, there is nothing to coalesce.
        if let Err(err) = stream.set_nodelay(true) {
            debug!(%err, "failed to set TCP_NODELAY");
        }

        self.stream = Some(stream);
        // Allocate the buffer with 4kb of capacity.
        self.buffer = BytesMut::with_capacity(4096);
        self.state = ConnectionState::Connected;

        info!("connected");
        Ok(())
    }
}

impl<S> Connection<S> {
    /// Adopts an already established stream.
    pub fn from_stream(stream: S, config: ConnectionConfig) -> Connection<S> {
        let codec = config.codec();
        Connection {
            id: Uuid::new_v4(),
            config,
            state: ConnectionState::Connected,
            stream: Some(stream),
            buffer: BytesMut::with_capacity(4096),
            codec,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn codec(&self) -> &FrameCodec {
        &self.codec
    }

    /// Releases the buffer and the stream. Safe to call any number of times.
    pub fn close(&mut self) {
        if self.stream.take().is_some() {
            info!(connection_id = %self.id, "connection closed");
        }
        self.buffer = BytesMut::new();
        self.state = ConnectionState::Disconnected;
    }

    fn stream_mut(stream: &mut Option<S>, state: ConnectionState) -> Result<&mut S> {
        match (state, stream.as_mut()) {
            (ConnectionState::Connected, Some(stream)) => Ok(stream),
            _ => Err(Error::NotConnected),
        }
    }
}

impl<S: AsyncRead + Unpin> Connection<S> {
    /// Performs a single read of at most `capacity` bytes and returns whatever arrived. Replies
    /// longer than `capacity` are not accumulated; use [`Connection::read_reply`] for that.
    #[instrument(name = "receive", skip(self), fields(connection_id = %self.id))]
    pub async fn receive(&mut self, capacity: usize) -> Result<Bytes> {
        // Bytes left over by a previous framed read come first.
        if !self.buffer.is_empty() {
            let len = capacity.min(self.buffer.len());
            return Ok(self.buffer.split_to(len).freeze());
        }

        let stream = Self::stream_mut(&mut self.stream, self.state)?;

        if capacity == 0 {
            return Ok(Bytes::new());
        }

        let mut data = vec![0; capacity];
        let result = stream.read(&mut data).await;
        match result {
            Ok(0) => {
                self.close();
                Err(Error::ConnectionClosed)
            }
            Ok(n) => {
                debug!(bytes = n, "received");
                data.truncate(n);
                Ok(Bytes::from(data))
            }
            Err(err) => {
                self.close();
                Err(err.into())
            }
        }
    }

    /// [`Connection::receive`] with the configured read capacity.
    pub async fn receive_default(&mut self) -> Result<Bytes> {
        let capacity = self.config.read_capacity;
        self.receive(capacity).await
    }

    /// Reads until one whole frame is buffered and decodes it. Returns `None` when the peer
    /// closed the stream cleanly between frames.
    pub async fn read_frame(&mut self) -> Result<Option<Frame>> {
        self.read_with(|codec, buffer| codec.decode(buffer)).await
    }

    /// Reads until one whole frame is buffered and returns its raw bytes, tag and terminator
    /// included.
    pub async fn read_reply(&mut self) -> Result<Bytes> {
        match self
            .read_with(|codec, buffer| codec.split_frame(buffer))
            .await?
        {
            Some(reply) => Ok(reply),
            None => Err(Error::ConnectionClosed),
        }
    }

    async fn read_with<T, F>(&mut self, mut parse: F) -> Result<Option<T>>
    where
        F: FnMut(&mut FrameCodec, &mut BytesMut) -> Result<Option<T>>,
    {
        loop {
            match parse(&mut self.codec, &mut self.buffer) {
                Ok(Some(value)) => return Ok(Some(value)),
                Ok(None) => {}
                Err(err) => {
                    // The frame boundary is lost, start over with whatever arrives next.
                    self.buffer.clear();
                    return Err(err);
                }
            }

            let stream = Self::stream_mut(&mut self.stream, self.state)?;
            let result = stream.read_buf(&mut self.buffer).await;
            match result {
                Ok(0) => {
                    let partial = !self.buffer.is_empty();
                    self.close();
                    return if partial {
                        Err(Error::ConnectionClosed)
                    } else {
                        Ok(None)
                    };
                }
                Ok(n) => debug!(connection_id = %self.id, bytes = n, "read"),
                Err(err) => {
                    self.close();
                    return Err(err.into());
                }
            }
        }
    }
}

impl<S: AsyncWrite + Unpin> Connection<S> {
    /// Writes every byte of `data` before returning.
    #[instrument(name = "send", skip_all, fields(connection_id = %self.id, bytes = data.len()))]
    pub async fn send(&mut self, data: &[u8]) -> Result<()> {
        let stream = Self::stream_mut(&mut self.stream, self.state)?;

        let result = match stream.write_all(data).await {
            Ok(()) => stream.flush().await,
            Err(err) => Err(err),
        };

        if let Err(err) = result {
            warn!(%err, "write failed");
            self.close();
            return Err(err.into());
        }

        Ok(())
    }

    pub async fn send_command(&mut self, command: &Command) -> Result<()> {
        debug!(command = command.name(), args = command.args().len(), "sending command");
        let bytes = command.serialize()?;
        self.send(&bytes).await
    }
}

impl<S: AsyncRead + AsyncWrite> Connection<S> {
    /// Splits the connection into a read-only and a write-only half. Bytes already buffered go
    /// to the read half.
    pub fn split(mut self) -> Result<(Connection<ReadHalf<S>>, Connection<WriteHalf<S>>)> {
        let stream = match (self.state, self.stream.take()) {
            (ConnectionState::Connected, Some(stream)) => stream,
            _ => return Err(Error::NotConnected),
        };
        let (reader, writer) = io::split(stream);

        let read_half = Connection {
            id: self.id,
            config: self.config.clone(),
            state: ConnectionState::Connected,
            stream: Some(reader),
            buffer: std::mem::take(&mut self.buffer),
            codec: self.codec.clone(),
        };
        let write_half = Connection {
            id: self.id,
            config: self.config,
            state: ConnectionState::Connected,
            stream: Some(writer),
            buffer: BytesMut::new(),
            codec: self.codec,
        };

        Ok((read_half, write_half))
    }
}
