use bytes::Bytes;
use std::collections::HashMap;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::debug;

use crate::codec::FrameCodec;
use crate::command::Command;
use crate::config::ConnectionConfig;
use crate::connection::Connection;
use crate::frame::Frame;
use crate::subscriber::{Subscriber, SubscriptionListener};
use crate::Result;

/// A connection in command mode: one request, then its reply.
///
/// Subscribing consumes the client and hands the connection to a [`Subscriber`], so the same
/// socket is never read by a request and by the pub/sub listener at once.
pub struct Client<S = TcpStream> {
    conn: Connection<S>,
}

impl Client<TcpStream> {
    pub async fn connect(config: ConnectionConfig) -> Result<Client> {
        let mut conn = Connection::new(config);
        conn.connect().await?;
        Ok(Client { conn })
    }
}

impl<S> Client<S> {
    pub fn new(conn: Connection<S>) -> Client<S> {
        Client { conn }
    }

    pub fn connection(&self) -> &Connection<S> {
        &self.conn
    }

    pub fn codec(&self) -> &FrameCodec {
        self.conn.codec()
    }

    pub fn close(&mut self) {
        self.conn.close();
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> Client<S> {
    /// Sends `command` and returns the raw bytes of its reply, ready for the codec accessors.
    pub async fn execute(&mut self, command: Command) -> Result<Bytes> {
        self.conn.send_command(&command).await?;
        let reply = self.conn.read_reply().await?;
        debug!(command = command.name(), bytes = reply.len(), "reply received");
        Ok(reply)
    }

    /// Sends `command` and decodes its reply.
    pub async fn query(&mut self, command: Command) -> Result<Frame> {
        let reply = self.execute(command).await?;
        self.codec().decode_reply(&reply)
    }

    pub async fn send_raw(&mut self, data: &[u8]) -> Result<()> {
        self.conn.send(data).await
    }

    /// A single unframed read. Large replies need a large enough `capacity`.
    pub async fn receive_raw(&mut self, capacity: usize) -> Result<Bytes> {
        self.conn.receive(capacity).await
    }

    pub async fn auth(&mut self, user: Option<&str>, password: &str) -> Result<Bytes> {
        let reply = self
            .execute(Command::new("AUTH").arg_opt(user).arg(password))
            .await?;
        self.codec().simple_string(&reply)
    }

    /// `PONG`, or the message echoed back.
    pub async fn ping(&mut self, message: Option<&str>) -> Result<Bytes> {
        let reply = self.execute(Command::new("PING").arg_opt(message)).await?;
        match self.codec().decode_reply(&reply)? {
            Frame::Bulk(_) => Ok(self.codec().bulk_string(&reply)?.unwrap_or_default()),
            _ => self.codec().simple_string(&reply),
        }
    }

    pub async fn echo(&mut self, message: &str) -> Result<Option<Bytes>> {
        let reply = self
            .execute(Command::new("ECHO").raw(Bytes::copy_from_slice(message.as_bytes())))
            .await?;
        self.codec().bulk_string(&reply)
    }

    pub async fn select(&mut self, index: u32) -> Result<Bytes> {
        let reply = self
            .execute(Command::new("SELECT").arg(index.to_string()))
            .await?;
        self.codec().simple_string(&reply)
    }

    pub async fn get(&mut self, key: &str) -> Result<Option<Bytes>> {
        let reply = self.execute(Command::new("GET").arg(key)).await?;
        self.codec().bulk_string(&reply)
    }

    pub async fn set(&mut self, key: &str, value: impl AsRef<[u8]>) -> Result<Bytes> {
        let command = Command::new("SET")
            .arg(key)
            .raw(Bytes::copy_from_slice(value.as_ref()));
        let reply = self.execute(command).await?;
        self.codec().simple_string(&reply)
    }

    pub async fn del(&mut self, keys: &[&str]) -> Result<i64> {
        let reply = self.execute(Command::new("DEL").args_from(keys)).await?;
        self.codec().integer(&reply)
    }

    pub async fn exists(&mut self, keys: &[&str]) -> Result<i64> {
        let reply = self.execute(Command::new("EXISTS").args_from(keys)).await?;
        self.codec().integer(&reply)
    }

    pub async fn incr(&mut self, key: &str) -> Result<i64> {
        let reply = self.execute(Command::new("INCR").arg(key)).await?;
        self.codec().integer(&reply)
    }

    pub async fn keys(&mut self, pattern: &str) -> Result<Vec<String>> {
        let reply = self.execute(Command::new("KEYS").arg(pattern)).await?;
        self.codec().strings(&reply)
    }

    pub async fn hset(&mut self, key: &str, field: &str, value: &str) -> Result<i64> {
        let command = Command::new("HSET").arg(key).arg(field).arg(value);
        let reply = self.execute(command).await?;
        self.codec().integer(&reply)
    }

    pub async fn hgetall(&mut self, key: &str) -> Result<HashMap<String, String>> {
        let reply = self.execute(Command::new("HGETALL").arg(key)).await?;
        self.codec().hash_map(&reply)
    }

    /// Returns the number of subscribers that received the message.
    pub async fn publish(&mut self, channel: &str, message: impl AsRef<[u8]>) -> Result<i64> {
        let command = Command::new("PUBLISH")
            .arg(channel)
            .raw(Bytes::copy_from_slice(message.as_ref()));
        let reply = self.execute(command).await?;
        self.codec().integer(&reply)
    }

    pub async fn pubsub_channels(&mut self, pattern: Option<&str>) -> Result<Vec<String>> {
        let command = Command::new("PUBSUB").arg("CHANNELS").arg_opt(pattern);
        let reply = self.execute(command).await?;
        self.codec().strings(&reply)
    }
}

impl<S> Client<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    /// Switches the connection to subscribed mode and subscribes `listener` to `channels`.
    pub async fn subscribe<L>(self, channels: &[&str], listener: L) -> Result<Subscriber<S>>
    where
        L: SubscriptionListener,
    {
        let mut subscriber = Subscriber::new(self.conn)?;
        subscriber.subscribe(channels, listener).await?;
        Ok(subscriber)
    }

    /// Switches the connection to subscribed mode and subscribes `listener` to `patterns`.
    pub async fn psubscribe<L>(self, patterns: &[&str], listener: L) -> Result<Subscriber<S>>
    where
        L: SubscriptionListener,
    {
        let mut subscriber = Subscriber::new(self.conn)?;
        subscriber.psubscribe(patterns, listener).await?;
        Ok(subscriber)
    }
}
