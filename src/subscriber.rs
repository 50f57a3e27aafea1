//! Subscribed mode: push frames are read by one demultiplexer task and handed to the listener
//! tasks, one per `subscribe`/`psubscribe` call.

use bytes::Bytes;
use futures::{FutureExt, Stream};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::vec;
use strum_macros::EnumString;
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::mpsc::{self, Receiver, Sender, UnboundedReceiver, UnboundedSender};
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::command::Command;
use crate::connection::Connection;
use crate::frame::{self, Frame};
use crate::{Error, Result};

/// Callbacks for one batch of subscriptions. They run on the batch's listener task, in the order
/// the server sent the pushes.
///
/// Callbacks of one batch run one at a time, and `unsubscribe` waits for a running callback of the
/// batches it touches. Keep them short; hand long work to another task.
pub trait SubscriptionListener: Send + Sync + 'static {
    /// The server confirmed the subscription to `channel`. `count` is the number of channels and
    /// patterns the connection is now subscribed to.
    fn subscribed(&self, channel: &Bytes, count: i64);

    fn received(&self, message: &Message);
}

#[derive(Clone, Debug, PartialEq)]
pub struct Message {
    pub channel: Bytes,
    /// The pattern that matched, for pattern subscriptions.
    pub pattern: Option<Bytes>,
    pub payload: Bytes,
}

/// Reports kept for a caller that does not poll [`Subscriber::errors`]. Later ones are dropped.
pub const ERROR_BACKLOG: usize = 64;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
enum SubscriptionKind {
    Channel,
    Pattern,
}

impl SubscriptionKind {
    fn subscribe_command(self) -> &'static str {
        match self {
            SubscriptionKind::Channel => "SUBSCRIBE",
            SubscriptionKind::Pattern => "PSUBSCRIBE",
        }
    }

    fn unsubscribe_command(self) -> &'static str {
        match self {
            SubscriptionKind::Channel => "UNSUBSCRIBE",
            SubscriptionKind::Pattern => "PUNSUBSCRIBE",
        }
    }
}

#[derive(Debug, PartialEq, EnumString)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
enum PushKind {
    Subscribe,
    Psubscribe,
    Unsubscribe,
    Punsubscribe,
    Message,
    Pmessage,
}

/// A classified push frame.
#[derive(Debug, PartialEq)]
enum Push {
    Subscribed {
        kind: SubscriptionKind,
        name: Bytes,
        count: i64,
    },
    Message(Message),
    Ignored,
}

impl Push {
    /// The registry key the push belongs to. Channels and patterns are separate namespaces.
    fn key(&self) -> Option<Key> {
        match self {
            Push::Subscribed { kind, name, .. } => Some((*kind, name.clone())),
            Push::Message(Message {
                pattern: Some(pattern),
                ..
            }) => Some((SubscriptionKind::Pattern, pattern.clone())),
            Push::Message(message) => Some((SubscriptionKind::Channel, message.channel.clone())),
            Push::Ignored => None,
        }
    }
}

impl TryFrom<Frame> for Push {
    type Error = Error;

    fn try_from(frame: Frame) -> Result<Self> {
        // Pushes arrive as RESP2 arrays or RESP3 push frames.
        let parts = match frame {
            Frame::Array(parts) | Frame::Push(parts) => parts,
            frame => {
                return Err(frame::Error::Unexpected {
                    expected: "array or push",
                    actual: frame,
                }
                .into())
            }
        };

        let parser = &mut PushParser {
            parts: parts.into_iter(),
        };

        let kind = match parser.next_string()?.parse::<PushKind>() {
            Ok(kind) => kind,
            Err(_) => return Ok(Push::Ignored),
        };

        match kind {
            PushKind::Subscribe | PushKind::Psubscribe => {
                let kind = if kind == PushKind::Subscribe {
                    SubscriptionKind::Channel
                } else {
                    SubscriptionKind::Pattern
                };
                let name = parser.next_bytes()?;
                let count = parser.last_integer()?;
                Ok(Push::Subscribed { kind, name, count })
            }
            PushKind::Message => {
                let channel = parser.next_bytes()?;
                let payload = parser.last_bytes()?;
                Ok(Push::Message(Message {
                    channel,
                    pattern: None,
                    payload,
                }))
            }
            PushKind::Pmessage => {
                let pattern = parser.next_bytes()?;
                let channel = parser.next_bytes()?;
                let payload = parser.last_bytes()?;
                Ok(Push::Message(Message {
                    channel,
                    pattern: Some(pattern),
                    payload,
                }))
            }
            PushKind::Unsubscribe | PushKind::Punsubscribe => Ok(Push::Ignored),
        }
    }
}

struct PushParser {
    parts: vec::IntoIter<Frame>,
}

impl PushParser {
    fn next(&mut self) -> Result<Frame> {
        self.parts
            .next()
            .ok_or_else(|| frame::Error::Invalid("push frame ended early".to_string()).into())
    }

    fn last(&mut self) -> Result<Frame> {
        self.parts
            .by_ref()
            .last()
            .ok_or_else(|| frame::Error::Invalid("push frame ended early".to_string()).into())
    }

    fn next_string(&mut self) -> Result<String> {
        let bytes = self.next_bytes()?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| frame::Error::Invalid("push kind is not valid utf-8".to_string()).into())
    }

    fn next_bytes(&mut self) -> Result<Bytes> {
        let frame = self.next()?;
        bytes_of(frame)
    }

    fn last_bytes(&mut self) -> Result<Bytes> {
        let frame = self.last()?;
        bytes_of(frame)
    }

    fn last_integer(&mut self) -> Result<i64> {
        match self.last()? {
            Frame::Integer(i) => Ok(i),
            // Both `Simple` and `Bulk` representation may carry the digits.
            frame @ (Frame::Simple(_) | Frame::Bulk(_)) => bytes_of(frame.clone())
                .ok()
                .and_then(|bytes| std::str::from_utf8(&bytes).ok()?.trim().parse().ok())
                .ok_or_else(|| {
                    frame::Error::Unexpected {
                        expected: "subscription count",
                        actual: frame,
                    }
                    .into()
                }),
            frame => Err(frame::Error::Unexpected {
                expected: "subscription count",
                actual: frame,
            }
            .into()),
        }
    }
}

fn bytes_of(frame: Frame) -> Result<Bytes> {
    match frame {
        Frame::Simple(s) => Ok(Bytes::from(s)),
        Frame::Bulk(bytes) => Ok(bytes),
        frame => Err(frame::Error::Unexpected {
            expected: "simple or bulk string",
            actual: frame,
        }
        .into()),
    }
}

type Key = (SubscriptionKind, Bytes);

/// A push on its way to a listener task, with the token of the entry it was routed to.
struct Delivery {
    token: CancellationToken,
    push: Push,
}

struct Entry {
    batch: u64,
    token: CancellationToken,
    deliveries: UnboundedSender<Delivery>,
}

/// One listener task. The gate is held for the whole of each callback.
struct Batch {
    token: CancellationToken,
    gate: Arc<AsyncMutex<()>>,
}

/// Channel or pattern name to the listener batch subscribed to it.
#[derive(Default)]
struct Registry {
    entries: HashMap<Key, Entry>,
    batches: HashMap<u64, Batch>,
    next_batch: u64,
}

impl Registry {
    fn insert(
        &mut self,
        kind: SubscriptionKind,
        names: &[Bytes],
        deliveries: UnboundedSender<Delivery>,
    ) -> (u64, CancellationToken, Arc<AsyncMutex<()>>) {
        let batch = self.next_batch;
        self.next_batch += 1;

        let token = CancellationToken::new();
        let gate = Arc::new(AsyncMutex::new(()));
        self.batches.insert(
            batch,
            Batch {
                token: token.clone(),
                gate: gate.clone(),
            },
        );

        for name in names {
            let entry = Entry {
                batch,
                token: token.child_token(),
                deliveries: deliveries.clone(),
            };
            // A channel subscribed again moves to the newest listener.
            if let Some(previous) = self.entries.insert((kind, name.clone()), entry) {
                previous.token.cancel();
            }
        }
        self.release_idle_batches();

        (batch, token, gate)
    }

    /// Cancels the entries and returns the gates of the batches they belonged to.
    fn remove(&mut self, kind: SubscriptionKind, names: &[Bytes]) -> Vec<Arc<AsyncMutex<()>>> {
        let mut gates = Vec::new();
        for name in names {
            if let Some(entry) = self.entries.remove(&(kind, name.clone())) {
                entry.token.cancel();
                if let Some(batch) = self.batches.get(&entry.batch) {
                    gates.push(batch.gate.clone());
                }
            }
        }
        self.release_idle_batches();
        gates
    }

    fn clear(&mut self) {
        for (_, entry) in self.entries.drain() {
            entry.token.cancel();
        }
        self.release_idle_batches();
    }

    fn release_idle_batches(&mut self) {
        let entries = &self.entries;
        self.batches.retain(|id, batch| {
            let idle = !entries.values().any(|entry| entry.batch == *id);
            if idle {
                batch.token.cancel();
            }
            !idle
        });
    }

    fn names(&self, kind: SubscriptionKind) -> Vec<String> {
        self.entries
            .keys()
            .filter(|(entry_kind, _)| *entry_kind == kind)
            .map(|(_, name)| String::from_utf8_lossy(name).into_owned())
            .collect()
    }

    fn route(&self, push: Push) {
        let key = match push.key() {
            Some(key) => key,
            None => {
                debug!(?push, "ignoring push");
                return;
            }
        };

        match self.entries.get(&key) {
            Some(entry) if !entry.token.is_cancelled() => {
                let delivery = Delivery {
                    token: entry.token.clone(),
                    push,
                };
                if entry.deliveries.send(delivery).is_err() {
                    debug!("listener task is gone");
                }
            }
            _ => debug!(?push, "no active subscription for push"),
        }
    }
}

fn lock(registry: &Mutex<Registry>) -> MutexGuard<'_, Registry> {
    // A listener that panicked leaves the registry itself consistent.
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A connection in subscribed mode.
pub struct Subscriber<S> {
    writer: Connection<WriteHalf<S>>,
    registry: Arc<Mutex<Registry>>,
    listeners: JoinSet<()>,
    demultiplexer: Option<JoinHandle<()>>,
    shutdown: CancellationToken,
    errors: Receiver<Error>,
}

impl<S> Subscriber<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    /// Takes over `conn` and starts reading push frames from it.
    pub fn new(conn: Connection<S>) -> Result<Subscriber<S>> {
        let (reader, writer) = conn.split()?;

        let registry = Arc::new(Mutex::new(Registry::default()));
        let shutdown = CancellationToken::new();
        let (errors_tx, errors) = mpsc::channel(ERROR_BACKLOG);

        let demultiplexer = tokio::spawn(demultiplex(
            reader,
            registry.clone(),
            errors_tx,
            shutdown.clone(),
        ));

        Ok(Subscriber {
            writer,
            registry,
            listeners: JoinSet::new(),
            demultiplexer: Some(demultiplexer),
            shutdown,
            errors,
        })
    }

    pub async fn subscribe<L>(&mut self, channels: &[&str], listener: L) -> Result<()>
    where
        L: SubscriptionListener,
    {
        self.add(SubscriptionKind::Channel, channels, Arc::new(listener))
            .await
    }

    pub async fn psubscribe<L>(&mut self, patterns: &[&str], listener: L) -> Result<()>
    where
        L: SubscriptionListener,
    {
        self.add(SubscriptionKind::Pattern, patterns, Arc::new(listener))
            .await
    }

    /// Once this returns, the listeners of `channels` are not called again. A callback already
    /// running for one of them is waited for.
    pub async fn unsubscribe(&mut self, channels: &[&str]) -> Result<()> {
        self.remove(SubscriptionKind::Channel, channels).await
    }

    pub async fn punsubscribe(&mut self, patterns: &[&str]) -> Result<()> {
        self.remove(SubscriptionKind::Pattern, patterns).await
    }

    pub async fn unsubscribe_all(&mut self) -> Result<()> {
        let (channels, patterns) = {
            let mut registry = lock(&self.registry);
            let names = (
                registry.names(SubscriptionKind::Channel),
                registry.names(SubscriptionKind::Pattern),
            );
            registry.clear();
            names
        };
        self.listeners.shutdown().await;

        if !channels.is_empty() {
            self.writer
                .send_command(&Command::new(SubscriptionKind::Channel.unsubscribe_command()))
                .await?;
        }
        if !patterns.is_empty() {
            self.writer
                .send_command(&Command::new(SubscriptionKind::Pattern.unsubscribe_command()))
                .await?;
        }
        Ok(())
    }

    pub fn channels(&self) -> Vec<String> {
        lock(&self.registry).names(SubscriptionKind::Channel)
    }

    pub fn patterns(&self) -> Vec<String> {
        lock(&self.registry).names(SubscriptionKind::Pattern)
    }

    /// Number of listener tasks that still serve at least one subscription.
    pub fn active_listeners(&self) -> usize {
        lock(&self.registry).batches.len()
    }

    /// Malformed pushes and read failures, in the order they happened. At most [`ERROR_BACKLOG`]
    /// reports wait here; further ones are logged and dropped until the stream is polled.
    pub fn errors(&mut self) -> impl Stream<Item = Error> + '_ {
        futures::stream::poll_fn(move |cx| self.errors.poll_recv(cx))
    }

    /// Stops the demultiplexer, even while it waits for a frame, releases every listener and
    /// drops the socket. Safe to call more than once.
    pub async fn close(&mut self) {
        self.shutdown.cancel();
        if let Some(demultiplexer) = self.demultiplexer.take() {
            if let Err(err) = demultiplexer.await {
                warn!(%err, "demultiplexer task failed");
            }
        }

        lock(&self.registry).clear();
        self.listeners.shutdown().await;
        self.writer.close();
    }

    async fn add(
        &mut self,
        kind: SubscriptionKind,
        names: &[&str],
        listener: Arc<dyn SubscriptionListener>,
    ) -> Result<()> {
        let names = to_names(names);
        if names.is_empty() {
            return Ok(());
        }

        self.reap_listeners();

        // Register before sending so the confirmation cannot arrive first.
        let (deliveries_tx, deliveries) = mpsc::unbounded_channel();
        let (batch, token, gate) = lock(&self.registry).insert(kind, &names, deliveries_tx);
        self.listeners
            .spawn(listen(batch, token, deliveries, listener, gate));

        let command = names
            .iter()
            .fold(Command::new(kind.subscribe_command()), |cmd, name| {
                cmd.raw(name.clone())
            });

        if let Err(err) = self.writer.send_command(&command).await {
            let _ = lock(&self.registry).remove(kind, &names);
            return Err(err);
        }

        info!(batch, subscriptions = names.len(), "subscribed");
        Ok(())
    }

    async fn remove(&mut self, kind: SubscriptionKind, names: &[&str]) -> Result<()> {
        let names = to_names(names);
        if names.is_empty() {
            return Ok(());
        }

        let (gates, empty) = {
            let mut registry = lock(&self.registry);
            let gates = registry.remove(kind, &names);
            (gates, registry.entries.is_empty())
        };
        // A callback that passed its check before the removal finishes before this returns.
        for gate in gates {
            drop(gate.lock().await);
        }

        let command = names
            .iter()
            .fold(Command::new(kind.unsubscribe_command()), |cmd, name| {
                cmd.raw(name.clone())
            });
        let result = self.writer.send_command(&command).await;

        if empty {
            self.listeners.shutdown().await;
            debug!("listener pool released");
        } else {
            self.reap_listeners();
        }

        result
    }

    /// Joins listener tasks that already stopped.
    fn reap_listeners(&mut self) {
        while let Some(Some(result)) = self.listeners.join_next().now_or_never() {
            if let Err(err) = result {
                warn!(%err, "listener task failed");
            }
        }
    }

    /// Listener tasks not joined yet, finished or not.
    #[cfg(test)]
    fn spawned_listeners(&self) -> usize {
        self.listeners.len()
    }
}

impl<S> Drop for Subscriber<S> {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

fn to_names(names: &[&str]) -> Vec<Bytes> {
    names
        .iter()
        .filter(|name| !name.is_empty())
        .map(|name| Bytes::copy_from_slice(name.as_bytes()))
        .collect()
}

#[instrument(name = "demultiplex", skip_all, fields(connection_id = %reader.id()))]
async fn demultiplex<R>(
    mut reader: Connection<R>,
    registry: Arc<Mutex<Registry>>,
    errors: Sender<Error>,
    shutdown: CancellationToken,
) where
    R: AsyncRead + Unpin,
{
    loop {
        let result = tokio::select! {
            _ = shutdown.cancelled() => break,
            result = reader.read_frame() => result,
        };

        match result {
            Ok(Some(frame)) => match Push::try_from(frame) {
                Ok(push) => {
                    lock(&registry).route(push);
                }
                Err(err) => {
                    warn!(%err, "malformed push frame");
                    report(&errors, err);
                }
            },
            Ok(None) => {
                info!("connection closed by peer");
                break;
            }
            Err(err) if err.is_connection_error() => {
                warn!(%err, "stopped reading pushes");
                report(&errors, err);
                break;
            }
            Err(err) => {
                warn!(%err, "discarding unreadable bytes");
                report(&errors, err);
            }
        }
    }

    reader.close();
}

fn report(errors: &Sender<Error>, err: Error) {
    match errors.try_send(err) {
        Ok(()) => {}
        Err(TrySendError::Full(err)) => warn!(%err, "error backlog is full, dropping report"),
        // Nobody is left to read it.
        Err(TrySendError::Closed(_)) => {}
    }
}

async fn listen(
    batch: u64,
    token: CancellationToken,
    mut deliveries: UnboundedReceiver<Delivery>,
    listener: Arc<dyn SubscriptionListener>,
    gate: Arc<AsyncMutex<()>>,
) {
    loop {
        let delivery = tokio::select! {
            _ = token.cancelled() => break,
            delivery = deliveries.recv() => match delivery {
                Some(delivery) => delivery,
                None => break,
            },
        };

        // Check and call under the gate, so an unsubscribe either cancels the entry before the
        // check or waits for the callback to return.
        let _gate = gate.lock().await;
        if delivery.token.is_cancelled() {
            continue;
        }
        match &delivery.push {
            Push::Subscribed { name, count, .. } => listener.subscribed(name, *count),
            Push::Message(message) => listener.received(message),
            Push::Ignored => {}
        }
    }

    debug!(batch, "listener stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bulk(s: &str) -> Frame {
        Frame::Bulk(Bytes::copy_from_slice(s.as_bytes()))
    }

    #[test]
    fn classify_message() {
        let frame = Frame::Push(vec![
            Frame::Simple("message".to_string()),
            Frame::Simple("news".to_string()),
            Frame::Simple("hello".to_string()),
        ]);

        assert_eq!(
            Push::try_from(frame).unwrap(),
            Push::Message(Message {
                channel: Bytes::from("news"),
                pattern: None,
                payload: Bytes::from("hello"),
            })
        );
    }

    #[test]
    fn classify_is_case_insensitive() {
        let frame = Frame::Array(vec![bulk("SUBSCRIBE"), bulk("news"), Frame::Integer(2)]);

        assert_eq!(
            Push::try_from(frame).unwrap(),
            Push::Subscribed {
                kind: SubscriptionKind::Channel,
                name: Bytes::from("news"),
                count: 2
            }
        );
    }

    #[test]
    fn classify_pattern_message() {
        let frame = Frame::Array(vec![
            bulk("pmessage"),
            bulk("news.*"),
            bulk("news.tech"),
            bulk("rust"),
        ]);

        let push = Push::try_from(frame).unwrap();

        assert_eq!(
            push.key(),
            Some((SubscriptionKind::Pattern, Bytes::from("news.*")))
        );
        assert_eq!(
            push,
            Push::Message(Message {
                channel: Bytes::from("news.tech"),
                pattern: Some(Bytes::from("news.*")),
                payload: Bytes::from("rust"),
            })
        );
    }

    #[test]
    fn classify_count_as_text() {
        let frame = Frame::Array(vec![bulk("psubscribe"), bulk("n*"), bulk("3")]);

        let push = Push::try_from(frame).unwrap();

        assert_eq!(push.key(), Some((SubscriptionKind::Pattern, Bytes::from("n*"))));
        assert_eq!(
            push,
            Push::Subscribed {
                kind: SubscriptionKind::Pattern,
                name: Bytes::from("n*"),
                count: 3
            }
        );
    }

    #[test]
    fn classify_ignores_other_shapes() {
        let unsubscribe = Frame::Array(vec![bulk("unsubscribe"), bulk("news"), Frame::Integer(0)]);
        let unknown = Frame::Array(vec![bulk("pong"), bulk("")]);

        assert_eq!(Push::try_from(unsubscribe).unwrap(), Push::Ignored);
        assert_eq!(Push::try_from(unknown).unwrap(), Push::Ignored);
    }

    #[test]
    fn classify_malformed() {
        assert!(Push::try_from(Frame::Simple("OK".to_string())).is_err());
        assert!(Push::try_from(Frame::Array(vec![bulk("message")])).is_err());
        assert!(Push::try_from(Frame::Array(vec![Frame::Integer(1), bulk("x")])).is_err());
        assert!(
            Push::try_from(Frame::Array(vec![bulk("subscribe"), bulk("news"), bulk("x")]))
                .is_err()
        );
    }

    fn is_active(registry: &Registry, kind: SubscriptionKind, name: &str, batch: u64) -> bool {
        registry
            .entries
            .get(&(kind, Bytes::copy_from_slice(name.as_bytes())))
            .map_or(false, |entry| entry.batch == batch && !entry.token.is_cancelled())
    }

    #[test]
    fn registry_releases_idle_batches() {
        let mut registry = Registry::default();
        let (tx, _rx) = mpsc::unbounded_channel();
        let names = vec![Bytes::from("a"), Bytes::from("b")];

        let (batch, token, _) = registry.insert(SubscriptionKind::Channel, &names, tx);

        assert!(is_active(&registry, SubscriptionKind::Channel, "a", batch));

        assert!(registry
            .remove(SubscriptionKind::Pattern, &names[..1])
            .is_empty());
        assert!(is_active(&registry, SubscriptionKind::Channel, "a", batch));

        assert_eq!(
            registry
                .remove(SubscriptionKind::Channel, &names[..1])
                .len(),
            1
        );
        assert!(!is_active(&registry, SubscriptionKind::Channel, "a", batch));
        assert!(!token.is_cancelled());

        registry.remove(SubscriptionKind::Channel, &names[1..]);
        assert!(token.is_cancelled());
        assert!(registry.batches.is_empty());
    }

    #[test]
    fn registry_moves_resubscribed_channel() {
        let mut registry = Registry::default();
        let (tx, _rx) = mpsc::unbounded_channel();
        let news = vec![Bytes::from("news")];

        let (first, first_token, _) =
            registry.insert(SubscriptionKind::Channel, &news, tx.clone());
        let (second, _, _) = registry.insert(SubscriptionKind::Channel, &news, tx);

        assert!(first_token.is_cancelled());
        assert!(!is_active(&registry, SubscriptionKind::Channel, "news", first));
        assert!(is_active(&registry, SubscriptionKind::Channel, "news", second));
    }

    #[test]
    fn registry_keeps_channels_and_patterns_apart() {
        let mut registry = Registry::default();
        let (tx, _rx) = mpsc::unbounded_channel();
        let news = vec![Bytes::from("news")];

        let (channel, channel_token, _) =
            registry.insert(SubscriptionKind::Channel, &news, tx.clone());
        let (pattern, _, _) = registry.insert(SubscriptionKind::Pattern, &news, tx);

        assert!(!channel_token.is_cancelled());
        assert!(is_active(&registry, SubscriptionKind::Channel, "news", channel));
        assert!(is_active(&registry, SubscriptionKind::Pattern, "news", pattern));
        assert_eq!(registry.names(SubscriptionKind::Channel), vec!["news"]);
        assert_eq!(registry.names(SubscriptionKind::Pattern), vec!["news"]);
    }

    struct Silent;

    impl SubscriptionListener for Silent {
        fn subscribed(&self, _: &Bytes, _: i64) {}
        fn received(&self, _: &Message) {}
    }

    fn subscriber() -> (Subscriber<tokio::io::DuplexStream>, tokio::io::DuplexStream) {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let conn = Connection::from_stream(client, crate::ConnectionConfig::default());
        (Subscriber::new(conn).unwrap(), server)
    }

    #[tokio::test]
    async fn finished_listeners_are_reaped() {
        let (mut subscriber, _server) = subscriber();

        subscriber.subscribe(&["keep"], Silent).await.unwrap();
        for _ in 0..20 {
            subscriber.subscribe(&["churn"], Silent).await.unwrap();
            subscriber.unsubscribe(&["churn"]).await.unwrap();
            // Give the released task a chance to observe its cancellation.
            tokio::task::yield_now().await;
        }
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        subscriber.subscribe(&["last"], Silent).await.unwrap();

        assert_eq!(subscriber.active_listeners(), 2);
        // `keep` and `last` are live; every churned task was joined.
        assert_eq!(subscriber.spawned_listeners(), 2);

        subscriber.close().await;
    }

    #[tokio::test]
    async fn error_backlog_is_bounded() {
        let (tx, mut rx) = mpsc::channel(ERROR_BACKLOG);

        for _ in 0..ERROR_BACKLOG * 2 {
            report(&tx, Error::ConnectionClosed);
        }
        drop(tx);

        let mut kept = 0;
        while rx.recv().await.is_some() {
            kept += 1;
        }
        assert_eq!(kept, ERROR_BACKLOG);
    }
}
