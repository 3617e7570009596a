//! Embedded in-process transport.
//!
//! Implements the full `Transport` contract inside the process: subject
//! fan-out, queue groups, request/reply over per-request inboxes, and named
//! durable streams with age/size retention and pull consumers. Single-node
//! deployments and the test suites run entirely on this implementation;
//! clustered deployments inject a broker-backed one instead.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{mpsc, Mutex, Notify, RwLock};
use tracing::{debug, warn};

use crate::domain::error::TransportError;
use crate::domain::ports::transport::{
    validate_durable_name, ConsumerConfig, DeliverPolicy, DiscardPolicy, Message, StoredMessage,
    StreamConfig, Subscription, Transport,
};
use crate::infrastructure::transport::subjects;

/// Buffered messages per subscription before delivery drops.
const SUBSCRIPTION_CAPACITY: usize = 256;

/// Poll slice while a fetch waits for new stream messages.
const FETCH_WAIT_SLICE: Duration = Duration::from_millis(25);

struct SubEntry {
    id: u64,
    pattern: String,
    group: Option<String>,
    tx: mpsc::Sender<Message>,
}

struct StreamState {
    config: StreamConfig,
    messages: VecDeque<StoredMessage>,
    next_seq: u64,
    bytes: u64,
    /// Durable consumer cursors: highest acked sequence per name.
    cursors: HashMap<String, u64>,
}

impl StreamState {
    fn new(config: StreamConfig) -> Self {
        Self {
            config,
            messages: VecDeque::new(),
            next_seq: 1,
            bytes: 0,
            cursors: HashMap::new(),
        }
    }

    fn captures(&self, subject: &str) -> bool {
        self.config
            .subjects
            .iter()
            .any(|filter| subjects::matches(filter, subject))
    }

    fn append(&mut self, subject: &str, payload: Vec<u8>) {
        let msg = StoredMessage {
            subject: subject.to_string(),
            payload,
            stream_seq: self.next_seq,
            timestamp: Utc::now(),
        };
        self.next_seq += 1;
        self.bytes += msg.payload.len() as u64;
        self.messages.push_back(msg);
        self.enforce_retention();
    }

    fn enforce_retention(&mut self) {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(self.config.max_age)
                .unwrap_or_else(|_| chrono::Duration::days(7));
        while let Some(front) = self.messages.front() {
            let over_bytes =
                self.bytes > self.config.max_bytes && self.config.discard == DiscardPolicy::Old;
            let expired = front.timestamp < cutoff;
            if !over_bytes && !expired {
                break;
            }
            if let Some(dropped) = self.messages.pop_front() {
                self.bytes -= dropped.payload.len() as u64;
            }
        }
    }

    fn last_seq(&self) -> u64 {
        self.next_seq - 1
    }
}

struct Inner {
    closed: AtomicBool,
    next_sub_id: AtomicU64,
    subs: RwLock<Vec<SubEntry>>,
    /// Round-robin cursor per queue group.
    group_cursors: Mutex<HashMap<String, usize>>,
    streams: RwLock<HashMap<String, StreamState>>,
    /// Wakes fetch waiters when any stream grows.
    appended: Notify,
}

/// The in-process transport.
#[derive(Clone)]
pub struct EmbeddedTransport {
    inner: Arc<Inner>,
}

impl Default for EmbeddedTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl EmbeddedTransport {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                closed: AtomicBool::new(false),
                next_sub_id: AtomicU64::new(1),
                subs: RwLock::new(Vec::new()),
                group_cursors: Mutex::new(HashMap::new()),
                streams: RwLock::new(HashMap::new()),
                appended: Notify::new(),
            }),
        }
    }

    fn ensure_open(&self) -> Result<(), TransportError> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed("embedded transport".to_string()));
        }
        Ok(())
    }

    async fn add_subscription(
        &self,
        pattern: &str,
        group: Option<String>,
    ) -> Result<Subscription, TransportError> {
        self.ensure_open()?;
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_CAPACITY);
        let entry = SubEntry {
            id: self.inner.next_sub_id.fetch_add(1, Ordering::SeqCst),
            pattern: pattern.to_string(),
            group,
            tx,
        };
        self.inner.subs.write().await.push(entry);
        Ok(Subscription::new(rx))
    }

    /// Deliver to subscribers and capture into streams. Returns how many
    /// subscriber deliveries were attempted (queue groups count once).
    async fn publish_inner(
        &self,
        subject: &str,
        payload: &[u8],
        reply: Option<String>,
    ) -> Result<usize, TransportError> {
        self.ensure_open()?;

        let mut delivered = 0;
        let mut dead: Vec<u64> = Vec::new();
        {
            let subs = self.inner.subs.read().await;
            let matching: Vec<&SubEntry> = subs
                .iter()
                .filter(|s| subjects::matches(&s.pattern, subject))
                .collect();

            // Plain subscribers all get a copy.
            let mut targets: Vec<&SubEntry> =
                matching.iter().filter(|s| s.group.is_none()).copied().collect();

            // One member per queue group, round-robin.
            let mut groups: HashMap<&str, Vec<&SubEntry>> = HashMap::new();
            for sub in matching.iter() {
                if let Some(group) = sub.group.as_deref() {
                    groups.entry(group).or_default().push(sub);
                }
            }
            if !groups.is_empty() {
                let mut cursors = self.inner.group_cursors.lock().await;
                for (group, members) in groups {
                    let cursor = cursors.entry(group.to_string()).or_insert(0);
                    let pick = members[*cursor % members.len()];
                    *cursor = cursor.wrapping_add(1);
                    targets.push(pick);
                }
            }

            for sub in targets {
                let msg = Message {
                    subject: subject.to_string(),
                    payload: payload.to_vec(),
                    reply: reply.clone(),
                };
                match sub.tx.try_send(msg) {
                    Ok(()) => delivered += 1,
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        warn!(subject, sub = sub.id, "subscriber buffer full; dropping message");
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => dead.push(sub.id),
                }
            }
        }

        if !dead.is_empty() {
            self.inner.subs.write().await.retain(|s| !dead.contains(&s.id));
        }

        let mut streams = self.inner.streams.write().await;
        let mut captured = false;
        for stream in streams.values_mut() {
            if stream.captures(subject) {
                stream.append(subject, payload.to_vec());
                captured = true;
            }
        }
        drop(streams);
        if captured {
            self.inner.appended.notify_waiters();
        }

        Ok(delivered)
    }
}

#[async_trait]
impl Transport for EmbeddedTransport {
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        self.publish_inner(subject, &payload, None).await.map(|_| ())
    }

    async fn subscribe(&self, pattern: &str) -> Result<Subscription, TransportError> {
        self.add_subscription(pattern, None).await
    }

    async fn queue_subscribe(
        &self,
        pattern: &str,
        group: &str,
    ) -> Result<Subscription, TransportError> {
        self.add_subscription(pattern, Some(group.to_string())).await
    }

    async fn request(
        &self,
        subject: &str,
        payload: Vec<u8>,
        timeout: Duration,
    ) -> Result<Message, TransportError> {
        let inbox = subjects::inbox();
        let mut reply_sub = self.add_subscription(&inbox, None).await?;

        let delivered = self.publish_inner(subject, &payload, Some(inbox)).await?;
        if delivered == 0 {
            return Err(TransportError::NoResponders(subject.to_string()));
        }

        match tokio::time::timeout(timeout, reply_sub.next()).await {
            Ok(Some(msg)) => Ok(msg),
            Ok(None) => Err(TransportError::Closed("reply channel".to_string())),
            Err(_) => Err(TransportError::RequestTimeout(timeout)),
        }
    }

    async fn ensure_stream(&self, config: StreamConfig) -> Result<(), TransportError> {
        self.ensure_open()?;
        validate_durable_name(&config.name)?;
        let mut streams = self.inner.streams.write().await;
        if !streams.contains_key(&config.name) {
            debug!(stream = %config.name, "creating stream");
            streams.insert(config.name.clone(), StreamState::new(config));
        }
        Ok(())
    }

    async fn fetch(
        &self,
        stream: &str,
        consumer: &ConsumerConfig,
        batch: usize,
        wait: Duration,
    ) -> Result<Vec<StoredMessage>, TransportError> {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            self.ensure_open()?;
            {
                let mut streams = self.inner.streams.write().await;
                let state = streams
                    .get_mut(stream)
                    .ok_or_else(|| TransportError::StreamNotFound(stream.to_string()))?;
                state.enforce_retention();

                let floor = match &consumer.durable {
                    Some(name) => {
                        validate_durable_name(name)?;
                        let last = state.last_seq();
                        let cursor = *state.cursors.entry(name.clone()).or_insert_with(|| {
                            match consumer.deliver_policy {
                                DeliverPolicy::All => 0,
                                DeliverPolicy::New => last,
                            }
                        });
                        cursor.max(consumer.start_seq.unwrap_or(0))
                    }
                    None => match consumer.deliver_policy {
                        DeliverPolicy::All => consumer.start_seq.unwrap_or(0),
                        DeliverPolicy::New => state.last_seq().max(consumer.start_seq.unwrap_or(0)),
                    },
                };

                let out: Vec<StoredMessage> = state
                    .messages
                    .iter()
                    .filter(|m| m.stream_seq > floor)
                    .filter(|m| {
                        consumer
                            .filter_subject
                            .as_deref()
                            .is_none_or(|f| subjects::matches(f, &m.subject))
                    })
                    .take(batch)
                    .cloned()
                    .collect();

                if !out.is_empty() {
                    return Ok(out);
                }
            }

            if tokio::time::Instant::now() >= deadline {
                return Ok(Vec::new());
            }
            let remaining = deadline - tokio::time::Instant::now();
            let slice = remaining.min(FETCH_WAIT_SLICE);
            tokio::select! {
                () = self.inner.appended.notified() => {}
                () = tokio::time::sleep(slice) => {}
            }
        }
    }

    async fn ack(&self, stream: &str, durable: &str, seq: u64) -> Result<(), TransportError> {
        self.ensure_open()?;
        validate_durable_name(durable)?;
        let mut streams = self.inner.streams.write().await;
        let state = streams
            .get_mut(stream)
            .ok_or_else(|| TransportError::StreamNotFound(stream.to_string()))?;
        let cursor = state.cursors.entry(durable.to_string()).or_insert(0);
        *cursor = (*cursor).max(seq);
        Ok(())
    }

    async fn delete_consumer(&self, stream: &str, durable: &str) -> Result<(), TransportError> {
        self.ensure_open()?;
        let mut streams = self.inner.streams.write().await;
        let state = streams
            .get_mut(stream)
            .ok_or_else(|| TransportError::StreamNotFound(stream.to_string()))?;
        state.cursors.remove(durable);
        Ok(())
    }

    async fn delete_msg(&self, stream: &str, seq: u64) -> Result<(), TransportError> {
        self.ensure_open()?;
        let mut streams = self.inner.streams.write().await;
        let state = streams
            .get_mut(stream)
            .ok_or_else(|| TransportError::StreamNotFound(stream.to_string()))?;
        let before = state.messages.len();
        let mut freed = 0;
        state.messages.retain(|m| {
            if m.stream_seq == seq {
                freed = m.payload.len() as u64;
                false
            } else {
                true
            }
        });
        if state.messages.len() == before {
            return Err(TransportError::MessageNotFound {
                stream: stream.to_string(),
                seq,
            });
        }
        state.bytes -= freed;
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.inner.closed.store(true, Ordering::SeqCst);
        self.inner.subs.write().await.clear();
        self.inner.appended.notify_waiters();
        Ok(())
    }
}
