//! Stream transports for alert delivery
//!
//! The publisher writes through this trait so retry and idempotency logic
//! can be exercised against an in-memory stream with injectable failures.
//! Production appends to a Redis Stream, capped producer-side with an
//! approximate MAXLEN so trimming stays cheap.
//!
//! Every append carries a dedupe key that the transport checks atomically
//! with the write. A write that landed but whose acknowledgement was lost
//! (timeout on an XADD that succeeded) must not produce a second entry
//! when the publisher retries: the transport returns the prior entry id
//! instead of appending again.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::info;

use crate::models::errors::{EngineError, EngineResult};

/// Append one entry to a named stream, returning the entry id assigned by
/// the stream. An append whose `dedupe_key` already delivered within
/// `dedupe_ttl` returns the prior entry id without writing.
#[async_trait]
pub trait StreamTransport: Send + Sync {
    async fn append(
        &self,
        stream: &str,
        maxlen: usize,
        dedupe_key: &str,
        dedupe_ttl: Duration,
        fields: &[(String, String)],
    ) -> EngineResult<String>;
}

/// Dedupe-check, XADD and dedupe-record in one atomic script, so a retry
/// racing its own timed-out predecessor can never double-append.
/// KEYS[1] = stream, KEYS[2] = dedupe key,
/// ARGV[1] = maxlen, ARGV[2] = ttl secs, ARGV[3..] = field pairs.
const APPEND_SCRIPT: &str = r#"
local prior = redis.call('GET', KEYS[2])
if prior then
  return prior
end
local args = {'MAXLEN', '~', ARGV[1], '*'}
for i = 3, #ARGV do
  args[#args + 1] = ARGV[i]
end
local id = redis.call('XADD', KEYS[1], unpack(args))
redis.call('SET', KEYS[2], id, 'EX', ARGV[2])
return id
"#;

/// Redis Streams transport. The connection manager reconnects on its own;
/// a write that still fails surfaces as a retryable error to the publisher.
pub struct RedisStream {
    conn: redis::aio::ConnectionManager,
    append_script: redis::Script,
}

impl RedisStream {
    pub async fn connect(redis_url: &str) -> EngineResult<Self> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| EngineError::config_invalid(format!("bad Redis URL: {}", e)))?;
        let conn = client.get_tokio_connection_manager().await?;
        info!("📡 Connected to Redis stream transport");
        Ok(Self {
            conn,
            append_script: redis::Script::new(APPEND_SCRIPT),
        })
    }
}

#[async_trait]
impl StreamTransport for RedisStream {
    async fn append(
        &self,
        stream: &str,
        maxlen: usize,
        dedupe_key: &str,
        dedupe_ttl: Duration,
        fields: &[(String, String)],
    ) -> EngineResult<String> {
        let mut invocation = self.append_script.key(stream);
        invocation.key(dedupe_key);
        invocation.arg(maxlen);
        invocation.arg(dedupe_ttl.as_secs().max(1));
        for (key, value) in fields {
            invocation.arg(key.as_str());
            invocation.arg(value.as_str());
        }

        let mut conn = self.conn.clone();
        let entry_id: String = invocation.invoke_async(&mut conn).await?;
        Ok(entry_id)
    }
}

/// In-memory stream for tests and the no-Redis dry-run mode. Supports
/// failing the first N appends before anything lands, and losing the
/// acknowledgement of the first N appends after they landed.
#[derive(Default)]
pub struct InMemoryStream {
    entries: Mutex<Vec<StreamEntry>>,
    dedupe: Mutex<HashMap<String, (String, Instant)>>,
    next_id: AtomicU64,
    fail_remaining: AtomicU32,
    lose_ack_remaining: AtomicU32,
}

#[derive(Debug, Clone)]
pub struct StreamEntry {
    pub stream: String,
    pub entry_id: String,
    pub fields: Vec<(String, String)>,
}

impl InMemoryStream {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `n` append calls outright before serving normally
    pub fn fail_first(n: u32) -> Self {
        let stream = Self::default();
        stream.fail_remaining.store(n, Ordering::SeqCst);
        stream
    }

    /// The next `n` appends land in the stream but return an error, as a
    /// timed-out XADD that actually succeeded would
    pub fn lose_ack_first(n: u32) -> Self {
        let stream = Self::default();
        stream.lose_ack_remaining.store(n, Ordering::SeqCst);
        stream
    }

    pub fn entries(&self) -> Vec<StreamEntry> {
        self.entries.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl StreamTransport for InMemoryStream {
    async fn append(
        &self,
        stream: &str,
        maxlen: usize,
        dedupe_key: &str,
        dedupe_ttl: Duration,
        fields: &[(String, String)],
    ) -> EngineResult<String> {
        if self
            .fail_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(EngineError::stream_write_timeout("injected write failure"));
        }

        // Same expiry contract as the Redis SET .. EX on the dedupe key
        if let Some((prior, stored_at)) = self.dedupe.lock().unwrap().get(dedupe_key) {
            if stored_at.elapsed() < dedupe_ttl {
                return Ok(prior.clone());
            }
        }

        let seq = self.next_id.fetch_add(1, Ordering::SeqCst);
        let entry_id = format!("{}-0", seq + 1);

        let mut entries = self.entries.lock().unwrap();
        entries.push(StreamEntry {
            stream: stream.to_string(),
            entry_id: entry_id.clone(),
            fields: fields.to_vec(),
        });
        // Approximate cap, same contract as the Redis MAXLEN ~ form
        if entries.len() > maxlen {
            let excess = entries.len() - maxlen;
            entries.drain(0..excess);
        }
        drop(entries);

        self.dedupe
            .lock()
            .unwrap()
            .insert(dedupe_key.to_string(), (entry_id.clone(), Instant::now()));

        if self
            .lose_ack_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(EngineError::stream_write_timeout(
                "injected lost acknowledgement",
            ));
        }

        Ok(entry_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields() -> Vec<(String, String)> {
        vec![("payload".to_string(), "{}".to_string())]
    }

    const TTL: Duration = Duration::from_secs(60);

    #[tokio::test]
    async fn test_append_assigns_monotonic_ids() {
        let stream = InMemoryStream::new();
        let a = stream.append("alerts", 100, "k1", TTL, &fields()).await.unwrap();
        let b = stream.append("alerts", 100, "k2", TTL, &fields()).await.unwrap();
        assert_ne!(a, b);
        assert_eq!(stream.len(), 2);
    }

    #[tokio::test]
    async fn test_fail_first_then_recover() {
        let stream = InMemoryStream::fail_first(2);
        assert!(stream.append("alerts", 100, "k", TTL, &fields()).await.is_err());
        assert!(stream.append("alerts", 100, "k", TTL, &fields()).await.is_err());
        assert!(stream.append("alerts", 100, "k", TTL, &fields()).await.is_ok());
        assert_eq!(stream.len(), 1);
    }

    #[tokio::test]
    async fn test_same_dedupe_key_returns_prior_entry() {
        let stream = InMemoryStream::new();
        let first = stream.append("alerts", 100, "k", TTL, &fields()).await.unwrap();
        let second = stream.append("alerts", 100, "k", TTL, &fields()).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(stream.len(), 1);
    }

    #[tokio::test]
    async fn test_lost_ack_lands_and_dedupes_the_retry() {
        let stream = InMemoryStream::lose_ack_first(1);
        let err = stream.append("alerts", 100, "k", TTL, &fields()).await.unwrap_err();
        assert!(err.to_string().contains("lost acknowledgement"));
        // The entry is in the stream despite the error
        assert_eq!(stream.len(), 1);

        let retried = stream.append("alerts", 100, "k", TTL, &fields()).await.unwrap();
        assert_eq!(retried, stream.entries()[0].entry_id);
        assert_eq!(stream.len(), 1);
    }

    #[tokio::test]
    async fn test_maxlen_trims_oldest() {
        let stream = InMemoryStream::new();
        for i in 0..5 {
            let key = format!("k{}", i);
            stream.append("alerts", 3, &key, TTL, &fields()).await.unwrap();
        }
        let entries = stream.entries();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].entry_id, "3-0");
    }
}
