//! Redis-backed [`CounterStore`] for `gatekeeper`.
//!
//! Peeks are a plain `GET`. Consumes run one Lua script that reads, checks, increments and
//! (on the first increment of a window) expires the counter, so concurrent instances sharing
//! the same Redis never admit more than `max` requests per window. The script is sent with
//! `EVALSHA` and re-sent with `EVAL` when the server has not cached it yet.
//!
//! ```no_run
//! use gatekeeper::{Identity, QuotaEngine};
//! use gatekeeper_redis::RedisCounterStore;
//!
//! # async fn run() -> redis::RedisResult<()> {
//! let store = RedisCounterStore::connect("redis://127.0.0.1:6379").await?;
//! let engine = QuotaEngine::new(store);
//! let outcome = engine.consume(&Identity::new("user123", "/api/orders", "ORDERS")).await;
//! # let _ = outcome;
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use gatekeeper::{CounterStore, Increment};
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client, ErrorKind, RedisError, RedisResult, Script};
use std::fmt;
use std::time::Duration;

/// Atomic check-and-increment. `KEYS[1]` = counter, `ARGV[1]` = ttl secs, `ARGV[2]` = max.
/// Replies `{1, max - new_count, new_count}` when admitted, `{0, 0, current}` otherwise.
pub const CONSUME_SCRIPT: &str = r"
local key = KEYS[1]
local window_size = tonumber(ARGV[1])
local max_requests = tonumber(ARGV[2])

local current = redis.call('GET', key)
if current == false then
    current = 0
else
    current = tonumber(current)
end

if current < max_requests then
    local new_count = redis.call('INCR', key)
    if new_count == 1 then
        redis.call('EXPIRE', key, window_size)
    end
    return {1, max_requests - new_count, new_count}
else
    return {0, 0, current}
end
";

/// Shared fixed-window counters in Redis.
///
/// Cloning is cheap: clones share one multiplexed connection.
#[derive(Clone)]
pub struct RedisCounterStore {
    conn: MultiplexedConnection,
    script: Script,
}

impl fmt::Debug for RedisCounterStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisCounterStore").field("script", &self.script.get_hash()).finish()
    }
}

impl RedisCounterStore {
    /// Open a multiplexed connection to `url`.
    pub async fn connect(url: &str) -> RedisResult<Self> {
        let client = Client::open(url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        tracing::info!(
            target: "gatekeeper::redis",
            url = %redact_url(url),
            "connected to redis counter store"
        );
        Ok(Self::from_connection(conn))
    }

    /// Wrap an existing connection.
    pub fn from_connection(conn: MultiplexedConnection) -> Self {
        Self { conn, script: Script::new(CONSUME_SCRIPT) }
    }

    /// Round-trip a `PING`.
    pub async fn ping(&self) -> RedisResult<()> {
        let mut conn = self.conn.clone();
        let reply: String = redis::cmd("PING").query_async(&mut conn).await?;
        if reply == "PONG" {
            Ok(())
        } else {
            Err(RedisError::from((ErrorKind::ResponseError, "unexpected PING reply", reply)))
        }
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    type Error = RedisError;

    async fn get(&self, key: &str) -> Result<Option<u64>, Self::Error> {
        let mut conn = self.conn.clone();
        conn.get::<_, Option<u64>>(key).await
    }

    async fn increment_within(
        &self,
        key: &str,
        max: u64,
        ttl: Duration,
    ) -> Result<Increment, Self::Error> {
        let mut conn = self.conn.clone();
        let reply: Vec<i64> = self
            .script
            .key(key)
            .arg(ttl.as_secs().max(1))
            .arg(max)
            .invoke_async(&mut conn)
            .await?;
        parse_reply(&reply)
    }
}

/// Validate a script reply and turn it into an [`Increment`].
pub fn parse_reply(reply: &[i64]) -> RedisResult<Increment> {
    let [flag, _remaining, count] = reply else {
        return Err(malformed(format!("expected 3 elements, got {}", reply.len())));
    };
    let allowed = match *flag {
        1 => true,
        0 => false,
        other => return Err(malformed(format!("allowed flag {other}"))),
    };
    let count = u64::try_from(*count).map_err(|_| malformed(format!("negative count {count}")))?;
    Ok(Increment { allowed, count })
}

fn malformed(detail: String) -> RedisError {
    RedisError::from((ErrorKind::TypeError, "malformed consume script reply", detail))
}

/// Replace the credentials of a connection URL for logging.
pub fn redact_url(url: &str) -> String {
    match (url.find("://"), url.rfind('@')) {
        (Some(scheme_end), Some(at_pos)) if at_pos > scheme_end => {
            format!("{}://[REDACTED]@{}", &url[..scheme_end], &url[at_pos + 1..])
        }
        _ => url.to_string(),
    }
}
