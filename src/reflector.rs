//! Player count reflection.
//!
//! Queries an upstream server over the same server-list protocol and
//! reports its online player count as our own. Results are cached for a
//! configurable TTL; failures fall back to the last known count.
//!
//! Only one refresh runs at a time. A caller that misses the cache while
//! another refresh is in flight is served the cached count immediately
//! rather than waiting or issuing a second query.

use bytes::BytesMut;
use serde::Deserialize;
use std::fmt;
use std::io;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{debug, info, trace, warn};

use crate::config::{Config, UpstreamAddr};
use crate::protocol::{CursorBuffer, Handshake, NextState, ReadResult, STATUS_REQUEST};

/// Upper bound on an upstream status response.
const MAX_RESPONSE_BYTES: usize = 1024 * 1024;

const READ_CHUNK: usize = 4096;

/// Source of the current time, injectable for tests.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Wall clock backed by [`Instant::now`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Reflector tuning.
#[derive(Debug, Clone, Copy)]
pub struct ReflectorSettings {
    /// How long a fetched count is served without refreshing.
    pub ttl: Duration,
    /// Bound on connecting to and reading from the upstream.
    pub timeout: Duration,
    /// Protocol version announced in the upstream handshake.
    pub protocol_version: i32,
}

impl ReflectorSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            ttl: config.reflector_ttl,
            timeout: config.reflector_timeout,
            protocol_version: config.reflector_protocol_version,
        }
    }
}

#[derive(Debug, Default)]
struct CachedCount {
    online: i32,
    fetched_at: Option<Instant>,
}

/// Cached upstream player count shared by all connections.
pub struct PlayerCountReflector {
    settings: ReflectorSettings,
    cache: RwLock<CachedCount>,
    /// Held for the duration of an upstream query.
    refresh: Mutex<()>,
    clock: Arc<dyn Clock>,
}

impl PlayerCountReflector {
    pub fn new(settings: ReflectorSettings) -> Self {
        Self::with_clock(settings, Arc::new(SystemClock))
    }

    pub fn with_clock(settings: ReflectorSettings, clock: Arc<dyn Clock>) -> Self {
        Self {
            settings,
            cache: RwLock::new(CachedCount::default()),
            refresh: Mutex::new(()),
            clock,
        }
    }

    /// Last known count, fresh or not.
    pub fn cached(&self) -> i32 {
        self.cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .online
    }

    /// The cached count if it is younger than the TTL.
    fn fresh(&self) -> Option<i32> {
        let cache = self.cache.read().unwrap_or_else(PoisonError::into_inner);
        let fetched_at = cache.fetched_at?;
        (self.clock.now().saturating_duration_since(fetched_at) < self.settings.ttl)
            .then_some(cache.online)
    }

    fn store(&self, online: i32, fetched_at: Instant) {
        let mut cache = self.cache.write().unwrap_or_else(PoisonError::into_inner);
        cache.online = online;
        cache.fetched_at = Some(fetched_at);
    }

    /// Online player count of `upstream`. Never fails: any error yields the
    /// last known count (0 before the first successful fetch).
    pub async fn player_count(&self, upstream: &UpstreamAddr) -> i32 {
        if let Some(online) = self.fresh() {
            trace!(%upstream, online, "Serving cached player count");
            return online;
        }

        let Ok(_guard) = self.refresh.try_lock() else {
            let online = self.cached();
            debug!(%upstream, online, "Refresh in flight, serving cached player count");
            return online;
        };

        // Another caller may have finished a refresh since the first check.
        if let Some(online) = self.fresh() {
            return online;
        }

        let started = self.clock.now();
        match query_player_count(upstream, self.settings.protocol_version, self.settings.timeout)
            .await
        {
            Ok(online) => {
                self.store(online, started);
                info!(%upstream, online, "Refreshed reflected player count");
                online
            }
            Err(e) => {
                let online = self.cached();
                warn!(%upstream, error = %e, online, "Failed to fetch player count");
                online
            }
        }
    }
}

/// Upstream query failures.
#[derive(Debug)]
pub enum QueryError {
    Io(io::Error),
    Timeout(Duration),
    /// Upstream closed before sending a complete status object.
    Closed,
    TooLarge(usize),
    Json(serde_json::Error),
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryError::Io(e) => write!(f, "I/O error: {e}"),
            QueryError::Timeout(limit) => write!(f, "timed out after {}ms", limit.as_millis()),
            QueryError::Closed => write!(f, "connection closed before status response"),
            QueryError::TooLarge(len) => write!(f, "status response too large ({len} bytes)"),
            QueryError::Json(e) => write!(f, "malformed status response: {e}"),
        }
    }
}

impl std::error::Error for QueryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            QueryError::Io(e) => Some(e),
            QueryError::Json(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for QueryError {
    fn from(e: io::Error) -> Self {
        QueryError::Io(e)
    }
}

#[derive(Debug, Deserialize)]
struct UpstreamStatus {
    players: UpstreamPlayers,
}

#[derive(Debug, Deserialize)]
struct UpstreamPlayers {
    online: i32,
}

/// Ask `upstream` for its status and return the online player count.
pub async fn query_player_count(
    upstream: &UpstreamAddr,
    protocol_version: i32,
    limit: Duration,
) -> Result<i32, QueryError> {
    match tokio::time::timeout(limit, exchange(upstream, protocol_version)).await {
        Ok(result) => result,
        Err(_) => Err(QueryError::Timeout(limit)),
    }
}

async fn exchange(upstream: &UpstreamAddr, protocol_version: i32) -> Result<i32, QueryError> {
    let mut stream = TcpStream::connect((upstream.host.as_str(), upstream.port)).await?;

    let handshake = Handshake {
        protocol_version,
        hostname: upstream.host.clone(),
        port: upstream.port,
        next_state: NextState::Status,
    };
    let mut request = handshake.encode();
    request.extend_from_slice(&STATUS_REQUEST);
    stream.write_all(&request).await?;

    let mut response = CursorBuffer::with_capacity(READ_CHUNK);
    let mut chunk = BytesMut::with_capacity(READ_CHUNK);
    loop {
        chunk.clear();
        if stream.read_buf(&mut chunk).await? == 0 {
            return Err(QueryError::Closed);
        }
        response.append(&chunk);

        if let Some(status) = extract_status(&mut response) {
            return status.map(|s| s.players.online).map_err(QueryError::Json);
        }
        if response.len() > MAX_RESPONSE_BYTES {
            return Err(QueryError::TooLarge(response.len()));
        }
    }
}

/// Locate and parse the status JSON in the bytes received so far.
///
/// Parsing is lenient: the packet header is skipped when it decodes, and the
/// first balanced `{...}` after that point is taken as the payload. Returns
/// `None` while no complete object has arrived.
fn extract_status(response: &mut CursorBuffer) -> Option<Result<UpstreamStatus, serde_json::Error>> {
    if response.is_empty() {
        return None;
    }
    response.reset_cursor();
    let header = matches!(response.read_varint(5, true), ReadResult::Complete(_))
        && response.read_varint(1, false) == ReadResult::Complete(0)
        && matches!(response.read_varint(3, false), ReadResult::Complete(_));
    if !header {
        response.reset_cursor();
    }

    let object = find_json_object(response.unread())?;
    Some(serde_json::from_slice(object))
}

/// First balanced `{...}` span in `data`, ignoring braces inside strings.
fn find_json_object(data: &[u8]) -> Option<&[u8]> {
    let start = data.iter().position(|&b| b == b'{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in data[start..].iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }

        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&data[start..=start + i]);
                }
            }
            _ => {}
        }
    }

    None
}
