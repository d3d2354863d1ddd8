//! Distributed tier (L2) abstraction.
//!
//! Keys at this level are physical keys, prefix included. [`RedisTier`] is the
//! production backend; [`MemoryTier`] is a shared in-process stand-in used by
//! single-node setups and tests that simulate several instances.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use redis::AsyncCommands;

use crate::connection::RedisConnection;
use crate::error::CacheError;

/// Keys requested per SCAN round trip.
const SCAN_BATCH: usize = 250;

#[async_trait]
pub trait DistributedTier: Send + Sync {
    fn name(&self) -> &'static str;

    async fn is_available(&self) -> bool;

    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError>;

    /// Remaining lifetime of `key`: `None` when it never expires, zero when
    /// it does not exist.
    async fn ttl(&self, key: &str) -> Result<Option<Duration>, CacheError>;

    /// Delete one key. Returns whether it existed.
    async fn delete(&self, key: &str) -> Result<bool, CacheError>;

    /// Enumerate every key matching the glob `pattern` across all endpoints.
    async fn scan_keys(&self, pattern: &str) -> Result<Vec<String>, CacheError>;
}

/// Redis-backed distributed tier.
#[derive(Clone, Debug)]
pub struct RedisTier {
    conn: RedisConnection,
}

impl RedisTier {
    pub fn new(conn: RedisConnection) -> Self {
        Self { conn }
    }

    pub fn connection(&self) -> &RedisConnection {
        &self.conn
    }

    async fn bounded<T, F>(&self, fut: F) -> Result<T, CacheError>
    where
        T: Send,
        F: std::future::Future<Output = Result<T, CacheError>> + Send,
    {
        let timeout = self.conn.operation_timeout();
        tokio::time::timeout(timeout, fut)
            .await
            .map_err(|_| CacheError::Timeout(timeout.as_millis() as u64))?
    }
}

#[async_trait]
impl DistributedTier for RedisTier {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn is_available(&self) -> bool {
        self.conn.is_connected().await
    }

    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        self.bounded(async {
            let mut conn = self.conn.pool().get().await?;
            let value: Option<String> = conn.get(key).await?;
            Ok(value)
        })
        .await
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        let ttl_secs = ttl.as_secs().max(1);
        self.bounded(async {
            let mut conn = self.conn.pool().get().await?;
            conn.set_ex::<_, _, ()>(key, value, ttl_secs).await?;
            Ok(())
        })
        .await
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>, CacheError> {
        self.bounded(async {
            let mut conn = self.conn.pool().get().await?;
            let millis: i64 = redis::cmd("PTTL").arg(key).query_async(&mut conn).await?;
            // -1: no expiry, -2: no such key.
            Ok(match millis {
                -1 => None,
                ms if ms < 0 => Some(Duration::ZERO),
                ms => Some(Duration::from_millis(ms as u64)),
            })
        })
        .await
    }

    async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        self.bounded(async {
            let mut conn = self.conn.pool().get().await?;
            let removed: usize = conn.del(key).await?;
            Ok(removed > 0)
        })
        .await
    }

    async fn scan_keys(&self, pattern: &str) -> Result<Vec<String>, CacheError> {
        let mut keys = Vec::new();
        for endpoint in self.conn.endpoints() {
            let found = if endpoint == self.conn.url() {
                self.bounded(async {
                    let mut conn = self.conn.pool().get().await?;
                    scan_match(&mut conn, pattern).await
                })
                .await?
            } else {
                self.bounded(async {
                    let client = redis::Client::open(endpoint.as_str())?;
                    let mut conn = client.get_multiplexed_async_connection().await?;
                    scan_match(&mut conn, pattern).await
                })
                .await?
            };
            tracing::debug!(endpoint = %crate::connection::mask_url(endpoint), pattern = %pattern, count = found.len(), "scanned keys");
            keys.extend(found);
        }
        keys.sort_unstable();
        keys.dedup();
        Ok(keys)
    }
}

/// Cursor loop over `SCAN MATCH pattern`.
async fn scan_match<C>(conn: &mut C, pattern: &str) -> Result<Vec<String>, CacheError>
where
    C: redis::aio::ConnectionLike + Send,
{
    let mut keys = Vec::new();
    let mut cursor: u64 = 0;
    loop {
        let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
            .arg(cursor)
            .arg("MATCH")
            .arg(pattern)
            .arg("COUNT")
            .arg(SCAN_BATCH)
            .query_async(conn)
            .await?;
        keys.extend(batch);
        if next == 0 {
            break;
        }
        cursor = next;
    }
    Ok(keys)
}

#[derive(Clone, Debug)]
struct StoredValue {
    data: String,
    expires_at: Instant,
}

/// In-process distributed tier.
///
/// Clones share the same map, so two stores built over clones of one
/// `MemoryTier` behave like two instances sharing one Redis.
#[derive(Clone, Default)]
pub struct MemoryTier {
    map: Arc<DashMap<String, StoredValue>>,
}

impl MemoryTier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

#[async_trait]
impl DistributedTier for MemoryTier {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn is_available(&self) -> bool {
        true
    }

    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        if let Some(entry) = self.map.get(key) {
            if entry.expires_at > Instant::now() {
                return Ok(Some(entry.data.clone()));
            }
        }
        self.map
            .remove_if(key, |_, entry| entry.expires_at <= Instant::now());
        Ok(None)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        self.map.insert(
            key.to_string(),
            StoredValue {
                data: value.to_string(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>, CacheError> {
        let now = Instant::now();
        Ok(Some(self.map.get(key).map_or(Duration::ZERO, |entry| {
            entry.expires_at.saturating_duration_since(now)
        })))
    }

    async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        Ok(self.map.remove(key).is_some())
    }

    async fn scan_keys(&self, pattern: &str) -> Result<Vec<String>, CacheError> {
        let now = Instant::now();
        Ok(self
            .map
            .iter()
            .filter(|entry| entry.expires_at > now && glob_match(pattern, entry.key()))
            .map(|entry| entry.key().clone())
            .collect())
    }
}

/// Redis-style glob matching: `*`, `?`, `[abc]`, `[a-z]`, `[^a]` and `\` escapes.
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();

    let (mut pi, mut ti) = (0, 0);
    let mut star: Option<(usize, usize)> = None;

    while ti < t.len() {
        if pi < p.len() {
            match p[pi] {
                '*' => {
                    star = Some((pi, ti));
                    pi += 1;
                    continue;
                }
                '?' => {
                    pi += 1;
                    ti += 1;
                    continue;
                }
                '[' => {
                    if let Some((matched, next)) = match_class(&p, pi, t[ti]) {
                        if matched {
                            pi = next;
                            ti += 1;
                            continue;
                        }
                    } else if t[ti] == '[' {
                        pi += 1;
                        ti += 1;
                        continue;
                    }
                }
                '\\' if pi + 1 < p.len() => {
                    if p[pi + 1] == t[ti] {
                        pi += 2;
                        ti += 1;
                        continue;
                    }
                }
                c => {
                    if c == t[ti] {
                        pi += 1;
                        ti += 1;
                        continue;
                    }
                }
            }
        }

        match star {
            Some((star_pi, star_ti)) => {
                pi = star_pi + 1;
                ti = star_ti + 1;
                star = Some((star_pi, star_ti + 1));
            }
            None => return false,
        }
    }

    p[pi..].iter().all(|&c| c == '*')
}

/// Match `c` against the class starting at `p[start] == '['`.
/// Returns `(matched, index after ']')`, or `None` if the class is unterminated.
fn match_class(p: &[char], start: usize, c: char) -> Option<(bool, usize)> {
    let mut i = start + 1;
    let negate = matches!(p.get(i), Some('^'));
    if negate {
        i += 1;
    }

    let mut matched = false;
    let mut first = true;
    while i < p.len() {
        if p[i] == ']' && !first {
            return Some((matched != negate, i + 1));
        }
        first = false;

        let lo = if p[i] == '\\' && i + 1 < p.len() {
            i += 1;
            p[i]
        } else {
            p[i]
        };

        if i + 2 < p.len() && p[i + 1] == '-' && p[i + 2] != ']' {
            let hi = p[i + 2];
            if lo <= c && c <= hi {
                matched = true;
            }
            i += 3;
        } else {
            if lo == c {
                matched = true;
            }
            i += 1;
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn glob_star_and_question() {
        assert!(glob_match("PROJECT:*", "PROJECT:ID:1"));
        assert!(glob_match("PROJECT:*", "PROJECT:"));
        assert!(!glob_match("PROJECT:*", "PROJECT"));
        assert!(glob_match("*", ""));
        assert!(glob_match("USER:ID:?", "USER:ID:7"));
        assert!(!glob_match("USER:ID:?", "USER:ID:17"));
        assert!(glob_match("Sharing_*:LIST", "Sharing_VEHICLE:LIST"));
    }

    #[test]
    fn glob_classes_and_escapes() {
        assert!(glob_match("ID:[0-9]", "ID:4"));
        assert!(!glob_match("ID:[^0-9]", "ID:4"));
        assert!(glob_match("a[bc]d", "acd"));
        assert!(glob_match(r"literal\*", "literal*"));
        assert!(!glob_match(r"literal\*", "literalX"));
    }

    #[tokio::test]
    async fn memory_tier_scan_and_expiry() {
        let tier = MemoryTier::new();
        tier.set("Sharing_A:1", "1", Duration::from_secs(60)).await.unwrap();
        tier.set("Sharing_A:2", "2", Duration::from_secs(60)).await.unwrap();
        tier.set("Sharing_B:1", "3", Duration::ZERO).await.unwrap();

        let mut keys = tier.scan_keys("Sharing_*").await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["Sharing_A:1", "Sharing_A:2"]);
        assert_eq!(tier.get("Sharing_B:1").await.unwrap(), None);
        assert!(tier.delete("Sharing_A:1").await.unwrap());
        assert!(!tier.delete("Sharing_A:1").await.unwrap());
    }

    #[tokio::test]
    async fn memory_tier_reports_remaining_lifetime() {
        let tier = MemoryTier::new();
        tier.set("Sharing_V:1", "1", Duration::from_secs(900)).await.unwrap();

        let left = tier.ttl("Sharing_V:1").await.unwrap().unwrap();
        assert!(left <= Duration::from_secs(900));
        assert!(left > Duration::from_secs(890));
        assert_eq!(tier.ttl("Sharing_V:2").await.unwrap(), Some(Duration::ZERO));
    }
}
