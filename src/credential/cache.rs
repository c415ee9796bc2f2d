//! 凭证缓存
//!
//! 以 (来源, 错误上下文指纹) 为键缓存最近一次成功签发的凭证，
//! 用于合并短时间内相同的配额报告。条目 TTL 不超过凭证本身的剩余有效期。

use super::types::{Credential, CredentialOrigin};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;

/// 缓存键
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub origin: CredentialOrigin,
    pub fingerprint: String,
}

impl CacheKey {
    pub fn new(origin: CredentialOrigin, fingerprint: impl Into<String>) -> Self {
        Self {
            origin,
            fingerprint: fingerprint.into(),
        }
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    credential: Credential,
    expires_at: DateTime<Utc>,
}

/// 凭证缓存
#[derive(Debug, Clone)]
pub struct CredentialCache {
    ttl: Duration,
    entries: HashMap<CacheKey, CacheEntry>,
}

impl CredentialCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: HashMap::new(),
        }
    }

    /// 写入条目，TTL 截断到凭证过期时间
    pub fn insert(&mut self, key: CacheKey, credential: Credential, now: DateTime<Utc>) {
        self.prune(now);
        let expires_at = (now + self.ttl).min(credential.expires_at);
        if expires_at <= now {
            return;
        }
        self.entries.insert(
            key,
            CacheEntry {
                credential,
                expires_at,
            },
        );
    }

    /// 读取仍在 TTL 内且剩余有效期超过安全边界的凭证
    pub fn get(&self, key: &CacheKey, now: DateTime<Utc>, safety_margin: Duration) -> Option<&Credential> {
        self.entries
            .get(key)
            .filter(|e| e.expires_at > now && e.credential.is_valid_at(now, safety_margin))
            .map(|e| &e.credential)
    }

    /// 清理过期条目
    pub fn prune(&mut self, now: DateTime<Utc>) {
        self.entries.retain(|_, e| e.expires_at > now);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credential(now: DateTime<Utc>, lifetime_min: i64) -> Credential {
        Credential {
            token: "tok".to_string(),
            expires_at: now + Duration::minutes(lifetime_min),
            origin: CredentialOrigin::Anonymous,
            acquired_at: now,
        }
    }

    #[test]
    fn test_ttl_capped_by_credential_expiry() {
        let now = Utc::now();
        let mut cache = CredentialCache::new(Duration::hours(1));
        let key = CacheKey::new(CredentialOrigin::Anonymous, "fp");
        cache.insert(key.clone(), credential(now, 20), now);

        assert!(cache.get(&key, now, Duration::minutes(5)).is_some());
        // 凭证进入安全边界后不再返回
        assert!(cache.get(&key, now + Duration::minutes(16), Duration::minutes(5)).is_none());
        cache.prune(now + Duration::minutes(21));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_ttl_expires_before_credential() {
        let now = Utc::now();
        let mut cache = CredentialCache::new(Duration::minutes(5));
        let key = CacheKey::new(CredentialOrigin::Anonymous, "fp");
        cache.insert(key.clone(), credential(now, 60), now);
        assert!(cache.get(&key, now + Duration::minutes(4), Duration::minutes(5)).is_some());
        assert!(cache.get(&key, now + Duration::minutes(6), Duration::minutes(5)).is_none());
    }

    #[test]
    fn test_keys_are_distinct() {
        let now = Utc::now();
        let mut cache = CredentialCache::new(Duration::minutes(5));
        cache.insert(CacheKey::new(CredentialOrigin::Anonymous, "a"), credential(now, 60), now);
        assert!(cache
            .get(&CacheKey::new(CredentialOrigin::Anonymous, "b"), now, Duration::zero())
            .is_none());
        assert!(cache
            .get(&CacheKey::new(CredentialOrigin::Personal, "a"), now, Duration::zero())
            .is_none());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_already_expired_credential_not_cached() {
        let now = Utc::now();
        let mut cache = CredentialCache::new(Duration::minutes(5));
        cache.insert(CacheKey::new(CredentialOrigin::Anonymous, "a"), credential(now, -1), now);
        assert!(cache.is_empty());
    }
}
