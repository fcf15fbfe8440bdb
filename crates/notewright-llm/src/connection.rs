//! TTL-bounded memo of the last connection probe.
//!
//! Constructed once by the application root and shared by `Arc`. The cache
//! only saves redundant probes; it never gates message sending.

use chrono::{DateTime, Duration, Utc};
use std::sync::RwLock;

use crate::types::ProviderKind;

pub const DEFAULT_CACHE_DURATION_SECS: i64 = 300;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionState {
    pub is_connected: bool,
    pub last_check_time: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub provider: Option<ProviderKind>,
}

/// Partial update; `provider: None` keeps the previous provider.
#[derive(Debug, Clone, Default)]
pub struct ConnectionUpdate {
    pub is_connected: bool,
    pub last_error: Option<String>,
    pub provider: Option<ProviderKind>,
}

#[derive(Debug)]
struct Inner {
    state: ConnectionState,
    cache_duration: Duration,
}

#[derive(Debug)]
pub struct ConnectionCache {
    inner: RwLock<Inner>,
}

impl Default for ConnectionCache {
    fn default() -> Self {
        Self::new(Duration::seconds(DEFAULT_CACHE_DURATION_SECS))
    }
}

impl ConnectionCache {
    pub fn new(cache_duration: Duration) -> Self {
        Self {
            inner: RwLock::new(Inner {
                state: ConnectionState::default(),
                cache_duration,
            }),
        }
    }

    fn read<T>(&self, f: impl FnOnce(&Inner) -> T) -> T {
        match self.inner.read() {
            Ok(guard) => f(&guard),
            Err(poisoned) => f(&poisoned.into_inner()),
        }
    }

    fn write<T>(&self, f: impl FnOnce(&mut Inner) -> T) -> T {
        match self.inner.write() {
            Ok(mut guard) => f(&mut guard),
            Err(poisoned) => f(&mut poisoned.into_inner()),
        }
    }

    pub fn is_cache_valid(&self) -> bool {
        self.is_cache_valid_at(Utc::now())
    }

    /// `last_check_time` is set and `now - last_check_time < cache_duration`.
    pub fn is_cache_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.read(|inner| match inner.state.last_check_time {
            Some(checked) => now - checked < inner.cache_duration,
            None => false,
        })
    }

    pub fn update_connection_state(&self, update: ConnectionUpdate) {
        self.update_connection_state_at(update, Utc::now());
    }

    pub fn update_connection_state_at(&self, update: ConnectionUpdate, now: DateTime<Utc>) {
        self.write(|inner| {
            let provider = update.provider.or(inner.state.provider);
            inner.state = ConnectionState {
                is_connected: update.is_connected,
                last_check_time: Some(now),
                last_error: update.last_error,
                provider,
            };
        });
    }

    pub fn clear_cache(&self) {
        self.write(|inner| inner.state = ConnectionState::default());
    }

    pub fn state(&self) -> ConnectionState {
        self.read(|inner| inner.state.clone())
    }

    pub fn cache_duration(&self) -> Duration {
        self.read(|inner| inner.cache_duration)
    }

    pub fn set_cache_duration(&self, duration: Duration) {
        self.write(|inner| inner.cache_duration = duration);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_window() {
        let cache = ConnectionCache::new(Duration::seconds(300));
        let t0 = Utc::now();
        assert!(!cache.is_cache_valid_at(t0));

        cache.update_connection_state_at(
            ConnectionUpdate {
                is_connected: true,
                provider: Some(ProviderKind::Gemini),
                ..Default::default()
            },
            t0,
        );
        assert!(cache.is_cache_valid_at(t0));
        assert!(cache.is_cache_valid_at(t0 + Duration::seconds(299)));
        assert!(!cache.is_cache_valid_at(t0 + Duration::seconds(300)));
    }

    #[test]
    fn test_partial_update_keeps_provider() {
        let cache = ConnectionCache::default();
        cache.update_connection_state(ConnectionUpdate {
            is_connected: true,
            provider: Some(ProviderKind::Groq),
            ..Default::default()
        });
        cache.update_connection_state(ConnectionUpdate {
            is_connected: false,
            last_error: Some("timeout".into()),
            provider: None,
        });
        let state = cache.state();
        assert_eq!(state.provider, Some(ProviderKind::Groq));
        assert!(!state.is_connected);
        assert_eq!(state.last_error.as_deref(), Some("timeout"));
    }

    #[test]
    fn test_clear_cache_resets_everything() {
        let cache = ConnectionCache::default();
        cache.update_connection_state(ConnectionUpdate {
            is_connected: true,
            provider: Some(ProviderKind::Bedrock),
            ..Default::default()
        });
        cache.clear_cache();
        assert_eq!(cache.state(), ConnectionState::default());
        assert!(!cache.is_cache_valid());
    }

    #[test]
    fn test_cache_duration_is_mutable() {
        let cache = ConnectionCache::default();
        cache.update_connection_state(ConnectionUpdate::default());
        assert!(cache.is_cache_valid());
        cache.set_cache_duration(Duration::zero());
        assert!(!cache.is_cache_valid());
    }
}
