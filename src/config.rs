use std::env;

#[derive(Clone, Debug)]
pub struct CoreConfig {
    /// How long resolved user profiles may be served from cache.
    pub profile_cache_ttl_secs: u64,

    /// Capacity applied when group creation does not specify one.
    pub default_max_members: u32,

    /// Whether deleting a group also purges its messages (best-effort,
    /// after deactivation commits).
    pub purge_messages_on_delete: bool,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            profile_cache_ttl_secs: 300,
            default_max_members: 50,
            purge_messages_on_delete: true,
        }
    }
}

impl CoreConfig {
    pub fn profile_cache_ttl(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.profile_cache_ttl_secs)
    }

    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            profile_cache_ttl_secs: env::var("CHATSYNC_PROFILE_CACHE_TTL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.profile_cache_ttl_secs),
            default_max_members: env::var("CHATSYNC_DEFAULT_MAX_MEMBERS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.default_max_members),
            purge_messages_on_delete: env::var("CHATSYNC_PURGE_MESSAGES_ON_DELETE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.purge_messages_on_delete),
        }
    }

    /// Config with test-appropriate values (short cache TTL).
    pub fn test_default() -> Self {
        Self {
            profile_cache_ttl_secs: 1,
            default_max_members: 50,
            purge_messages_on_delete: true,
        }
    }
}
