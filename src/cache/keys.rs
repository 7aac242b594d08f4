//! Cache key namespaces.
//!
//! All keys written by this crate live under fixed prefixes so they can
//! never collide with unrelated data in the shared store. Lock keys carry
//! their own sub-prefix inside the cache namespace; idempotency keys use a
//! namespace of their own.

/// Prefix for every cache entry.
pub const CACHE_PREFIX: &str = "platform:cache:";

/// Prefix for every idempotency record.
pub const IDEMPOTENCY_PREFIX: &str = "platform:idempotency:";

/// Sub-prefix distinguishing lock entries inside the cache namespace.
pub const LOCK_SUBPREFIX: &str = "lock:";

/// Sub-prefix for breakdown-protection locks.
pub const BREAKDOWN_SUBPREFIX: &str = "breakdown:";

/// Build the lock key for a logical resource.
pub fn lock_key(name: &str) -> String {
    format!("{LOCK_SUBPREFIX}{name}")
}

/// Build the breakdown-protection lock name for a cache key.
pub fn breakdown_lock_name(cache_key: &str) -> String {
    format!("{BREAKDOWN_SUBPREFIX}{cache_key}")
}

/// Build the composite idempotency key for a message.
///
/// The key is relative to [`IDEMPOTENCY_PREFIX`], which the idempotency
/// store applies as its namespace.
pub fn idempotency_key(message_id: &str, destination: &str, consumer_group: &str) -> String {
    format!("{destination}:{consumer_group}:{message_id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_keys_carry_sub_prefix() {
        assert_eq!(lock_key("reload:article:42"), "lock:reload:article:42");
        assert_eq!(
            breakdown_lock_name("article:42"),
            "breakdown:article:42"
        );
    }

    #[test]
    fn idempotency_key_composes_all_parts() {
        let key = idempotency_key("msg-1", "ARTICLE_PUBLISHED", "comment-service-consumer");
        assert_eq!(key, "ARTICLE_PUBLISHED:comment-service-consumer:msg-1");
    }

    #[test]
    fn namespaces_are_disjoint() {
        assert!(!IDEMPOTENCY_PREFIX.starts_with(CACHE_PREFIX));
        assert!(!CACHE_PREFIX.starts_with(IDEMPOTENCY_PREFIX));
    }
}
