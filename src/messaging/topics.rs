//! Destination and consumer-group names shared across the platform.

// User events
pub const USER_REGISTERED: &str = "USER_REGISTERED";
pub const USER_PROFILE_UPDATED: &str = "USER_PROFILE_UPDATED";

// Article events
pub const ARTICLE_CREATED: &str = "ARTICLE_CREATED";
pub const ARTICLE_PUBLISHED: &str = "ARTICLE_PUBLISHED";
pub const ARTICLE_UPDATED: &str = "ARTICLE_UPDATED";
pub const ARTICLE_ARCHIVED: &str = "ARTICLE_ARCHIVED";

// Comment events
pub const COMMENT_CREATED: &str = "COMMENT_CREATED";
pub const COMMENT_DELETED: &str = "COMMENT_DELETED";
pub const COMMENT_MODERATED: &str = "COMMENT_MODERATED";

/// Suffix of the dead-letter destination derived from a topic.
pub const DEAD_LETTER_SUFFIX: &str = "_DLQ";
/// Suffix of the retry destination derived from a topic.
pub const RETRY_SUFFIX: &str = "_RETRY";

// Consumer groups
pub const USER_SERVICE_CONSUMER_GROUP: &str = "user-service-consumer";
pub const ARTICLE_SERVICE_CONSUMER_GROUP: &str = "article-service-consumer";
pub const COMMENT_SERVICE_CONSUMER_GROUP: &str = "comment-service-consumer";

// Producer groups
pub const USER_SERVICE_PRODUCER_GROUP: &str = "user-service-producer";
pub const ARTICLE_SERVICE_PRODUCER_GROUP: &str = "article-service-producer";
pub const COMMENT_SERVICE_PRODUCER_GROUP: &str = "comment-service-producer";
