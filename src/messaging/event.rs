//! Domain event contract.

use serde::Serialize;

/// Capability every publishable event type implements.
///
/// The sender derives the outbox record's aggregate identity and type
/// tags through these accessors at compile time; there is no runtime
/// field lookup. Payloads are serialized with `serde` to a
/// transport-agnostic JSON text.
pub trait DomainEvent: Serialize {
    /// Identity of the aggregate this event belongs to, e.g. the article id.
    fn aggregate_identity(&self) -> String;

    /// Aggregate kind, e.g. `"Article"`.
    fn aggregate_type(&self) -> &'static str;

    /// Event kind, e.g. `"ArticlePublishedEvent"`.
    fn event_type(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Serialize)]
    struct ArticlePublished {
        article_id: String,
        title: String,
    }

    impl DomainEvent for ArticlePublished {
        fn aggregate_identity(&self) -> String {
            self.article_id.clone()
        }

        fn aggregate_type(&self) -> &'static str {
            "Article"
        }

        fn event_type(&self) -> &'static str {
            "ArticlePublishedEvent"
        }
    }

    #[test]
    fn accessors_resolve_statically() {
        let event = ArticlePublished {
            article_id: "42".to_string(),
            title: "hello".to_string(),
        };
        assert_eq!(event.aggregate_identity(), "42");
        assert_eq!(event.aggregate_type(), "Article");
        assert_eq!(event.event_type(), "ArticlePublishedEvent");
    }
}
