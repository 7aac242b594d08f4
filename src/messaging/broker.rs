//! Message broker contract.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("broker send failed: {0}")]
    Send(String),
    #[error("no broker configured")]
    NotConfigured,
}

/// Contract of the message broker client supplied by the host service.
///
/// The payload is the serialized event text; the optional ordering key is
/// forwarded to the broker's own ordering mechanism (dispatch order is
/// not an ordering guarantee).
#[async_trait]
pub trait BrokerClient: Send + Sync {
    async fn send(
        &self,
        destination: &str,
        payload: &str,
        ordering_key: Option<&str>,
    ) -> Result<(), BrokerError>;

    /// Liveness round trip used for health marking.
    async fn probe_liveness(&self) -> bool;
}

/// Broker wiring, resolved once at startup.
///
/// Instances without a configured broker run `Disabled` and route every
/// send through the outbox; call sites branch on this sum type instead of
/// sprinkling null checks.
#[derive(Clone)]
pub enum Broker {
    Connected(Arc<dyn BrokerClient>),
    Disabled,
}

impl Broker {
    pub fn is_configured(&self) -> bool {
        matches!(self, Self::Connected(_))
    }

    pub fn client(&self) -> Option<&Arc<dyn BrokerClient>> {
        match self {
            Self::Connected(client) => Some(client),
            Self::Disabled => None,
        }
    }
}
