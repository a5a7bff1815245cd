use async_trait::async_trait;

use crate::domain::models::event::EventPayload;

/// The event bus's consumer contract (spec §4.5). Implementations must
/// never block the publisher for long — the bus itself enforces bounded
/// buffering and drop-oldest overflow, but a slow `handle` still risks
/// falling behind inside its own subscription.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn handle(&self, payload: &EventPayload);

    /// A human-readable name, used in `subscriber_overflow` events and logs.
    fn name(&self) -> &str;
}
