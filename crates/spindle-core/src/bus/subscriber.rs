//! Subscribe trait - ローカル購読者
//!
//! Each subscriber added with [`EventBus::add_subscriber`](super::EventBus::add_subscriber)
//! gets its own broadcast receiver and worker task, so a slow subscriber never
//! blocks publishers or other subscribers. A subscriber that falls behind the
//! broadcast ring skips the oldest events (logged).

use async_trait::async_trait;

use super::BusEvent;

#[async_trait]
pub trait Subscribe: Send + Sync + 'static {
    async fn on_event(&self, event: &BusEvent);

    /// Name used in logs.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}
