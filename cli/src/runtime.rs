use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use aquakeeper_core::bot::Bot;
use aquakeeper_core::service::AquaService;
use aquakeeper_core::session::SessionStore;
use aquakeeper_core::telegram::Update;
use tracing::{debug, info};

use crate::telegram::{Outbound, deliver};

const MAX_EVICTION_INTERVAL: Duration = Duration::from_secs(60);

/// Shared state for the webhook and polling front ends.
pub struct BotRuntime {
    svc: Mutex<AquaService>,
    bot: Bot,
    outbound: Arc<dyn Outbound>,
}

impl BotRuntime {
    pub fn new(svc: AquaService, outbound: Arc<dyn Outbound>) -> Self {
        Self {
            svc: Mutex::new(svc),
            bot: Bot::default(),
            outbound,
        }
    }

    /// Run one message through the bot and return its replies.
    pub fn replies(&self, user_id: i64, text: &str) -> Vec<String> {
        let svc = self.svc.lock().unwrap_or_else(PoisonError::into_inner);
        self.bot.handle(&svc, user_id, text)
    }

    /// Handle an update end to end: extract the text, answer, deliver replies.
    pub async fn process(&self, update: &Update) {
        let Some(inbound) = update.inbound() else {
            debug!(update_id = update.update_id, "ignoring update without text");
            return;
        };
        let replies = self.replies(inbound.user_id, &inbound.text);
        deliver(self.outbound.as_ref(), inbound.chat_id, &replies).await;
    }

    pub fn evict_stale(&self, ttl: Duration) -> usize {
        self.bot.sessions().evict_stale(ttl)
    }

    /// Periodically drop sessions idle for longer than `ttl`.
    pub fn spawn_evictor(self: &Arc<Self>, ttl: Duration) -> tokio::task::JoinHandle<()> {
        let runtime = Arc::clone(self);
        let period = ttl.clamp(Duration::from_secs(1), MAX_EVICTION_INTERVAL);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                let evicted = runtime.evict_stale(ttl);
                if evicted > 0 {
                    info!(evicted, "evicted idle sessions");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telegram::testing::RecordingOutbound;

    fn runtime() -> (Arc<BotRuntime>, Arc<RecordingOutbound>) {
        let outbound = Arc::new(RecordingOutbound::default());
        let runtime = BotRuntime::new(AquaService::new_in_memory().unwrap(), outbound.clone());
        (Arc::new(runtime), outbound)
    }

    fn update(json: &str) -> Update {
        serde_json::from_str(json).unwrap()
    }

    #[tokio::test]
    async fn test_process_replies_to_chat() {
        let (runtime, outbound) = runtime();
        runtime
            .process(&update(
                r#"{"update_id": 1, "message": {"message_id": 1, "from": {"id": 7}, "chat": {"id": -50}, "text": "/add_aq Main 60"}}"#,
            ))
            .await;
        let sent = outbound.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, -50);
        assert!(sent[0].1.contains("Main"));

        // Sessions and aquariums are keyed by the sender, not the chat
        assert!(runtime.replies(7, "/aquariums")[0].contains("Main"));
        assert!(runtime.replies(-50, "/aquariums")[0].contains("no aquariums"));
    }

    #[tokio::test]
    async fn test_process_ignores_non_text() {
        let (runtime, outbound) = runtime();
        runtime
            .process(&update(r#"{"update_id": 2, "message": {"message_id": 1, "chat": {"id": 5}}}"#))
            .await;
        assert!(outbound.sent().is_empty());
    }

    #[tokio::test]
    async fn test_evict_stale() {
        let (runtime, _) = runtime();
        runtime.replies(1, "/add_aq");
        assert_eq!(runtime.evict_stale(Duration::from_secs(3600)), 0);
        assert_eq!(runtime.evict_stale(Duration::ZERO), 1);
        assert!(runtime.replies(1, "Tank")[0].contains("/help"));
    }
}
