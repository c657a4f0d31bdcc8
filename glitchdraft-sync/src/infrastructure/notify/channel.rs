use tokio::sync::broadcast;
use tracing::trace;

use crate::domain::model::SyncEvent;
use crate::domain::repository::UiNotifier;

const CHANNEL_CAPACITY: usize = 64;

/// 基于 broadcast 通道的 UI 通知；已关闭的订阅方自动移除
#[derive(Clone)]
pub struct BroadcastNotifier {
    sender: broadcast::Sender<SyncEvent>,
}

impl BroadcastNotifier {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    /// 注册一个 UI 订阅方
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for BroadcastNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl UiNotifier for BroadcastNotifier {
    fn broadcast(&self, event: &SyncEvent) -> usize {
        match self.sender.send(event.clone()) {
            Ok(delivered) => delivered,
            Err(_) => {
                trace!("no ui subscribers for sync event");
                0
            }
        }
    }
}
