use std::fmt;

use crossbeam_channel::{Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    AudioFrame,
    SceneChange,
    ConfigUpdate,
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::AudioFrame => "audio_frame",
            Self::SceneChange => "scene_change",
            Self::ConfigUpdate => "config_update",
        })
    }
}

/// `{type, payload}` envelope handed to the transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundMessage {
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub payload: serde_json::Value,
}

impl OutboundMessage {
    pub fn new(kind: MessageKind, payload: serde_json::Value) -> Self {
        Self { kind, payload }
    }
}

/// Fire-and-forget delivery to whoever is listening.
pub trait FrameSink: Send + Sync {
    fn emit(&self, message: &OutboundMessage);
}

impl<F> FrameSink for F
where
    F: Fn(&OutboundMessage) + Send + Sync,
{
    fn emit(&self, message: &OutboundMessage) {
        self(message)
    }
}

/// Fan-out over bounded subscriber queues.
///
/// A subscriber whose queue is full misses that message; one whose receiver
/// was dropped is removed on the next emit.
#[derive(Debug, Default)]
pub struct SubscriberHub {
    subscribers: Mutex<Vec<Sender<OutboundMessage>>>,
}

impl SubscriberHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, capacity: usize) -> Receiver<OutboundMessage> {
        let (tx, rx) = crossbeam_channel::bounded(capacity.max(1));
        self.subscribers.lock().push(tx);
        rx
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}

impl FrameSink for SubscriberHub {
    fn emit(&self, message: &OutboundMessage) {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|subscriber| match subscriber.try_send(message.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                tracing::trace!(kind = %message.kind, "subscriber queue full, message dropped");
                true
            }
            Err(TrySendError::Disconnected(_)) => false,
        });
    }
}
