use serde::{Deserialize, Serialize};

/// Inbound message from the transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlMessage {
    /// Position report from a remote player driving a file source.
    TransportSync {
        playing: bool,
        #[serde(default)]
        position_seconds: f64,
    },
    /// Manual scene override.
    SwitchScene {
        scene: String,
        #[serde(default)]
        effect: Option<serde_json::Value>,
    },
    SetGlobal {
        key: String,
        value: serde_json::Value,
    },
}

impl ControlMessage {
    pub fn from_json(line: &str) -> serde_json::Result<Self> {
        serde_json::from_str(line)
    }
}
