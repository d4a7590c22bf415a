use serde::{Deserialize, Serialize};

/// Default inbound handler: a fixed auto-reply to every live message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    #[serde(default = "d_true")]
    pub auto_reply: bool,
    #[serde(default = "d_reply_text")]
    pub reply_text: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            auto_reply: true,
            reply_text: d_reply_text(),
        }
    }
}

fn d_true() -> bool {
    true
}
fn d_reply_text() -> String {
    "Hello! I am an automated assistant.".into()
}
