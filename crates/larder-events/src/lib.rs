use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

/// Message envelope (RFC3339 time). `kind` mirrors the payload's `type` tag.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Envelope {
    pub time: String,
    pub kind: String,
    pub payload: Value,
}

impl Envelope {
    pub fn new<T: Serialize>(kind: &str, payload: &T) -> Self {
        let now = chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true);
        let val =
            serde_json::to_value(payload).unwrap_or_else(|_| serde_json::json!({"_ser":"error"}));
        Self {
            time: now,
            kind: kind.to_string(),
            payload: val,
        }
    }

    /// Decode the payload into a typed message.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.payload.clone())
    }
}

/// Sending half of an ordered, lossless message channel.
///
/// Posting never blocks; a closed peer is reported through the return value
/// so callers can stop producing.
#[derive(Clone, Debug)]
pub struct Outbox {
    tx: mpsc::UnboundedSender<Envelope>,
}

impl Outbox {
    pub fn post<T: Serialize>(&self, kind: &str, payload: &T) -> bool {
        self.post_envelope(Envelope::new(kind, payload))
    }

    pub fn post_envelope(&self, envelope: Envelope) -> bool {
        let kind = envelope.kind.clone();
        match self.tx.send(envelope) {
            Ok(()) => true,
            Err(_) => {
                tracing::debug!(target: "larder::events", %kind, "receiver gone; message dropped");
                false
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Receiving half of the channel.
#[derive(Debug)]
pub struct Inbox {
    rx: mpsc::UnboundedReceiver<Envelope>,
}

impl Inbox {
    pub async fn recv(&mut self) -> Option<Envelope> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Envelope> {
        self.rx.try_recv().ok()
    }
}

pub fn channel() -> (Outbox, Inbox) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Outbox { tx }, Inbox { rx })
}
