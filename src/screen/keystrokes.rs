//! Keystroke injection payloads: text (multiplexer send-text path) or
//! symbolic keys (direct proxy path where available).

use serde::{Deserialize, Serialize};
use typeshare::typeshare;

/// A symbolic key name understood by the multiplexer proxy's direct path.
#[typeshare]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolicKey(pub String);

/// One keystroke-injection request.
#[typeshare]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum KeystrokeRequest {
    /// Deliver `text` via the multiplexer's send-text path.
    Text {
        /// The literal text to type.
        text: String,
        /// Append a trailing Enter after `enter_delay_ms`, so the agent's
        /// input handler observes the text committed before the newline.
        with_enter: bool,
        /// Caller override for the configured enter delay, milliseconds.
        enter_delay_ms: Option<u64>,
        /// Explicit opt-in to bypass the dangerous-command guard.
        allow_dangerous: bool,
    },
    /// Deliver a list of symbolic keys via the direct proxy path.
    Keys {
        /// Ordered symbolic keys to send.
        keys: Vec<SymbolicKey>,
    },
    /// Deliver a raw byte payload with no guard applied (e.g. control codes).
    Raw {
        /// Raw bytes, base64-encoded on the wire.
        #[serde(with = "base64_bytes")]
        bytes: Vec<u8>,
    },
}

mod base64_bytes {
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        base64::engine::general_purpose::STANDARD.encode(bytes).serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        base64::engine::general_purpose::STANDARD.decode(s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_request_round_trips_through_json() {
        let req = KeystrokeRequest::Text {
            text: "ls\n".to_owned(),
            with_enter: true,
            enter_delay_ms: Some(20),
            allow_dangerous: false,
        };
        let json = serde_json::to_string(&req).unwrap();
        let back: KeystrokeRequest = serde_json::from_str(&json).unwrap();
        assert!(matches!(back, KeystrokeRequest::Text { with_enter: true, .. }));
    }

    #[test]
    fn raw_bytes_round_trip_via_base64() {
        let req = KeystrokeRequest::Raw { bytes: vec![0x1b, b'[', b'A'] };
        let json = serde_json::to_string(&req).unwrap();
        let back: KeystrokeRequest = serde_json::from_str(&json).unwrap();
        let KeystrokeRequest::Raw { bytes } = back else { panic!("wrong variant") };
        assert_eq!(bytes, vec![0x1b, b'[', b'A']);
    }
}
