//! Opaque pagination cursors.
//!
//! A cursor is any serializable value, encoded as URL-safe base64 of its JSON. Clients must treat
//! cursors as opaque strings and hand them back unchanged.

use serde::de::DeserializeOwned;
use serde::Serialize;

pub fn encode<T: Serialize>(value: &T) -> Option<String> {
    let json = serde_json::to_vec(value).ok()?;
    Some(base64::encode_config(&json, base64::URL_SAFE_NO_PAD))
}

/// Decode a cursor. Anything malformed decodes to `None`.
pub fn decode<T: DeserializeOwned>(cursor: &str) -> Option<T> {
    let json = base64::decode_config(cursor, base64::URL_SAFE_NO_PAD).ok()?;
    serde_json::from_slice(&json).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct PostCursor {
        p: String,
        s: String,
    }

    #[test]
    fn test_cursor() {
        let cursor = PostCursor {
            p: "ARTISTS#abcd".to_string(),
            s: "POST#BYTIME#2024-01-01T00:00:00.000Z#hello".to_string(),
        };
        let encoded = encode(&cursor).unwrap();
        assert!(!encoded.contains('='));
        assert_eq!(decode::<PostCursor>(&encoded), Some(cursor));
        assert_eq!(decode::<PostCursor>("not a cursor!"), None);
        assert_eq!(decode::<PostCursor>(&encode(&42).unwrap()), None);
    }
}
