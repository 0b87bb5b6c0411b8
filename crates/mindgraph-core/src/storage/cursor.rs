//! Opaque pagination cursors
//!
//! A cursor is the URL-safe base64 of the last sort key of a page.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;

use crate::error::{Error, Result};

/// Encode a sort key as a cursor
pub fn encode(sort_key: &str) -> String {
    URL_SAFE_NO_PAD.encode(sort_key.as_bytes())
}

/// Decode a cursor produced by [`encode`]
pub fn decode(cursor: &str) -> Result<String> {
    let bytes = URL_SAFE_NO_PAD
        .decode(cursor.trim())
        .map_err(|_| Error::validation("cursor", "malformed pagination cursor"))?;
    String::from_utf8(bytes).map_err(|_| Error::validation("cursor", "malformed pagination cursor"))
}

/// Decode an optional cursor
pub fn decode_opt(cursor: Option<&str>) -> Result<Option<String>> {
    cursor.map(decode).transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cursor_is_url_safe() {
        let cursor = encode("NODE#0c1d?+/==");
        assert!(!cursor.contains('+'));
        assert!(!cursor.contains('/'));
        assert!(!cursor.contains('='));
        assert_eq!(decode(&cursor).unwrap(), "NODE#0c1d?+/==");
    }

    #[test]
    fn test_garbage_cursor_is_validation_error() {
        let err = decode("***").unwrap_err();
        assert_eq!(err.code(), "E100");
        assert!(decode_opt(None).unwrap().is_none());
    }
}
