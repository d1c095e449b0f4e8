//! Text decoding for raw artifacts
//!
//! The whole file is decoded with one encoding: UTF-8 when the bytes are
//! valid UTF-8, Latin-1 otherwise. Latin-1 maps every byte to a code
//! point, so decoding cannot fail.

use serde::Serialize;

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TextEncoding {
    Utf8,
    Latin1,
}

impl TextEncoding {
    pub fn as_str(&self) -> &str {
        match self {
            TextEncoding::Utf8 => "utf-8",
            TextEncoding::Latin1 => "latin-1",
        }
    }
}

impl std::fmt::Display for TextEncoding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decode `bytes`, dropping a leading UTF-8 byte order mark
pub fn decode_text(bytes: Vec<u8>) -> (String, TextEncoding) {
    let bytes = if bytes.starts_with(UTF8_BOM) {
        bytes[UTF8_BOM.len()..].to_vec()
    } else {
        bytes
    };

    match String::from_utf8(bytes) {
        Ok(text) => (text, TextEncoding::Utf8),
        Err(e) => {
            let text = e.as_bytes().iter().map(|&b| char::from(b)).collect();
            (text, TextEncoding::Latin1)
        },
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_utf8_passes_through() {
        let (text, encoding) = decode_text("CERT,NAME\n1,Caf\u{e9}\n".as_bytes().to_vec());
        assert_eq!(encoding, TextEncoding::Utf8);
        assert!(text.contains("Caf\u{e9}"));
    }

    #[test]
    fn test_invalid_utf8_falls_back_for_whole_file() {
        // 0xE9 alone is "é" in Latin-1 and invalid UTF-8; the valid 2-byte
        // sequence on the first row is decoded as Latin-1 too
        let bytes = b"CERT,NAME\n1,\xC3\xA9\n2,Caf\xE9\n".to_vec();
        let (text, encoding) = decode_text(bytes);
        assert_eq!(encoding, TextEncoding::Latin1);
        assert!(text.contains("Caf\u{e9}"));
        assert!(text.contains("\u{c3}\u{a9}"));
    }

    #[test]
    fn test_bom_is_stripped() {
        let (text, _) = decode_text(b"\xEF\xBB\xBFCERT\n1\n".to_vec());
        assert!(text.starts_with("CERT"));
    }
}
