//! Byte-to-text decoding for child output.

use encoding_rs::Encoding;
use std::borrow::Cow;

/// Incremental decoder for one output stream.
///
/// UTF-8 is tried first. A multi-byte sequence cut by a read boundary is held
/// back until the next chunk. Chunks that are not UTF-8 go through the fallback
/// encodings, and the last resort is a lossy decode, so decoding never fails.
#[derive(Clone)]
pub struct StreamDecoder {
    fallbacks: Vec<&'static Encoding>,
    carry: Vec<u8>,
}

impl StreamDecoder {
    /// Decoder with fallback encodings resolved from WHATWG labels. Unknown
    /// labels are skipped; an empty list selects the platform defaults.
    pub fn new(labels: &[String]) -> Self {
        let fallbacks = if labels.is_empty() {
            default_fallbacks()
        } else {
            labels
                .iter()
                .filter_map(|label| {
                    let found = Encoding::for_label(label.trim().as_bytes());
                    if found.is_none() {
                        log::warn!("ignoring unknown fallback encoding {label:?}");
                    }
                    found
                })
                .collect()
        };
        Self {
            fallbacks,
            carry: Vec::new(),
        }
    }

    pub fn decode(&mut self, bytes: &[u8]) -> String {
        let joined: Cow<'_, [u8]> = if self.carry.is_empty() {
            Cow::Borrowed(bytes)
        } else {
            let mut buf = std::mem::take(&mut self.carry);
            buf.extend_from_slice(bytes);
            Cow::Owned(buf)
        };

        match std::str::from_utf8(&joined) {
            Ok(text) => text.to_owned(),
            Err(err) if err.error_len().is_none() => {
                let valid = err.valid_up_to();
                self.carry = joined[valid..].to_vec();
                String::from_utf8_lossy(&joined[..valid]).into_owned()
            }
            Err(_) => self.decode_fallback(&joined),
        }
    }

    /// Flush held-back bytes at end of stream.
    pub fn finish(&mut self) -> String {
        if self.carry.is_empty() {
            return String::new();
        }
        let carry = std::mem::take(&mut self.carry);
        String::from_utf8_lossy(&carry).into_owned()
    }

    pub fn has_pending(&self) -> bool {
        !self.carry.is_empty()
    }

    fn decode_fallback(&self, bytes: &[u8]) -> String {
        for encoding in &self.fallbacks {
            if let Some(text) = encoding.decode_without_bom_handling_and_without_replacement(bytes)
            {
                log::debug!("decoded non-UTF-8 chunk as {}", encoding.name());
                return text.into_owned();
            }
        }
        String::from_utf8_lossy(bytes).into_owned()
    }
}

fn default_fallbacks() -> Vec<&'static Encoding> {
    if cfg!(windows) {
        vec![
            encoding_rs::GBK,
            encoding_rs::SHIFT_JIS,
            encoding_rs::WINDOWS_1252,
        ]
    } else {
        vec![encoding_rs::WINDOWS_1252]
    }
}
