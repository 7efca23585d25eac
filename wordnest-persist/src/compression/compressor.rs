use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, warn};

/// Offset of the first code point used for codes; keeps every token char
/// outside Latin-1 so plain JSON is never mistaken for a token.
const CODE_BASE: u32 = 0x100;
const SURROGATE_START: u32 = 0xD800;
const SURROGATE_LEN: u32 = 0x800;
/// Dictionary stops growing here so every code still maps to a valid char
const MAX_DICT_SIZE: u32 = 1 << 20;

/// Compression configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompressionConfig {
    /// Enable automatic compression
    pub enabled: bool,
    /// Payloads strictly larger than this are compressed (bytes)
    pub min_payload_size: usize,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_payload_size: 1024, // Don't compress <= 1KB
        }
    }
}

/// Dictionary-substitution (LZW) coder over UTF-8 bytes.
///
/// Tokens are strings whose chars each carry one dictionary code, so they can
/// be embedded in a JSON record as-is.
#[derive(Debug, Clone, Default)]
pub struct Compressor {
    config: CompressionConfig,
}

impl Compressor {
    /// Create new compressor with configuration
    pub fn new(config: CompressionConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CompressionConfig {
        &self.config
    }

    /// Whether a payload of `len` bytes should be compressed by default
    pub fn should_compress(&self, len: usize) -> bool {
        self.config.enabled && len > self.config.min_payload_size
    }

    /// Compress text into a token
    pub fn compress(&self, plain: &str) -> String {
        let mut token = String::new();
        let mut bytes = plain.bytes();
        let Some(first) = bytes.next() else {
            return token;
        };

        let mut dict: HashMap<(u32, u8), u32> = HashMap::new();
        let mut next_code = 256u32;
        let mut w = u32::from(first);

        for byte in bytes {
            match dict.get(&(w, byte)) {
                Some(&code) => w = code,
                None => {
                    token.push(code_to_char(w));
                    if next_code < MAX_DICT_SIZE {
                        dict.insert((w, byte), next_code);
                        next_code += 1;
                    }
                    w = u32::from(byte);
                }
            }
        }
        token.push(code_to_char(w));

        debug!(
            "Compressed: {} → {} bytes (ratio: {:.2}x)",
            plain.len(),
            token.len(),
            self.compression_ratio(plain.len(), token.len())
        );
        token
    }

    /// Decompress a token.
    ///
    /// Input that is not a valid token is returned unchanged.
    pub fn decompress(&self, token: &str) -> String {
        match decode(token).map(String::from_utf8) {
            Some(Ok(plain)) => plain,
            _ => {
                warn!(
                    "Decompression failed for {} byte input, treating as plain text",
                    token.len()
                );
                token.to_string()
            }
        }
    }

    /// Calculate compression ratio
    pub fn compression_ratio(&self, original: usize, compressed: usize) -> f64 {
        if compressed == 0 {
            return 1.0;
        }
        original as f64 / compressed as f64
    }
}

fn code_to_char(code: u32) -> char {
    let mut point = code + CODE_BASE;
    if point >= SURROGATE_START {
        point += SURROGATE_LEN;
    }
    // code < MAX_DICT_SIZE keeps point below char::MAX and off the surrogates
    char::from_u32(point).unwrap_or(char::REPLACEMENT_CHARACTER)
}

fn char_to_code(c: char) -> Option<u32> {
    let point = c as u32;
    if point < CODE_BASE {
        return None;
    }
    let point = if point >= SURROGATE_START + SURROGATE_LEN {
        point - SURROGATE_LEN
    } else {
        point
    };
    let code = point - CODE_BASE;
    (code < MAX_DICT_SIZE).then_some(code)
}

fn decode(token: &str) -> Option<Vec<u8>> {
    let mut out = Vec::with_capacity(token.len() * 2);
    let mut codes = token.chars().map(char_to_code);

    let first = match codes.next() {
        None => return Some(out),
        Some(code) => code? as usize,
    };
    if first >= 256 {
        return None;
    }

    let mut dict: Vec<Vec<u8>> = (0..=255u8).map(|b| vec![b]).collect();
    let mut w = dict[first].clone();
    out.extend_from_slice(&w);

    for code in codes {
        let code = code? as usize;
        let entry = if code < dict.len() {
            dict[code].clone()
        } else if code == dict.len() && dict.len() < MAX_DICT_SIZE as usize {
            let mut entry = w.clone();
            entry.push(w[0]);
            entry
        } else {
            return None;
        };

        out.extend_from_slice(&entry);
        if dict.len() < MAX_DICT_SIZE as usize {
            let mut next = w;
            next.push(entry[0]);
            dict.push(next);
        }
        w = entry;
    }

    Some(out)
}
