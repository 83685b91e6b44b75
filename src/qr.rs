//! QR payload resolution.
//!
//! Turns decoded payload strings into the deduplicated lookup set used by
//! reconciliation. Decoding image bytes is delegated to a [`QrDecoder`].

use std::collections::HashSet;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("Unreadable image: {0}")]
    UnreadableImage(String),

    #[error("Decoder failure: {0}")]
    Decoder(String),
}

/// Extracts QR payload strings from one image.
///
/// Returning an empty list is a normal outcome for a photo with no readable code.
pub trait QrDecoder: Send + Sync {
    fn decode(&self, image: &[u8]) -> Result<Vec<String>, DecodeError>;
}

/// Normalizes decoded payloads into a lookup set
#[derive(Debug, Clone, Copy, Default)]
pub struct QrResolver {
    case_insensitive: bool,
}

impl QrResolver {
    pub fn new(case_insensitive: bool) -> Self {
        Self { case_insensitive }
    }

    pub fn is_case_insensitive(&self) -> bool {
        self.case_insensitive
    }

    /// Normalize a single payload. `None` if nothing is left after trimming.
    pub fn normalize(&self, payload: &str) -> Option<String> {
        let trimmed = payload.trim();
        if trimmed.is_empty() {
            return None;
        }
        Some(if self.case_insensitive {
            trimmed.to_lowercase()
        } else {
            trimmed.to_string()
        })
    }

    /// Trim, optionally case-fold, drop empties and deduplicate
    pub fn resolve<I, S>(&self, payloads: I) -> HashSet<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        payloads
            .into_iter()
            .filter_map(|p| self.normalize(p.as_ref()))
            .collect()
    }
}
