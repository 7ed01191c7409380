//! Signed-text encoding
//!
//! Display names and message bodies share one wire shape: a payload followed by
//! a newline and a detached suffix. The same shape is used twice per message:
//!
//! - the bytes handed to the signer are `payload + "\n" + context`, where the
//!   context is a Matrix user ID
//! - the bytes broadcast to a room are `payload + "\n" + signature`
//!
//! Folding the context into the signed bytes binds a signature to one claimed
//! identity, so it cannot be replayed under a different sender.

use crate::chain::Signature;

/// Separator between payload and suffix.
pub const SEPARATOR: char = '\n';

/// Codec errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("Missing newline separator between payload and signature")]
    MissingSeparator,

    #[error("Invalid signature suffix: {0}")]
    InvalidSignature(String),
}

/// Join a payload with its context or signature suffix.
pub fn encode(payload: &str, suffix: &str) -> String {
    let mut out = String::with_capacity(payload.len() + suffix.len() + 1);
    out.push_str(payload);
    out.push(SEPARATOR);
    out.push_str(suffix);
    out
}

/// Split a composite string on its last newline.
///
/// The payload may itself contain newlines; the suffix never does.
pub fn split(raw: &str) -> Result<(&str, &str), CodecError> {
    raw.rsplit_once(SEPARATOR).ok_or(CodecError::MissingSeparator)
}

/// A payload paired with the detached signature that travels after it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedText {
    pub payload: String,
    pub signature: Signature,
}

impl SignedText {
    pub fn new(payload: impl Into<String>, signature: Signature) -> Self {
        Self {
            payload: payload.into(),
            signature,
        }
    }

    /// Parse a message body of the form `payload\nsignature`.
    pub fn parse(raw: &str) -> Result<Self, CodecError> {
        let (payload, signature) = split(raw)?;
        let signature = Signature::parse(signature)
            .map_err(|e| CodecError::InvalidSignature(e.to_string()))?;
        Ok(Self::new(payload, signature))
    }

    /// The exact bytes that were signed for this payload under `context`.
    pub fn signing_input(&self, context: &str) -> String {
        encode(&self.payload, context)
    }

    /// Render as a message body.
    pub fn to_body(&self) -> String {
        encode(&self.payload, self.signature.as_str())
    }
}
