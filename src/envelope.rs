//! Binary framing for envelope-encrypted payloads
//!
//! An envelope frame prepends the data key id to the ciphertext:
//!
//! ```text
//! '#' <base64(key id)> '#' <ciphertext>
//! ```
//!
//! where base64 is the raw (unpadded) standard alphabet. A blob without the
//! leading `'#'` is a legacy payload encrypted directly under the master key
//! and is routed to the legacy path by the caller. The codec performs no
//! cryptography.

use base64::engine::general_purpose::STANDARD_NO_PAD;
use base64::Engine;

use crate::error::{Error, Result};

/// Frame delimiter
const SENTINEL: u8 = b'#';

/// A decoded payload
#[derive(Debug, PartialEq, Eq)]
pub enum Envelope<'a> {
    /// A blob produced before envelope encryption was enabled; decrypts
    /// under the process-wide master key
    Legacy(&'a [u8]),

    /// An envelope frame carrying the id of the data key that encrypted it
    Framed {
        key_id: String,
        ciphertext: &'a [u8],
    },
}

/// Frames a ciphertext under the given data key id
pub fn encode(key_id: &str, ciphertext: &[u8]) -> Vec<u8> {
    let encoded = STANDARD_NO_PAD.encode(key_id.as_bytes());

    let mut blob = Vec::with_capacity(encoded.len() + 2 + ciphertext.len());
    blob.push(SENTINEL);
    blob.extend_from_slice(encoded.as_bytes());
    blob.push(SENTINEL);
    blob.extend_from_slice(ciphertext);
    blob
}

/// Parses a payload into a legacy blob or an envelope frame
pub fn decode(payload: &[u8]) -> Result<Envelope<'_>> {
    if payload.is_empty() {
        return Err(Error::EmptyPayload);
    }

    if payload[0] != SENTINEL {
        return Ok(Envelope::Legacy(payload));
    }

    let rest = &payload[1..];
    let end_of_key = rest
        .iter()
        .position(|&b| b == SENTINEL)
        .ok_or(Error::MalformedFrame)?;

    let key_id = STANDARD_NO_PAD
        .decode(&rest[..end_of_key])
        .map_err(|_| Error::MalformedFrame)?;
    let key_id = String::from_utf8(key_id).map_err(|_| Error::MalformedFrame)?;

    Ok(Envelope::Framed {
        key_id,
        ciphertext: &rest[end_of_key + 1..],
    })
}
