use base64::{
    alphabet,
    engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig},
    Engine,
};

use crate::error::{OtoError, OtoResult};

/// Padding is optional in the envelopes found in the wild.
const ENVELOPE_BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

pub const ENVELOPE_VERSION: u8 = 1;
pub const WRAPPED_KEY_LEN: usize = 16;

const NONCE_LEN_OFFSET: usize = 2;
const NONCE_OFFSET: usize = 5;

/// Key-wrapping envelope carried by an encrypted manifest container.
///
/// Layout:
///
/// ```text
/// +---------+-----+-----------+---------+-------------+------------------+
/// | version | ??? | nonce len | ??? ??? | nonce (L)   | wrapped key (16) |
/// |   0x01  |     |     L     |         | UTF-8 text  | one AES block    |
/// +---------+-----+-----------+---------+-------------+------------------+
///      0       1        2         3..5     5..5+L       5+L..5+L+16
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub version: u8,
    pub nonce: String,
    pub wrapped_key: [u8; WRAPPED_KEY_LEN],
}

impl Envelope {
    /// Decode an envelope from its base64 text form.
    pub fn decode(encoded: &str) -> OtoResult<Self> {
        let bytes = ENVELOPE_BASE64.decode(encoded.trim())?;
        Self::from_bytes(&bytes)
    }

    pub fn from_bytes(bytes: &[u8]) -> OtoResult<Self> {
        let version = *bytes.first().ok_or(OtoError::TruncatedEnvelope {
            expected: 1,
            actual: 0,
        })?;
        if version != ENVELOPE_VERSION {
            return Err(OtoError::MalformedEnvelope(format!(
                "unsupported version {version}"
            )));
        }

        let nonce_len = *bytes
            .get(NONCE_LEN_OFFSET)
            .ok_or(OtoError::TruncatedEnvelope {
                expected: NONCE_LEN_OFFSET + 1,
                actual: bytes.len(),
            })? as usize;

        let nonce_end = NONCE_OFFSET + nonce_len;
        let key_end = nonce_end + WRAPPED_KEY_LEN;
        if bytes.len() < key_end {
            return Err(OtoError::TruncatedEnvelope {
                expected: key_end,
                actual: bytes.len(),
            });
        }

        let nonce = std::str::from_utf8(&bytes[NONCE_OFFSET..nonce_end])
            .map_err(|e| OtoError::MalformedEnvelope(format!("nonce is not text: {e}")))?
            .to_string();

        let mut wrapped_key = [0u8; WRAPPED_KEY_LEN];
        wrapped_key.copy_from_slice(&bytes[nonce_end..key_end]);

        Ok(Self {
            version,
            nonce,
            wrapped_key,
        })
    }
}
