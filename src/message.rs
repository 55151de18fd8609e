//! Bincode-backed message trait shared by every type crossing a lane.
//!
//! Decoding is capped at [`DECODE_LIMIT`] bytes so a frame cannot claim a
//! container larger than any frame a lane will accept.

use bincode::{
    BorrowDecode,
    Encode,
    borrow_decode_from_slice,
    config::{self, Configuration, LittleEndian, Varint},
    encode_to_vec,
    error::{DecodeError, EncodeError},
};

use crate::lane::MAX_FRAME_LENGTH;

/// Largest number of bytes a decoded message may claim.
pub const DECODE_LIMIT: usize = MAX_FRAME_LENGTH;

/// Bincode configuration used on the wire.
pub type WireConfig = Configuration<LittleEndian, Varint, config::Limit<DECODE_LIMIT>>;

/// Standard bincode configuration limited to [`DECODE_LIMIT`].
#[must_use]
pub fn wire_config() -> WireConfig { config::standard().with_limit::<DECODE_LIMIT>() }

/// Wrapper trait for types that can be written to a lane.
///
/// Any type deriving [`Encode`] and [`bincode::Decode`] implements this trait
/// via a blanket implementation.
pub trait Message: Encode + for<'de> BorrowDecode<'de, ()> {
    /// Serialize the message into a byte vector.
    ///
    /// # Errors
    ///
    /// Returns an [`EncodeError`] if serialization fails.
    fn to_bytes(&self) -> Result<Vec<u8>, EncodeError> { encode_to_vec(self, wire_config()) }

    /// Deserialize a message from a byte slice, returning the message and
    /// the number of bytes consumed.
    ///
    /// # Errors
    ///
    /// Returns a [`DecodeError`] if deserialization fails, including
    /// [`DecodeError::LimitExceeded`] when a length prefix claims more than
    /// [`DECODE_LIMIT`] bytes.
    fn from_bytes(bytes: &[u8]) -> Result<(Self, usize), DecodeError>
    where
        Self: Sized,
    {
        borrow_decode_from_slice(bytes, wire_config())
    }
}

impl<T> Message for T where for<'de> T: Encode + BorrowDecode<'de, ()> {}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::envelope::Envelope;

    /// Varint marker for a following little-endian `u64`.
    const U64_MARKER: u8 = 253;

    #[rstest]
    #[case::max(u64::MAX)]
    #[case::just_over_limit(DECODE_LIMIT as u64 + 1)]
    fn oversized_length_claim_is_a_decode_error(#[case] claimed: u64) {
        let mut bytes = vec![U64_MARKER];
        bytes.extend_from_slice(&claimed.to_le_bytes());

        let err = Envelope::from_bytes(&bytes).expect_err("claim exceeds the limit");
        assert!(matches!(err, DecodeError::LimitExceeded));
    }
}
