//! Acknowledgement wire format.
//!
//! The server has no framing: whatever a single receive returns (up to
//! [`MAX_MESSAGE_SIZE`] bytes) is one message, and every message is answered
//! with exactly one acknowledgement.
//!
//! ```text
//! Request:  PING
//! Response: SERVER_ACK: PING
//! ```

use bytes::BytesMut;
use std::str::Utf8Error;

/// Largest chunk a handler reads per receive call.
pub const MAX_MESSAGE_SIZE: usize = 1024;

/// Prefix of every echo response.
pub const ACK_PREFIX: &[u8] = b"SERVER_ACK: ";

/// Decode one received chunk as UTF-8 text.
///
/// Chunks are not reassembled, so a multibyte character split across two
/// reads fails here.
pub fn decode(chunk: &[u8]) -> Result<&str, Utf8Error> {
    std::str::from_utf8(chunk)
}

/// Format an echo acknowledgement for `text`.
pub fn response_ack(text: &str) -> BytesMut {
    let mut response = BytesMut::with_capacity(ACK_PREFIX.len() + text.len());
    response.extend_from_slice(ACK_PREFIX);
    response.extend_from_slice(text.as_bytes());
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_ack() {
        assert_eq!(&response_ack("PING")[..], b"SERVER_ACK: PING");
        assert_eq!(&response_ack("hello world")[..], b"SERVER_ACK: hello world");
    }

    #[test]
    fn test_response_ack_multibyte() {
        let ack = response_ack("héllo ✓");
        assert_eq!(&ack[..], "SERVER_ACK: héllo ✓".as_bytes());
    }

    #[test]
    fn test_decode_valid() {
        assert_eq!(decode(b"SELECT 1").unwrap(), "SELECT 1");
    }

    #[test]
    fn test_decode_invalid() {
        assert!(decode(&[0xff, 0xfe, 0xfd]).is_err());
    }

    #[test]
    fn test_decode_split_character() {
        // First two bytes of the three-byte encoding of '✓'
        let bytes = "✓".as_bytes();
        assert!(decode(&bytes[..2]).is_err());
    }
}
