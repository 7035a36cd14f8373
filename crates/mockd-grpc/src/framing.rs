//! gRPC message framing: 1-byte compression flag + 4-byte big-endian length

use bytes::Bytes;

/// Wrap one message payload in a gRPC data frame (uncompressed)
pub fn encode_frame(message: &[u8]) -> Bytes {
    let mut out = Vec::with_capacity(message.len() + 5);
    out.push(0);
    out.extend_from_slice(&(message.len() as u32).to_be_bytes());
    out.extend_from_slice(message);
    Bytes::from(out)
}

/// Split a request body into message payloads. Compressed frames and
/// truncated tails are dropped.
pub fn decode_frames(mut buf: &[u8]) -> Vec<Vec<u8>> {
    let mut frames = Vec::new();
    while buf.len() >= 5 {
        let compressed = buf[0] != 0;
        let len = u32::from_be_bytes([buf[1], buf[2], buf[3], buf[4]]) as usize;
        let Some(payload) = buf.get(5..5 + len) else {
            break;
        };
        if !compressed {
            frames.push(payload.to_vec());
        }
        buf = &buf[5 + len..];
    }
    frames
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_roundtrip() {
        let frame = encode_frame(b"abc");
        let frames = decode_frames(&frame);
        assert_eq!(frames, vec![b"abc".to_vec()]);
    }

    #[test]
    fn multiple_frames() {
        let mut buf = encode_frame(b"one").to_vec();
        buf.extend_from_slice(&encode_frame(b"two"));
        assert_eq!(decode_frames(&buf).len(), 2);
    }

    #[test]
    fn truncated_tail_ignored() {
        let mut buf = encode_frame(b"whole").to_vec();
        buf.extend_from_slice(&[0, 0, 0, 0, 9, 1]);
        assert_eq!(decode_frames(&buf), vec![b"whole".to_vec()]);
    }
}
