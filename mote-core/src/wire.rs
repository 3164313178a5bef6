//! Framing: 4-byte header (message id BE, index, total) + up to 15 payload bytes.

/// Header bytes preceding the payload.
pub const HEADER_LEN: usize = 4;
/// Payload capacity of one frame.
pub const PAYLOAD_CAPACITY: usize = 15;
/// Largest frame on the air (fits a 19-byte radio string).
pub const MAX_FRAME_LEN: usize = HEADER_LEN + PAYLOAD_CAPACITY;

/// One link-layer fragment of a logical message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub message_id: u16,
    pub index: u8,
    pub total: u8,
    pub payload: Vec<u8>,
}

/// Encode a frame: `[id_hi, id_lo, index, total, payload...]`.
pub fn encode_frame(frame: &Frame) -> Result<Vec<u8>, FrameEncodeError> {
    if frame.payload.len() > PAYLOAD_CAPACITY {
        return Err(FrameEncodeError::TooLarge(frame.payload.len()));
    }
    if frame.index >= frame.total {
        return Err(FrameEncodeError::BadIndex {
            index: frame.index,
            total: frame.total,
        });
    }
    let mut out = Vec::with_capacity(HEADER_LEN + frame.payload.len());
    out.extend_from_slice(&frame.message_id.to_be_bytes());
    out.push(frame.index);
    out.push(frame.total);
    out.extend_from_slice(&frame.payload);
    Ok(out)
}

/// Error encoding a frame.
#[derive(Debug, thiserror::Error)]
pub enum FrameEncodeError {
    #[error("payload of {0} bytes exceeds frame capacity")]
    TooLarge(usize),
    #[error("fragment index {index} out of range for total {total}")]
    BadIndex { index: u8, total: u8 },
}

/// Decode one frame. The whole buffer is the frame; the radio delivers frames whole.
pub fn decode_frame(bytes: &[u8]) -> Result<Frame, FrameDecodeError> {
    if bytes.len() < HEADER_LEN {
        return Err(FrameDecodeError::Truncated(bytes.len()));
    }
    if bytes.len() > MAX_FRAME_LEN {
        return Err(FrameDecodeError::TooLarge(bytes.len()));
    }
    let message_id = u16::from_be_bytes([bytes[0], bytes[1]]);
    let index = bytes[2];
    let total = bytes[3];
    if index >= total {
        return Err(FrameDecodeError::BadIndex { index, total });
    }
    Ok(Frame {
        message_id,
        index,
        total,
        payload: bytes[HEADER_LEN..].to_vec(),
    })
}

/// Error decoding a frame (short header, oversize, or inconsistent index/total).
#[derive(Debug, thiserror::Error)]
pub enum FrameDecodeError {
    #[error("frame of {0} bytes is shorter than the header")]
    Truncated(usize),
    #[error("frame of {0} bytes exceeds the maximum")]
    TooLarge(usize),
    #[error("fragment index {index} out of range for total {total}")]
    BadIndex { index: u8, total: u8 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_layout() {
        let frame = Frame {
            message_id: 0x1234,
            index: 2,
            total: 3,
            payload: b"abc".to_vec(),
        };
        let bytes = encode_frame(&frame).unwrap();
        assert_eq!(&bytes[..4], &[0x12, 0x34, 2, 3]);
        assert_eq!(&bytes[4..], b"abc");
        assert_eq!(decode_frame(&bytes).unwrap(), frame);
    }

    #[test]
    fn empty_payload_frame() {
        let frame = Frame {
            message_id: 7,
            index: 0,
            total: 1,
            payload: vec![],
        };
        let bytes = encode_frame(&frame).unwrap();
        assert_eq!(bytes.len(), HEADER_LEN);
        assert!(decode_frame(&bytes).unwrap().payload.is_empty());
    }

    #[test]
    fn rejects_oversize_payload() {
        let frame = Frame {
            message_id: 0,
            index: 0,
            total: 1,
            payload: vec![0; PAYLOAD_CAPACITY + 1],
        };
        assert!(matches!(
            encode_frame(&frame),
            Err(FrameEncodeError::TooLarge(16))
        ));
        let mut raw = vec![0, 0, 0, 1];
        raw.extend_from_slice(&[0; PAYLOAD_CAPACITY + 1]);
        assert!(matches!(
            decode_frame(&raw),
            Err(FrameDecodeError::TooLarge(_))
        ));
    }

    #[test]
    fn rejects_truncated_and_bad_index() {
        assert!(matches!(
            decode_frame(&[0, 1, 0]),
            Err(FrameDecodeError::Truncated(3))
        ));
        assert!(matches!(
            decode_frame(&[0, 1, 3, 3]),
            Err(FrameDecodeError::BadIndex { index: 3, total: 3 })
        ));
        assert!(matches!(
            decode_frame(&[0, 1, 0, 0]),
            Err(FrameDecodeError::BadIndex { .. })
        ));
    }
}
