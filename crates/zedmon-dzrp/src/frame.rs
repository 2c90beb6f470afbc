//! Frame layer: `u32 length (LE) | u8 channel | body…`.
//!
//! The length prefix covers the channel tag and the body. The body of a
//! debugger frame starts with an opcode byte: bit 7 set means it answers a
//! request, bit 7 clear means it is an unsolicited notification.

use crate::constants::{CHANNEL_UART_DATA, LEN_PREFIX, MAX_FRAME, RESPONSE_FLAG};
use crate::error::DzrpError;

/// A decoded frame borrowing from the receive buffer.
#[derive(Debug, Clone, Copy)]
pub struct FrameView<'a> {
    pub channel: u8,
    /// Opcode byte followed by the payload.
    pub body: &'a [u8],
}

impl<'a> FrameView<'a> {
    pub fn opcode(&self) -> u8 {
        self.body[0]
    }

    pub fn payload(&self) -> &'a [u8] {
        &self.body[1..]
    }

    /// True when this frame answers a request (echoed opcode, bit 7 set).
    pub fn is_response(&self) -> bool {
        self.opcode() & RESPONSE_FLAG != 0
    }
}

/// Encode one frame on the debugger channel.
pub fn encode_frame(body: &[u8]) -> Vec<u8> {
    encode_frame_on(CHANNEL_UART_DATA, body)
}

pub fn encode_frame_on(channel: u8, body: &[u8]) -> Vec<u8> {
    let frame_len = 1 + body.len();
    let mut out = Vec::with_capacity(LEN_PREFIX + frame_len);
    out.extend_from_slice(&(frame_len as u32).to_le_bytes());
    out.push(channel);
    out.extend_from_slice(body);
    out
}

/// Encode a request frame: opcode followed by its argument bytes.
pub fn encode_request(opcode: u8, args: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(1 + args.len());
    body.push(opcode);
    body.extend_from_slice(args);
    encode_frame(&body)
}

/// Decode as many complete frames as `in_buf` holds.
///
/// Returns the decoded views plus the number of bytes consumed; a trailing
/// partial frame is left for the next read. An empty body (length < 2, i.e.
/// no opcode after the channel tag) is a protocol error.
pub fn try_decode_frames(in_buf: &[u8]) -> Result<(Vec<FrameView<'_>>, usize), DzrpError> {
    let mut frames = Vec::new();
    let mut offset = 0usize;

    loop {
        if in_buf.len().saturating_sub(offset) < LEN_PREFIX {
            break;
        }
        let len_bytes = &in_buf[offset..offset + LEN_PREFIX];
        let frame_len =
            u32::from_le_bytes(len_bytes.try_into().expect("slice length is 4")) as usize;

        if frame_len < 2 {
            return Err(DzrpError::LengthMismatch);
        }
        if frame_len > MAX_FRAME {
            return Err(DzrpError::FrameTooLarge(frame_len));
        }

        let total_needed = LEN_PREFIX + frame_len;
        if in_buf.len().saturating_sub(offset) < total_needed {
            break;
        }

        let channel = in_buf[offset + LEN_PREFIX];
        if channel != CHANNEL_UART_DATA {
            return Err(DzrpError::UnknownChannel(channel));
        }
        let body = &in_buf[offset + LEN_PREFIX + 1..offset + total_needed];

        frames.push(FrameView { channel, body });
        offset += total_needed;
    }

    Ok((frames, offset))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_layout_is_locked() {
        let frame = encode_request(0x05, &[1, 0x34, 0x12]);
        // length = channel + opcode + 3 args = 5
        assert_eq!(&frame[..4], &[5, 0, 0, 0]);
        assert_eq!(frame[4], CHANNEL_UART_DATA);
        assert_eq!(frame[5], 0x05);
        assert_eq!(&frame[6..], &[1, 0x34, 0x12]);
    }

    #[test]
    fn partial_frames_stay_buffered() {
        let frame = encode_request(0x02, &[]);
        let (views, consumed) = try_decode_frames(&frame[..frame.len() - 1]).unwrap();
        assert!(views.is_empty());
        assert_eq!(consumed, 0);

        let (views, consumed) = try_decode_frames(&frame).unwrap();
        assert_eq!(views.len(), 1);
        assert_eq!(consumed, frame.len());
        assert_eq!(views[0].opcode(), 0x02);
        assert!(views[0].payload().is_empty());
    }

    #[test]
    fn back_to_back_frames_decode_together() {
        let mut buf = encode_request(0x02, &[]);
        buf.extend_from_slice(&encode_request(0x0B, &[0, 0x80, 4, 0]));
        let (views, consumed) = try_decode_frames(&buf).unwrap();
        assert_eq!(views.len(), 2);
        assert_eq!(consumed, buf.len());
        assert_eq!(views[1].payload(), &[0, 0x80, 4, 0]);
    }

    #[test]
    fn response_bit_classifies_frames() {
        let resp = encode_frame(&[0x85]);
        let ntf = encode_frame(&[0x01, 0, 0x00, 0x80, 0, 0]);
        let (views, _) = try_decode_frames(&resp).unwrap();
        assert!(views[0].is_response());
        let (views, _) = try_decode_frames(&ntf).unwrap();
        assert!(!views[0].is_response());
    }

    #[test]
    fn wrong_channel_is_rejected() {
        let frame = encode_frame_on(7, &[0x02]);
        assert!(matches!(
            try_decode_frames(&frame),
            Err(DzrpError::UnknownChannel(7))
        ));
    }

    #[test]
    fn zero_length_frame_is_rejected() {
        let buf = [1u8, 0, 0, 0, CHANNEL_UART_DATA];
        assert!(matches!(
            try_decode_frames(&buf),
            Err(DzrpError::LengthMismatch)
        ));
    }
}
