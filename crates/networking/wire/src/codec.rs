//! Length-prefixed framing for compile requests and completion statuses.
//!
//! ```text
//! frame   = len:u32 payload            (big-endian, len <= MAX_FRAME_LEN)
//! payload = 0x01 class:u64 method:u64 direct:u64 opt:u8 buf_addr:u64 buf_size:u64
//!         | 0x02 status:u8
//! ```
//!
//! A zero `direct` or `buf_addr` means "absent".

use aotserver_cache::{CacheOffset, MethodId};
use aotserver_dispatch::{CodeBufferHint, CompileRequest, CompletionStatus, OptLevel};
use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::WireError;

pub const MAX_FRAME_LEN: usize = 64 * 1024;

const LEN_PREFIX: usize = 4;

pub const TAG_COMPILE_REQUEST: u8 = 0x01;
pub const TAG_COMPLETION_STATUS: u8 = 0x02;

const COMPILE_REQUEST_BODY: usize = 8 + 8 + 8 + 1 + 8 + 8;
const COMPLETION_STATUS_BODY: usize = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    CompileRequest(CompileRequest),
    CompletionStatus(CompletionStatus),
}

impl Message {
    pub fn name(&self) -> &'static str {
        match self {
            Message::CompileRequest(_) => "compile-request",
            Message::CompletionStatus(_) => "completion-status",
        }
    }

    fn tag(&self) -> u8 {
        match self {
            Message::CompileRequest(_) => TAG_COMPILE_REQUEST,
            Message::CompletionStatus(_) => TAG_COMPLETION_STATUS,
        }
    }

    fn body_len(&self) -> usize {
        match self {
            Message::CompileRequest(_) => COMPILE_REQUEST_BODY,
            Message::CompletionStatus(_) => COMPLETION_STATUS_BODY,
        }
    }

    /// Parse one frame payload. The whole payload must be consumed.
    fn parse(mut payload: BytesMut) -> Result<Self, WireError> {
        if !payload.has_remaining() {
            return Err(WireError::EmptyFrame);
        }
        let message = match payload.get_u8() {
            TAG_COMPILE_REQUEST => {
                expect_body("compile-request", &payload, COMPILE_REQUEST_BODY)?;
                let class_offset = CacheOffset(payload.get_u64());
                let method_offset = CacheOffset(payload.get_u64());
                let direct = payload.get_u64();
                let opt = payload.get_u8();
                let buf_addr = payload.get_u64();
                let buf_size = payload.get_u64();

                let opt_level = OptLevel::from_code(opt).ok_or(WireError::BadOptLevel(opt))?;
                let direct_method = match direct {
                    0 => None,
                    raw => Some(MethodId::from_raw(raw).ok_or(WireError::BadMethodHandle(raw))?),
                };
                Message::CompileRequest(CompileRequest {
                    class_offset,
                    method_offset,
                    direct_method,
                    opt_level,
                    code_buffer: CodeBufferHint::from_parts(buf_addr, buf_size),
                })
            }
            TAG_COMPLETION_STATUS => {
                expect_body("completion-status", &payload, COMPLETION_STATUS_BODY)?;
                let code = payload.get_u8();
                Message::CompletionStatus(
                    CompletionStatus::from_code(code).ok_or(WireError::BadStatus(code))?,
                )
            }
            tag => return Err(WireError::UnknownTag(tag)),
        };
        match payload.remaining() {
            0 => Ok(message),
            extra => Err(WireError::TrailingBytes(extra)),
        }
    }
}

fn expect_body(message: &'static str, payload: &BytesMut, expected: usize) -> Result<(), WireError> {
    let actual = payload.remaining();
    if actual < expected {
        return Err(WireError::Truncated {
            message,
            expected,
            actual,
        });
    }
    Ok(())
}

/// Codec for [`Message`] frames.
#[derive(Debug, Clone, Copy, Default)]
pub struct WireCodec;

impl Decoder for WireCodec {
    type Item = Message;
    type Error = WireError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Message>, WireError> {
        if src.len() < LEN_PREFIX {
            return Ok(None);
        }
        let mut prefix: &[u8] = src.as_ref();
        let len = usize::try_from(prefix.get_u32())
            .map_err(|_| WireError::FrameTooLarge(usize::MAX))?;
        if len > MAX_FRAME_LEN {
            return Err(WireError::FrameTooLarge(len));
        }
        let frame_len = LEN_PREFIX.saturating_add(len);
        if src.len() < frame_len {
            src.reserve(frame_len.saturating_sub(src.len()));
            return Ok(None);
        }

        src.advance(LEN_PREFIX);
        let payload = src.split_to(len);
        Message::parse(payload).map(Some)
    }
}

impl Encoder<Message> for WireCodec {
    type Error = WireError;

    fn encode(&mut self, message: Message, dst: &mut BytesMut) -> Result<(), WireError> {
        let len = message.body_len().saturating_add(1);
        let prefix = u32::try_from(len).map_err(|_| WireError::FrameTooLarge(len))?;
        dst.reserve(LEN_PREFIX.saturating_add(len));
        dst.put_u32(prefix);
        dst.put_u8(message.tag());
        match message {
            Message::CompileRequest(request) => {
                let (buf_addr, buf_size) = request
                    .code_buffer
                    .map_or((0, 0), |hint| (hint.address, hint.size));
                dst.put_u64(request.class_offset.0);
                dst.put_u64(request.method_offset.0);
                dst.put_u64(request.direct_method.map_or(0, MethodId::to_raw));
                dst.put_u8(request.opt_level.code());
                dst.put_u64(buf_addr);
                dst.put_u64(buf_size);
            }
            Message::CompletionStatus(status) => dst.put_u8(status.code()),
        }
        Ok(())
    }
}
