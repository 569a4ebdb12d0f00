use bytes::{Buf, BufMut, BytesMut};

use crate::protocol::{GatewayReply, GatewayRequest};
use crate::service::GatewayError::Incomplete;
use crate::service::{GatewayError, GatewayResult};

/// One framed request: a 4-byte big-endian body length followed by the JSON
/// body.
#[derive(Debug)]
pub struct RequestFrame {
    pub request: GatewayRequest,
}

impl RequestFrame {
    pub fn check(buffer: &mut BytesMut, max_frame_size: usize) -> GatewayResult<()> {
        if buffer.remaining() < 4 {
            return Err(Incomplete);
        }
        let bytes_slice = buffer.get(0..4).unwrap();
        let body_size = i32::from_be_bytes(bytes_slice.try_into().unwrap());
        if body_size < 0 {
            return Err(GatewayError::DetailedIo(format!(
                "negative frame length {}",
                body_size
            )));
        }
        if body_size as usize > max_frame_size {
            return Err(GatewayError::DetailedIo(format!(
                "frame of {} bytes exceeds the {} byte limit",
                body_size, max_frame_size
            )));
        }
        if buffer.remaining() < body_size as usize + 4 {
            buffer.reserve(body_size as usize + 4);
            return Err(Incomplete);
        }
        Ok(())
    }

    pub(crate) fn parse(
        buffer: &mut BytesMut,
        max_frame_size: usize,
    ) -> GatewayResult<Option<RequestFrame>> {
        // perform a check to ensure we have enough data
        match RequestFrame::check(buffer, max_frame_size) {
            Ok(_) => {
                let body_length = buffer.get_i32();
                let body = buffer.split_to(body_length as usize);
                let request: GatewayRequest = serde_json::from_slice(&body)?;
                Ok(Some(RequestFrame { request }))
            }
            Err(Incomplete) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// Encodes one reply frame for the wire.
pub fn encode_reply(reply: &GatewayReply) -> GatewayResult<BytesMut> {
    let body = serde_json::to_vec(reply)?;
    let mut frame = BytesMut::with_capacity(4 + body.len());
    frame.put_i32(body.len() as i32);
    frame.put_slice(&body);
    Ok(frame)
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;
    use crate::protocol::{GetOffsetsRequest, PublishRequest};

    const MAX: usize = 1024;

    fn encode_request(request: &GatewayRequest) -> BytesMut {
        let body = serde_json::to_vec(request).unwrap();
        let mut frame = BytesMut::with_capacity(4 + body.len());
        frame.put_i32(body.len() as i32);
        frame.put_slice(&body);
        frame
    }

    #[test]
    fn test_parse_round_trip() {
        let request = GatewayRequest::Publish(PublishRequest {
            topic: "events".to_string(),
            key: Bytes::from_static(b"k"),
            value: Bytes::from_static(b"v"),
        });
        let mut buffer = encode_request(&request);
        let frame = RequestFrame::parse(&mut buffer, MAX).unwrap().unwrap();
        match frame.request {
            GatewayRequest::Publish(r) => assert_eq!(r.topic, "events"),
            other => panic!("unexpected request: {:?}", other),
        }
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_partial_frame_yields_none() {
        let request = GatewayRequest::GetOffsets(GetOffsetsRequest {
            topic: "t".to_string(),
            group: "g".to_string(),
            group_version: 0,
        });
        let full = encode_request(&request);
        let mut partial = BytesMut::from(&full[..full.len() - 3]);
        assert!(RequestFrame::parse(&mut partial, MAX).unwrap().is_none());
    }

    #[test]
    fn test_oversized_frame_is_rejected() {
        let mut buffer = BytesMut::new();
        buffer.put_i32(MAX as i32 + 1);
        buffer.put_slice(&[0u8; 8]);
        assert!(RequestFrame::parse(&mut buffer, MAX).is_err());
    }
}
