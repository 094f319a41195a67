//! Length-prefixed bincode framing.
//!
//! Every message on the wire is a 4-byte little-endian payload length
//! followed by the bincode encoding of the message. The length cap is
//! sized for policy-variable snapshots, the largest payload the cluster
//! ships.
use crate::error::RpcError;
use serde::{de::DeserializeOwned, Serialize};
use std::io::{ErrorKind, Read, Write};

/// Upper bound on a single frame payload (256 MiB).
pub const MAX_FRAME_BYTES: usize = 256 * 1024 * 1024;

/// Writes one frame.
pub fn write_frame<T: Serialize>(w: &mut impl Write, msg: &T) -> Result<(), RpcError> {
    let payload = bincode::serialize(msg)?;
    if payload.len() > MAX_FRAME_BYTES {
        return Err(RpcError::Oversized(payload.len()));
    }
    w.write_all(&(payload.len() as u32).to_le_bytes())?;
    w.write_all(&payload)?;
    w.flush()?;
    Ok(())
}

/// Reads one frame.
///
/// A clean EOF on the length header maps to [`RpcError::Disconnected`];
/// EOF in the middle of a frame stays a transport error.
pub fn read_frame<T: DeserializeOwned>(r: &mut impl Read) -> Result<T, RpcError> {
    let mut header = [0u8; 4];
    if let Err(e) = r.read_exact(&mut header) {
        return Err(if e.kind() == ErrorKind::UnexpectedEof {
            RpcError::Disconnected
        } else {
            RpcError::Transport(e)
        });
    }
    let len = u32::from_le_bytes(header) as usize;
    if len > MAX_FRAME_BYTES {
        return Err(RpcError::Oversized(len));
    }
    let mut payload = vec![0u8; len];
    r.read_exact(&mut payload)?;
    Ok(bincode::deserialize(&payload)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sacd_core::NdArray;
    use std::io::Cursor;

    #[test]
    fn test_frame_roundtrip() {
        let msg = NdArray::from_f32(&[2, 2], &[1.0, -2.5, f32::NAN, 0.0]);
        let mut buf = vec![];
        write_frame(&mut buf, &msg).unwrap();

        let decoded: NdArray = read_frame(&mut Cursor::new(&buf)).unwrap();
        assert_eq!(decoded.shape, msg.shape);
        assert_eq!(decoded.data, msg.data);
    }

    #[test]
    fn test_empty_array_roundtrip() {
        let mut buf = vec![];
        write_frame(&mut buf, &NdArray::empty()).unwrap();
        let decoded: NdArray = read_frame(&mut Cursor::new(&buf)).unwrap();
        assert!(decoded.is_empty());
    }

    #[test]
    fn test_eof_is_disconnect() {
        let err = read_frame::<NdArray>(&mut Cursor::new(&[] as &[u8])).unwrap_err();
        assert!(matches!(err, RpcError::Disconnected));
    }

    #[test]
    fn test_oversized_header_rejected() {
        let mut buf = (u32::MAX).to_le_bytes().to_vec();
        buf.extend_from_slice(&[0; 8]);
        let err = read_frame::<NdArray>(&mut Cursor::new(&buf)).unwrap_err();
        assert!(matches!(err, RpcError::Oversized(_)));
    }
}
