//! Little-endian wire codec helpers

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

use crate::core::types::{DVec3, Result};
use crate::core::Error;

pub fn write_u8<W: Write>(out: &mut W, v: u8) -> Result<()> {
    out.write_u8(v)?;
    Ok(())
}

pub fn write_u16<W: Write>(out: &mut W, v: u16) -> Result<()> {
    out.write_u16::<LittleEndian>(v)?;
    Ok(())
}

pub fn write_u32<W: Write>(out: &mut W, v: u32) -> Result<()> {
    out.write_u32::<LittleEndian>(v)?;
    Ok(())
}

pub fn write_u64<W: Write>(out: &mut W, v: u64) -> Result<()> {
    out.write_u64::<LittleEndian>(v)?;
    Ok(())
}

pub fn write_f32<W: Write>(out: &mut W, v: f32) -> Result<()> {
    out.write_f32::<LittleEndian>(v)?;
    Ok(())
}

pub fn write_f64<W: Write>(out: &mut W, v: f64) -> Result<()> {
    out.write_f64::<LittleEndian>(v)?;
    Ok(())
}

pub fn write_dvec3<W: Write>(out: &mut W, v: DVec3) -> Result<()> {
    write_f64(out, v.x)?;
    write_f64(out, v.y)?;
    write_f64(out, v.z)
}

// A short read in the middle of a structure means the stream lies about
// its own layout, so EOF surfaces as a format error rather than I/O.
fn map_eof(e: std::io::Error) -> Error {
    match e.kind() {
        std::io::ErrorKind::UnexpectedEof => {
            Error::Format("truncated read past end of stream".to_string())
        }
        _ => Error::Io(e),
    }
}

pub fn read_u8<R: Read>(input: &mut R) -> Result<u8> {
    input.read_u8().map_err(map_eof)
}

pub fn read_u16<R: Read>(input: &mut R) -> Result<u16> {
    input.read_u16::<LittleEndian>().map_err(map_eof)
}

pub fn read_u32<R: Read>(input: &mut R) -> Result<u32> {
    input.read_u32::<LittleEndian>().map_err(map_eof)
}

pub fn read_u64<R: Read>(input: &mut R) -> Result<u64> {
    input.read_u64::<LittleEndian>().map_err(map_eof)
}

pub fn read_f64<R: Read>(input: &mut R) -> Result<f64> {
    input.read_f64::<LittleEndian>().map_err(map_eof)
}

pub fn read_dvec3<R: Read>(input: &mut R) -> Result<DVec3> {
    Ok(DVec3::new(read_f64(input)?, read_f64(input)?, read_f64(input)?))
}

/// Read exactly `buf.len()` bytes; a short read is a format error.
pub fn read_exact<R: Read>(input: &mut R, buf: &mut [u8]) -> Result<()> {
    input.read_exact(buf).map_err(map_eof)
}

/// Decode a little-endian f32 slab into a Vec.
pub fn decode_f32_slab(bytes: &[u8]) -> Vec<f32> {
    debug_assert_eq!(bytes.len() % 4, 0);
    bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_scalar_roundtrip() {
        let mut buf = Vec::new();
        write_u16(&mut buf, 0xbeef).unwrap();
        write_u64(&mut buf, u64::MAX - 7).unwrap();
        write_f64(&mut buf, -1234.5e67).unwrap();
        let mut cur = Cursor::new(buf);
        assert_eq!(read_u16(&mut cur).unwrap(), 0xbeef);
        assert_eq!(read_u64(&mut cur).unwrap(), u64::MAX - 7);
        assert_eq!(read_f64(&mut cur).unwrap(), -1234.5e67);
    }

    #[test]
    fn test_decode_slab_tolerates_unaligned_input() {
        let mut bytes = vec![0u8; 1];
        for v in [1.5f32, -2.25, 1e-20] {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        // Slice starting at byte 1 cannot be a valid &[f32] view
        assert_eq!(decode_f32_slab(&bytes[1..]), vec![1.5, -2.25, 1e-20]);
    }

    #[test]
    fn test_truncated_read_is_format_error() {
        let mut cur = Cursor::new(vec![1u8, 2]);
        let mut buf = [0u8; 8];
        match read_exact(&mut cur, &mut buf) {
            Err(Error::Format(_)) => {}
            other => panic!("expected format error, got {:?}", other.map(|_| ())),
        }
    }
}
