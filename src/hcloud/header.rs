//! hcloud file header

use std::io::{Read, Write};

use crate::core::types::{DVec3, Result};
use crate::core::Error;
use crate::math::DAabb;
use super::codec;

/// Magic bytes identifying an hcloud file
pub const HCLOUD_MAGIC: &[u8; 24] = b"HierarchicalPointCloud\n\x0c";

/// Current format version
pub const HCLOUD_VERSION: u16 = 2;

/// Fixed-layout hcloud file header.
///
/// `header_size` is self-describing: readers skip any trailing header
/// bytes a newer writer may have appended, so the header can grow without
/// breaking old readers.
#[derive(Clone, Debug, PartialEq)]
pub struct HCloudHeader {
    pub version: u16,
    pub header_size: u32,
    /// Total number of raw points stored in leaf payloads
    pub num_points: u64,
    /// Total number of occupied voxels across all bricks
    pub num_voxels: u64,
    /// Absolute byte offset of the index section
    pub index_offset: u64,
    /// Absolute byte offset of the data section
    pub data_offset: u64,
    /// Global double-precision offset; all f32 positions are relative to it
    pub offset: DVec3,
    /// Bounding box of the raw input points
    pub bounding_box: DAabb,
    /// Bounding box of the octree root node
    pub tree_bounding_box: DAabb,
    /// Brick resolution (bricks are brick_size^3 voxels)
    pub brick_size: u16,
}

impl Default for HCloudHeader {
    fn default() -> Self {
        Self {
            version: HCLOUD_VERSION,
            header_size: 0,
            num_points: 0,
            num_voxels: 0,
            index_offset: 0,
            data_offset: 0,
            offset: DVec3::ZERO,
            bounding_box: DAabb::default(),
            tree_bounding_box: DAabb::default(),
            brick_size: 0,
        }
    }
}

impl HCloudHeader {
    /// Serialized size of the current header layout, including magic.
    pub const SIZE: u32 = 184;

    /// Largest `header_size` accepted when reading. Bounds the allocation
    /// for the forward-compatibility skip on untrusted input.
    pub const MAX_SIZE: u32 = 4096;

    /// Write the header to `out`, recomputing `header_size`.
    pub fn write<W: Write>(&mut self, out: &mut W) -> Result<()> {
        // Build the header in memory first so header_size can be patched
        // before anything hits the stream.
        let mut buf: Vec<u8> = Vec::with_capacity(Self::SIZE as usize);
        buf.extend_from_slice(HCLOUD_MAGIC);
        codec::write_u16(&mut buf, self.version)?;
        let size_pos = buf.len();
        codec::write_u32(&mut buf, 0)?; // header_size placeholder
        codec::write_u64(&mut buf, self.num_points)?;
        codec::write_u64(&mut buf, self.num_voxels)?;
        codec::write_u64(&mut buf, self.index_offset)?;
        codec::write_u64(&mut buf, self.data_offset)?;
        codec::write_dvec3(&mut buf, self.offset)?;
        codec::write_dvec3(&mut buf, self.bounding_box.min)?;
        codec::write_dvec3(&mut buf, self.bounding_box.max)?;
        codec::write_dvec3(&mut buf, self.tree_bounding_box.min)?;
        codec::write_dvec3(&mut buf, self.tree_bounding_box.max)?;
        codec::write_u16(&mut buf, self.brick_size)?;
        self.header_size = buf.len() as u32;
        buf[size_pos..size_pos + 4].copy_from_slice(&self.header_size.to_le_bytes());
        out.write_all(&buf)?;
        Ok(())
    }

    /// Read and validate a header. Fails fast on bad magic or an
    /// unsupported version.
    pub fn read<R: Read>(input: &mut R) -> Result<Self> {
        let mut magic = [0u8; 24];
        codec::read_exact(input, &mut magic)?;
        if &magic != HCLOUD_MAGIC {
            return Err(Error::Format(
                "bad magic number: not a hierarchical point cloud".to_string(),
            ));
        }
        let version = codec::read_u16(input)?;
        if version != HCLOUD_VERSION {
            return Err(Error::Format(format!(
                "unknown hcloud version {} (expected {})",
                version, HCLOUD_VERSION
            )));
        }
        let header_size = codec::read_u32(input)?;
        if header_size < Self::SIZE || header_size > Self::MAX_SIZE {
            return Err(Error::Format(format!(
                "header size {} out of range [{}, {}]",
                header_size,
                Self::SIZE,
                Self::MAX_SIZE
            )));
        }
        let header = Self {
            version,
            header_size,
            num_points: codec::read_u64(input)?,
            num_voxels: codec::read_u64(input)?,
            index_offset: codec::read_u64(input)?,
            data_offset: codec::read_u64(input)?,
            offset: codec::read_dvec3(input)?,
            bounding_box: DAabb::new(codec::read_dvec3(input)?, codec::read_dvec3(input)?),
            tree_bounding_box: DAabb::new(codec::read_dvec3(input)?, codec::read_dvec3(input)?),
            brick_size: codec::read_u16(input)?,
        };
        // Skip header bytes appended by newer writers
        let extra = header.header_size - Self::SIZE;
        if extra > 0 {
            let mut skip = vec![0u8; extra as usize];
            codec::read_exact(input, &mut skip)?;
        }
        if header.index_offset < header.header_size as u64
            || header.data_offset < header.header_size as u64
        {
            return Err(Error::Format(
                "section offsets overlap header".to_string(),
            ));
        }
        Ok(header)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn sample_header() -> HCloudHeader {
        HCloudHeader {
            version: HCLOUD_VERSION,
            header_size: 0,
            num_points: 123_456_789,
            num_voxels: 42,
            index_offset: 99_999,
            data_offset: 184,
            offset: DVec3::new(1e6, -2e6, 37.5),
            bounding_box: DAabb::new(
                DVec3::new(0.0, 1.0, 2.0),
                DVec3::new(100.5, 101.5, 102.5),
            ),
            tree_bounding_box: DAabb::new(
                DVec3::new(-10.0, -10.0, -10.0),
                DVec3::new(1014.0, 1014.0, 1014.0),
            ),
            brick_size: 8,
        }
    }

    #[test]
    fn test_roundtrip() {
        let mut h = sample_header();
        let mut buf = Vec::new();
        h.write(&mut buf).unwrap();
        assert_eq!(h.header_size, HCloudHeader::SIZE);
        assert_eq!(buf.len() as u32, h.header_size);

        let read = HCloudHeader::read(&mut Cursor::new(buf)).unwrap();
        assert_eq!(read, h);
    }

    #[test]
    fn test_bad_magic() {
        let mut buf = Vec::new();
        sample_header().write(&mut buf).unwrap();
        buf[0] ^= 0xff;
        match HCloudHeader::read(&mut Cursor::new(buf)) {
            Err(Error::Format(msg)) => assert!(msg.contains("magic")),
            other => panic!("expected format error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_bad_version() {
        let mut buf = Vec::new();
        sample_header().write(&mut buf).unwrap();
        buf[24] = 0xff;
        buf[25] = 0xff;
        assert!(matches!(
            HCloudHeader::read(&mut Cursor::new(buf)),
            Err(Error::Format(_))
        ));
    }

    #[test]
    fn test_truncated() {
        let mut buf = Vec::new();
        sample_header().write(&mut buf).unwrap();
        buf.truncate(100);
        assert!(matches!(
            HCloudHeader::read(&mut Cursor::new(buf)),
            Err(Error::Format(_))
        ));
    }

    #[test]
    fn test_oversized_header_size_rejected() {
        // A hostile header_size must fail validation instead of driving
        // the skip allocation
        let mut buf = Vec::new();
        sample_header().write(&mut buf).unwrap();
        buf[26..30].copy_from_slice(&u32::MAX.to_le_bytes());
        assert!(matches!(
            HCloudHeader::read(&mut Cursor::new(buf)),
            Err(Error::Format(_))
        ));
    }

    #[test]
    fn test_forward_compatible_extra_bytes() {
        let mut h = sample_header();
        // Keep the sections clear of the grown header
        h.data_offset = 1000;
        let mut buf = Vec::new();
        h.write(&mut buf).unwrap();
        // Simulate a newer writer with 8 extra header bytes
        buf.extend_from_slice(&[0xaa; 8]);
        let size = HCloudHeader::SIZE + 8;
        buf[26..30].copy_from_slice(&size.to_le_bytes());
        // Follow with a sentinel that must be the next read
        buf.push(0x5a);
        let mut cur = Cursor::new(buf);
        let read = HCloudHeader::read(&mut cur).unwrap();
        assert_eq!(read.num_points, h.num_points);
        let mut next = [0u8; 1];
        cur.read_exact(&mut next).unwrap();
        assert_eq!(next[0], 0x5a);
    }
}
