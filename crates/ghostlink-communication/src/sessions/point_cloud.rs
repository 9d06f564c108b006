//! Scanner point-cloud assembly
//!
//! Each scan cycle announces a `chunk` with `left` / `right` point counts,
//! then streams the points as binary frames: all left-camera points followed
//! by all right-camera points. A point is six little-endian `f32`
//! (`x y z r g b`).

use std::io::{self, Write};

/// Bytes per point
pub const POINT_SIZE: usize = 24;

/// One colored point
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Point {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub r: f32,
    pub g: f32,
    pub b: f32,
}

impl Point {
    /// Decode one point; `None` unless `bytes` is exactly [`POINT_SIZE`] long
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != POINT_SIZE {
            return None;
        }
        let mut values = bytes
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]));
        Some(Self {
            x: values.next()?,
            y: values.next()?,
            z: values.next()?,
            r: values.next()?,
            g: values.next()?,
            b: values.next()?,
        })
    }

    /// Encode as [`POINT_SIZE`] bytes
    pub fn to_bytes(&self) -> [u8; POINT_SIZE] {
        let mut out = [0u8; POINT_SIZE];
        for (slot, value) in out
            .chunks_exact_mut(4)
            .zip([self.x, self.y, self.z, self.r, self.g, self.b])
        {
            slot.copy_from_slice(&value.to_le_bytes());
        }
        out
    }
}

/// Points gathered from both cameras
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PointCloud {
    pub left: Vec<Point>,
    pub right: Vec<Point>,
}

impl PointCloud {
    /// Total number of points
    pub fn len(&self) -> usize {
        self.left.len() + self.right.len()
    }

    /// True if no points were gathered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Write as plain text, one `x y z r g b` line per point
    pub fn write_xyz<W: Write>(&self, mut out: W) -> io::Result<()> {
        for p in self.left.iter().chain(&self.right) {
            writeln!(out, "{} {} {} {} {} {}", p.x, p.y, p.z, p.r, p.g, p.b)?;
        }
        Ok(())
    }
}

fn decode_points(bytes: &[u8]) -> impl Iterator<Item = Point> + '_ {
    bytes.chunks_exact(POINT_SIZE).filter_map(Point::from_bytes)
}

/// Splits a cycle's binary frames into left and right points
#[derive(Debug, Default)]
pub struct ChunkAssembler {
    left_bytes: usize,
    right_bytes: usize,
    buffer: Vec<u8>,
}

impl ChunkAssembler {
    /// Start a new chunk announced with these point counts
    pub fn expect(&mut self, left_points: usize, right_points: usize) {
        if !self.buffer.is_empty() {
            tracing::warn!(
                "Discarding {} bytes of an incomplete point chunk",
                self.buffer.len()
            );
        }
        let sizes = left_points
            .checked_mul(POINT_SIZE)
            .zip(right_points.checked_mul(POINT_SIZE))
            .filter(|(left, right)| left.checked_add(*right).is_some());
        let (left_bytes, right_bytes) = sizes.unwrap_or_else(|| {
            tracing::warn!(
                "Ignoring point chunk of {} + {} points, size overflows",
                left_points,
                right_points
            );
            (0, 0)
        });
        self.left_bytes = left_bytes;
        self.right_bytes = right_bytes;
        self.buffer.clear();
    }

    /// Bytes still missing from the announced chunk
    pub fn remaining(&self) -> usize {
        (self.left_bytes + self.right_bytes).saturating_sub(self.buffer.len())
    }

    /// Append a binary frame; completed chunks are moved into `cloud`
    pub fn push(&mut self, data: &[u8], cloud: &mut PointCloud) {
        self.buffer.extend_from_slice(data);
        let total = self.left_bytes + self.right_bytes;
        if total == 0 || self.buffer.len() < total {
            return;
        }

        let (left, rest) = self.buffer.split_at(self.left_bytes);
        cloud.left.extend(decode_points(left));
        cloud.right.extend(decode_points(&rest[..self.right_bytes]));

        if self.buffer.len() > total {
            tracing::warn!(
                "Dropping {} bytes past the announced point chunk",
                self.buffer.len() - total
            );
        }
        self.buffer.clear();
        self.left_bytes = 0;
        self.right_bytes = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(v: f32) -> Point {
        Point {
            x: v,
            y: v + 1.0,
            z: v + 2.0,
            r: 0.5,
            g: 0.25,
            b: 1.0,
        }
    }

    #[test]
    fn test_point_bytes() {
        let p = point(3.0);
        assert_eq!(Point::from_bytes(&p.to_bytes()), Some(p));
        assert_eq!(Point::from_bytes(&[0; 23]), None);
    }

    #[test]
    fn test_assembler_splits_left_and_right() {
        let mut assembler = ChunkAssembler::default();
        let mut cloud = PointCloud::default();
        assembler.expect(2, 1);

        let bytes: Vec<u8> = [point(0.0), point(10.0), point(20.0)]
            .iter()
            .flat_map(|p| p.to_bytes())
            .collect();

        assembler.push(&bytes[..30], &mut cloud);
        assert!(cloud.is_empty());
        assert_eq!(assembler.remaining(), 42);

        assembler.push(&bytes[30..], &mut cloud);
        assert_eq!(cloud.left, vec![point(0.0), point(10.0)]);
        assert_eq!(cloud.right, vec![point(20.0)]);
        assert_eq!(assembler.remaining(), 0);
    }

    #[test]
    fn test_assembler_ignores_oversized_chunk() {
        let mut assembler = ChunkAssembler::default();
        let mut cloud = PointCloud::default();

        assembler.expect(usize::MAX, 1);
        assert_eq!(assembler.remaining(), 0);
        assembler.push(&point(1.0).to_bytes(), &mut cloud);
        assert!(cloud.is_empty());

        assembler.expect(usize::MAX / POINT_SIZE, usize::MAX / POINT_SIZE);
        assert_eq!(assembler.remaining(), 0);

        assembler.expect(1, 0);
        assembler.push(&point(2.0).to_bytes(), &mut cloud);
        assert_eq!(cloud.left, vec![point(2.0)]);
    }

    #[test]
    fn test_write_xyz() {
        let cloud = PointCloud {
            left: vec![point(1.0)],
            right: vec![],
        };
        let mut out = Vec::new();
        cloud.write_xyz(&mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "1 2 3 0.5 0.25 1\n");
    }
}
