// SPDX-License-Identifier: MIT OR Apache-2.0
//! Little-endian binary streams.
//!
//! [`BlobWriter`] and [`BlobReader`] are the framing layer under every
//! persisted format: snapshots, entity files, prefab resources and
//! command undo payloads. Reads are fallible; a short buffer yields
//! [`StreamError::UnexpectedEof`] instead of a panic.

use glam::{Quat, Vec3};
use thiserror::Error;

use crate::transform::{RigidTransform, Transform};

/// Errors produced while decoding a blob.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StreamError {
    /// The blob ended before the expected value.
    #[error("unexpected end of stream")]
    UnexpectedEof,
    /// A length-prefixed string was not valid UTF-8.
    #[error("invalid utf-8 in string")]
    InvalidUtf8,
}

/// Growable binary output buffer.
#[derive(Debug, Default, Clone)]
pub struct BlobWriter {
    data: Vec<u8>,
}

impl BlobWriter {
    /// An empty writer.
    pub fn new() -> BlobWriter {
        BlobWriter::default()
    }

    /// Bytes written so far.
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Current length in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether nothing has been written.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Drop all written bytes.
    pub fn clear(&mut self) {
        self.data.clear();
    }

    /// Consume the writer, returning the buffer.
    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    /// Append raw bytes.
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    /// Append a single byte.
    pub fn write_u8(&mut self, value: u8) {
        self.data.push(value);
    }

    /// Append a bool as one byte.
    pub fn write_bool(&mut self, value: bool) {
        self.write_u8(u8::from(value));
    }

    /// Append a `u32`.
    pub fn write_u32(&mut self, value: u32) {
        self.data.extend_from_slice(&value.to_le_bytes());
    }

    /// Append an `i32`.
    pub fn write_i32(&mut self, value: i32) {
        self.data.extend_from_slice(&value.to_le_bytes());
    }

    /// Append a `u64`.
    pub fn write_u64(&mut self, value: u64) {
        self.data.extend_from_slice(&value.to_le_bytes());
    }

    /// Append an `f32`.
    pub fn write_f32(&mut self, value: f32) {
        self.data.extend_from_slice(&value.to_le_bytes());
    }

    /// Append a length-prefixed UTF-8 string.
    pub fn write_str(&mut self, value: &str) {
        self.write_u32(value.len() as u32);
        self.data.extend_from_slice(value.as_bytes());
    }

    /// Append a vector as three floats.
    pub fn write_vec3(&mut self, value: Vec3) {
        self.write_f32(value.x);
        self.write_f32(value.y);
        self.write_f32(value.z);
    }

    /// Append a quaternion as four floats.
    pub fn write_quat(&mut self, value: Quat) {
        self.write_f32(value.x);
        self.write_f32(value.y);
        self.write_f32(value.z);
        self.write_f32(value.w);
    }

    /// Append a rigid transform.
    pub fn write_rigid_transform(&mut self, value: &RigidTransform) {
        self.write_vec3(value.position);
        self.write_quat(value.rotation);
    }

    /// Append a full transform including scale.
    pub fn write_transform(&mut self, value: &Transform) {
        self.write_vec3(value.position);
        self.write_quat(value.rotation);
        self.write_f32(value.scale);
    }

    /// Overwrite 4 bytes at `offset` with a `u32` written later.
    ///
    /// Used for back-patched size fields in property payloads.
    pub fn patch_u32(&mut self, offset: usize, value: u32) {
        self.data[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    }
}

/// Cursor over a binary input buffer.
#[derive(Debug, Clone, Copy)]
pub struct BlobReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> BlobReader<'a> {
    /// A reader over `data` starting at the beginning.
    pub fn new(data: &'a [u8]) -> BlobReader<'a> {
        BlobReader { data, pos: 0 }
    }

    /// Current byte offset.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Bytes left to read.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    /// Whether the cursor reached the end.
    pub fn is_at_end(&self) -> bool {
        self.pos >= self.data.len()
    }

    /// Skip `count` bytes.
    pub fn skip(&mut self, count: usize) -> Result<(), StreamError> {
        if self.remaining() < count {
            return Err(StreamError::UnexpectedEof);
        }
        self.pos += count;
        Ok(())
    }

    /// Read `count` raw bytes.
    pub fn read_bytes(&mut self, count: usize) -> Result<&'a [u8], StreamError> {
        if self.remaining() < count {
            return Err(StreamError::UnexpectedEof);
        }
        let slice = &self.data[self.pos..self.pos + count];
        self.pos += count;
        Ok(slice)
    }

    /// Read one byte.
    pub fn read_u8(&mut self) -> Result<u8, StreamError> {
        Ok(self.read_bytes(1)?[0])
    }

    /// Read a bool written by [`BlobWriter::write_bool`].
    pub fn read_bool(&mut self) -> Result<bool, StreamError> {
        Ok(self.read_u8()? != 0)
    }

    /// Read a `u32`.
    pub fn read_u32(&mut self) -> Result<u32, StreamError> {
        let bytes = self.read_bytes(4)?;
        Ok(u32::from_le_bytes(bytes.try_into().expect("4 bytes")))
    }

    /// Read an `i32`.
    pub fn read_i32(&mut self) -> Result<i32, StreamError> {
        let bytes = self.read_bytes(4)?;
        Ok(i32::from_le_bytes(bytes.try_into().expect("4 bytes")))
    }

    /// Read a `u64`.
    pub fn read_u64(&mut self) -> Result<u64, StreamError> {
        let bytes = self.read_bytes(8)?;
        Ok(u64::from_le_bytes(bytes.try_into().expect("8 bytes")))
    }

    /// Read an `f32`.
    pub fn read_f32(&mut self) -> Result<f32, StreamError> {
        let bytes = self.read_bytes(4)?;
        Ok(f32::from_le_bytes(bytes.try_into().expect("4 bytes")))
    }

    /// Read a length-prefixed UTF-8 string.
    pub fn read_string(&mut self) -> Result<String, StreamError> {
        let len = self.read_u32()? as usize;
        let bytes = self.read_bytes(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| StreamError::InvalidUtf8)
    }

    /// Read a vector written by [`BlobWriter::write_vec3`].
    pub fn read_vec3(&mut self) -> Result<Vec3, StreamError> {
        Ok(Vec3::new(self.read_f32()?, self.read_f32()?, self.read_f32()?))
    }

    /// Read a quaternion written by [`BlobWriter::write_quat`].
    pub fn read_quat(&mut self) -> Result<Quat, StreamError> {
        Ok(Quat::from_xyzw(
            self.read_f32()?,
            self.read_f32()?,
            self.read_f32()?,
            self.read_f32()?,
        ))
    }

    /// Read a rigid transform.
    pub fn read_rigid_transform(&mut self) -> Result<RigidTransform, StreamError> {
        Ok(RigidTransform {
            position: self.read_vec3()?,
            rotation: self.read_quat()?,
        })
    }

    /// Read a full transform including scale.
    pub fn read_transform(&mut self) -> Result<Transform, StreamError> {
        Ok(Transform {
            position: self.read_vec3()?,
            rotation: self.read_quat()?,
            scale: self.read_f32()?,
        })
    }
}
