/*
    mkdeb - Rust library for assembling binary Deb packages
    Copyright (C) 2023  NotSludgeBomb

    This program is free software: you can redistribute it and/or modify
    it under the terms of the GNU General Public License as published by
    the Free Software Foundation, either version 3 of the License, or
    (at your option) any later version.

    This program is distributed in the hope that it will be useful,
    but WITHOUT ANY WARRANTY; without even the implied warranty of
    MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
    GNU General Public License for more details.

    You should have received a copy of the GNU General Public License
    along with this program.  If not, see <https://www.gnu.org/licenses/>.
*/

//! Writer for the outer Unix `ar` container of a Deb package.
//!
//! Only the common format is produced. Names longer than 16 bytes would need
//! the GNU or BSD long name extensions, which Deb members never need.

use std::io::{self, Read, Write};

use crate::error::{DebError, Result};

/// Global header at the start of every archive.
pub const AR_MAGIC: &[u8; 8] = b"!<arch>\n";

/// Trailer of every member header.
pub const AR_HEADER_MAGIC: &[u8; 2] = b"\x60\x0a";

pub const AR_HEADER_LEN: usize = 60;
pub const AR_NAME_MAX: usize = 16;

/// Member sizes must stay below this, as the size field holds ten decimal digits.
pub const AR_SIZE_LIMIT: u64 = 10_000_000_000;

/// Metadata of a single `ar` member.
///
/// Owner and mode are optional; a missing value is written as blanks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArEntry {
    name: String,
    mtime: u64,
    uid: Option<u32>,
    gid: Option<u32>,
    mode: Option<u32>,
    size: u64,
}

impl ArEntry {
    /// Creates an entry owned by root with mode `0o100644`.
    pub fn new(name: &str, size: u64) -> Self {
        Self {
            name: name.to_string(),
            mtime: 0,
            uid: Some(0),
            gid: Some(0),
            mode: Some(0o100644),
            size,
        }
    }

    pub fn set_mtime(mut self, mtime: u64) -> Self {
        self.mtime = mtime;
        self
    }

    pub fn set_uid(mut self, uid: Option<u32>) -> Self {
        self.uid = uid;
        self
    }

    pub fn set_gid(mut self, gid: Option<u32>) -> Self {
        self.gid = gid;
        self
    }

    pub fn set_mode(mut self, mode: Option<u32>) -> Self {
        self.mode = mode;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Encodes the 60 byte member header.
    pub fn encode(&self) -> Result<[u8; AR_HEADER_LEN]> {
        if self.name.is_empty() || self.name.len() > AR_NAME_MAX {
            return Err(DebError::Format(format!(
                "ar member name {:?} must be 1 to {} bytes long",
                self.name, AR_NAME_MAX
            )));
        }
        if !self.name.is_ascii() || self.name.contains('/') {
            return Err(DebError::Format(format!(
                "ar member name {:?} must be ASCII without path separators",
                self.name
            )));
        }
        if self.size >= AR_SIZE_LIMIT {
            return Err(DebError::Range {
                field: "ar size",
                value: self.size,
                max: AR_SIZE_LIMIT - 1,
            });
        }

        let mut header = [b' '; AR_HEADER_LEN];
        header[0..16][..self.name.len()].copy_from_slice(self.name.as_bytes());
        put_number(&mut header[16..28], "ar mtime", self.mtime, 10)?;
        if let Some(uid) = self.uid {
            put_number(&mut header[28..34], "ar uid", uid.into(), 10)?;
        }
        if let Some(gid) = self.gid {
            put_number(&mut header[34..40], "ar gid", gid.into(), 10)?;
        }
        if let Some(mode) = self.mode {
            put_number(&mut header[40..48], "ar mode", mode.into(), 8)?;
        }
        put_number(&mut header[48..58], "ar size", self.size, 10)?;
        header[58..60].copy_from_slice(AR_HEADER_MAGIC);

        Ok(header)
    }
}

// Writes a left aligned, space padded number into a header field
fn put_number(field: &mut [u8], name: &'static str, value: u64, radix: u64) -> Result<()> {
    let text = match radix {
        8 => format!("{value:o}"),
        _ => value.to_string(),
    };
    if text.len() > field.len() {
        return Err(DebError::Range {
            field: name,
            value,
            max: radix.saturating_pow(field.len() as u32) - 1,
        });
    }
    field[..text.len()].copy_from_slice(text.as_bytes());
    Ok(())
}

/// Streams members into an `ar` archive.
///
/// [`ArEncoder::initialize`] writes the global header and must be called exactly
/// once before the first member.
pub struct ArEncoder<W: Write> {
    inner: W,
    offset: u64,
    initialized: bool,
}

impl<W: Write> ArEncoder<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            offset: 0,
            initialized: false,
        }
    }

    /// Writes the global `!<arch>` header.
    pub fn initialize(&mut self) -> Result<()> {
        if self.initialized {
            return Err(DebError::InvalidState("ar archive is already initialized"));
        }
        self.write_raw(AR_MAGIC)?;
        self.initialized = true;
        Ok(())
    }

    /// Writes one member.
    ///
    /// Exactly `entry.size()` bytes are taken from `content`. A source that ends
    /// early is an error, as the header already promised the full size.
    pub fn write_entry<R: Read>(&mut self, entry: &ArEntry, content: R) -> Result<()> {
        if !self.initialized {
            return Err(DebError::InvalidState("ar archive is not initialized"));
        }

        let header = entry.encode()?;
        self.write_raw(&header)?;

        let copied = io::copy(&mut content.take(entry.size()), &mut self.inner)?;
        self.offset += copied;
        if copied != entry.size() {
            return Err(DebError::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!(
                    "ar member {} declared {} bytes but only {} were available",
                    entry.name(),
                    entry.size(),
                    copied
                ),
            )));
        }

        // Members start on even offsets
        if self.offset % 2 != 0 {
            self.write_raw(b"\n")?;
        }

        Ok(())
    }

    /// Current number of bytes written to the destination.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Flushes and returns the destination writer.
    pub fn into_inner(mut self) -> Result<W> {
        self.inner.flush()?;
        Ok(self.inner)
    }

    fn write_raw(&mut self, bytes: &[u8]) -> Result<()> {
        self.inner.write_all(bytes)?;
        self.offset += bytes.len() as u64;
        Ok(())
    }
}
