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

//! Writer for the `tar` archives nested inside a Deb package.
//!
//! Headers are written in either the classic (v7) layout or the POSIX ustar
//! layout, which adds the owner name fields. Names that do not fit the 100 byte
//! name field are carried by a GNU `././@LongLink` pseudo-entry placed in front
//! of the real header.
//!
//! More about the header layout here:
//! https://www.gnu.org/software/tar/manual/html_node/Standard.html

use std::io::{self, Read, Write};

use crate::error::{DebError, Result};

pub const BLOCK_SIZE: usize = 512;

/// Longest name written directly into a header. Anything longer goes through
/// the long name pseudo-entry.
pub const NAME_MAX: usize = 99;

/// Name of the pseudo-entry carrying a long name.
pub const LONG_LINK_NAME: &str = "././@LongLink";

const NAME_FIELD: std::ops::Range<usize> = 0..100;
const MODE_FIELD: std::ops::Range<usize> = 100..108;
const UID_FIELD: std::ops::Range<usize> = 108..116;
const GID_FIELD: std::ops::Range<usize> = 116..124;
const SIZE_FIELD: std::ops::Range<usize> = 124..136;
const MTIME_FIELD: std::ops::Range<usize> = 136..148;
const CHECKSUM_FIELD: std::ops::Range<usize> = 148..156;
const TYPEFLAG_OFFSET: usize = 156;
const MAGIC_FIELD: std::ops::Range<usize> = 257..263;
const VERSION_FIELD: std::ops::Range<usize> = 263..265;
const UNAME_FIELD: std::ops::Range<usize> = 265..297;
const GNAME_FIELD: std::ops::Range<usize> = 297..329;

/// Values of the typeflag header field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryType {
    Regular,
    Directory,
    /// GNU extension: the entry's content is the link name of the next entry.
    LongLink,
    /// GNU extension: the entry's content is the name of the next entry.
    LongName,
}

impl EntryType {
    pub fn as_byte(&self) -> u8 {
        match self {
            EntryType::Regular => b'0',
            EntryType::Directory => b'5',
            EntryType::LongLink => b'K',
            EntryType::LongName => b'L',
        }
    }
}

/// Selects how headers are laid out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum HeaderFormat {
    /// Pre-POSIX layout: no magic, no owner names.
    Classic,
    /// POSIX ustar layout with `ustar\0` magic and owner names.
    #[default]
    Ustar,
}

/// Metadata of a single tar entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TarHeader {
    name: Vec<u8>,
    mode: u32,
    uid: u32,
    gid: u32,
    size: u64,
    mtime: u64,
    entry_type: EntryType,
    uname: Option<String>,
    gname: Option<String>,
}

impl TarHeader {
    /// Creates a header for a regular file owned by root.
    pub fn new_file<N: Into<Vec<u8>>>(name: N, size: u64) -> Self {
        Self {
            name: name.into(),
            mode: 0o644,
            uid: 0,
            gid: 0,
            size,
            mtime: 0,
            entry_type: EntryType::Regular,
            uname: None,
            gname: None,
        }
    }

    /// Creates a header for a directory, adding the trailing `/` if missing.
    pub fn new_directory<N: Into<Vec<u8>>>(name: N) -> Self {
        let mut name = name.into();
        if name.last() != Some(&b'/') {
            name.push(b'/');
        }
        Self {
            name,
            mode: 0o755,
            size: 0,
            entry_type: EntryType::Directory,
            ..Self::new_file(Vec::new(), 0)
        }
    }

    pub fn set_mode(mut self, mode: u32) -> Self {
        self.mode = mode;
        self
    }

    pub fn set_owner(mut self, uid: u32, gid: u32) -> Self {
        self.uid = uid;
        self.gid = gid;
        self
    }

    /// Sets the owner names written by [`HeaderFormat::Ustar`].
    ///
    /// Without names, the octal rendering of uid and gid is written instead.
    pub fn set_owner_names(mut self, uname: Option<&str>, gname: Option<&str>) -> Self {
        self.uname = uname.map(str::to_string);
        self.gname = gname.map(str::to_string);
        self
    }

    pub fn set_mtime(mut self, mtime: u64) -> Self {
        self.mtime = mtime;
        self
    }

    pub fn set_entry_type(mut self, entry_type: EntryType) -> Self {
        self.entry_type = entry_type;
        self
    }

    pub fn name(&self) -> &[u8] {
        &self.name
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn entry_type(&self) -> EntryType {
        self.entry_type
    }

    /// Encodes the 512 byte header block, checksum included.
    ///
    /// Fails with [`DebError::Format`] if the name does not fit the name field;
    /// [`TarEncoder::write_entry`] shortens long names before getting here.
    pub fn encode(&self, format: HeaderFormat) -> Result<[u8; BLOCK_SIZE]> {
        if self.name.len() > NAME_FIELD.len() {
            return Err(DebError::Format(format!(
                "tar name {:?} exceeds {} bytes",
                String::from_utf8_lossy(&self.name),
                NAME_FIELD.len()
            )));
        }

        let mut block = [0u8; BLOCK_SIZE];
        block[..self.name.len()].copy_from_slice(&self.name);
        put_octal(&mut block[MODE_FIELD], "tar mode", self.mode.into())?;
        put_octal(&mut block[UID_FIELD], "tar uid", self.uid.into())?;
        put_octal(&mut block[GID_FIELD], "tar gid", self.gid.into())?;
        put_octal(&mut block[SIZE_FIELD], "tar size", self.size)?;
        put_octal(&mut block[MTIME_FIELD], "tar mtime", self.mtime)?;
        block[TYPEFLAG_OFFSET] = self.entry_type.as_byte();

        if format == HeaderFormat::Ustar {
            block[MAGIC_FIELD].copy_from_slice(b"ustar\0");
            block[VERSION_FIELD].copy_from_slice(b"00");
            let uname = self.uname.clone().unwrap_or_else(|| format!("{:o}", self.uid));
            let gname = self.gname.clone().unwrap_or_else(|| format!("{:o}", self.gid));
            put_text(&mut block[UNAME_FIELD], "uname", &uname)?;
            put_text(&mut block[GNAME_FIELD], "gname", &gname)?;
        }

        let checksum = checksum(&block);
        block[CHECKSUM_FIELD].copy_from_slice(format!("{checksum:06o}\0 ").as_bytes());

        Ok(block)
    }
}

/// Computes the header checksum: the unsigned sum of all header bytes, with the
/// checksum field itself counted as spaces.
pub fn checksum(block: &[u8; BLOCK_SIZE]) -> u32 {
    block
        .iter()
        .enumerate()
        .map(|(i, b)| {
            if CHECKSUM_FIELD.contains(&i) {
                u32::from(b' ')
            } else {
                u32::from(*b)
            }
        })
        .sum()
}

// Zero padded octal digits filling all but the last byte, which stays NUL
fn put_octal(field: &mut [u8], name: &'static str, value: u64) -> Result<()> {
    let digits = field.len() - 1;
    let text = format!("{value:0digits$o}");
    if text.len() > digits {
        return Err(DebError::Range {
            field: name,
            value,
            max: 8u64.pow(digits as u32) - 1,
        });
    }
    field[..digits].copy_from_slice(text.as_bytes());
    field[digits] = 0;
    Ok(())
}

// NUL terminated text
fn put_text(field: &mut [u8], name: &str, value: &str) -> Result<()> {
    if value.len() >= field.len() {
        return Err(DebError::Format(format!(
            "{name} {value:?} exceeds {} bytes",
            field.len() - 1
        )));
    }
    field[..value.len()].copy_from_slice(value.as_bytes());
    Ok(())
}

/// Streams entries into a tar archive.
///
/// The encoder must be closed, which writes the two zero blocks marking the end
/// of the archive. Writing after that fails with [`DebError::InvalidState`].
pub struct TarEncoder<W: Write> {
    inner: W,
    format: HeaderFormat,
    closed: bool,
}

impl<W: Write> TarEncoder<W> {
    pub fn new(inner: W, format: HeaderFormat) -> Self {
        Self {
            inner,
            format,
            closed: false,
        }
    }

    /// Writes a single header block, without any long name handling.
    pub fn write_header(&mut self, header: &TarHeader) -> Result<()> {
        self.ensure_open()?;
        let block = header.encode(self.format)?;
        self.inner.write_all(&block)?;
        Ok(())
    }

    /// Copies exactly `size` bytes of `source` into the archive.
    ///
    /// A source running dry is zero filled up to `size`, so the archive keeps the
    /// length its header declared.
    pub fn write_content<R: Read>(&mut self, size: u64, source: R) -> Result<()> {
        self.ensure_open()?;
        let copied = io::copy(&mut source.take(size), &mut self.inner)?;
        if copied < size {
            io::copy(&mut io::repeat(0).take(size - copied), &mut self.inner)?;
        }
        Ok(())
    }

    /// Pads content of `size` bytes out to the next block boundary.
    pub fn align_to_512(&mut self, size: u64) -> Result<()> {
        self.ensure_open()?;
        let remainder = (size % BLOCK_SIZE as u64) as usize;
        if remainder != 0 {
            self.inner.write_all(&[0u8; BLOCK_SIZE][remainder..])?;
        }
        Ok(())
    }

    /// Writes a complete entry: the long name pseudo-entry when needed, the
    /// header, `header.size()` bytes of content and the block padding.
    pub fn write_entry<R: Read>(&mut self, header: &TarHeader, source: R) -> Result<()> {
        self.ensure_open()?;

        if header.name().len() > NAME_MAX {
            self.write_long_name(header)?;
            let mut truncated = header.clone();
            truncated.name.truncate(NAME_MAX);
            self.write_header(&truncated)?;
        } else {
            self.write_header(header)?;
        }

        self.write_content(header.size(), source)?;
        self.align_to_512(header.size())
    }

    /// Writes a directory entry. `path` gets a trailing `/` if it lacks one.
    pub fn write_directory_entry(
        &mut self,
        path: &str,
        uid: u32,
        gid: u32,
        mode: u32,
        mtime: u64,
    ) -> Result<()> {
        let header = TarHeader::new_directory(path)
            .set_owner(uid, gid)
            .set_mode(mode)
            .set_mtime(mtime);
        self.write_entry(&header, io::empty())
    }

    // The full name, NUL terminated, as content of a `././@LongLink` entry
    fn write_long_name(&mut self, header: &TarHeader) -> Result<()> {
        let mut content = header.name().to_vec();
        content.push(0);
        let size = content.len() as u64;

        let pseudo = TarHeader::new_file(LONG_LINK_NAME, size)
            .set_entry_type(EntryType::LongName)
            .set_mode(header.mode)
            .set_owner(header.uid, header.gid)
            .set_owner_names(header.uname.as_deref(), header.gname.as_deref())
            .set_mtime(header.mtime);
        self.write_header(&pseudo)?;
        self.write_content(size, content.as_slice())?;
        self.align_to_512(size)
    }

    /// Writes the end of archive marker. Calling this again does nothing.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.inner.write_all(&[0u8; 2 * BLOCK_SIZE])?;
        self.closed = true;
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Closes the archive and returns the underlying writer.
    pub fn finish(mut self) -> Result<W> {
        self.close()?;
        self.inner.flush()?;
        Ok(self.inner)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(DebError::InvalidState("tar archive is already closed"));
        }
        Ok(())
    }
}
