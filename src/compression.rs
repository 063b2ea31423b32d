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

use std::io::{self, Write};

use flate2::write::GzEncoder;
use xz::write::XzEncoder;

use crate::error::Result;

// Used to configure which compression format is used for data and control archives
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DebCompression {
    #[default]
    Gzip,
    Xz,
    Zstd,
}

impl DebCompression {
    /// Returns the file extension used for archive members, including the dot.
    pub fn extension(&self) -> &'static str {
        match self {
            DebCompression::Gzip => ".gz",
            DebCompression::Xz => ".xz",
            DebCompression::Zstd => ".zst",
        }
    }

    // Wraps `inner` in a streaming encoder for this format
    pub(crate) fn writer<W: Write>(&self, inner: W) -> Result<CompressedWriter<W>> {
        Ok(match self {
            DebCompression::Gzip => {
                CompressedWriter::Gzip(GzEncoder::new(inner, flate2::Compression::default()))
            }
            DebCompression::Xz => CompressedWriter::Xz(XzEncoder::new(inner, 9)),
            DebCompression::Zstd => {
                CompressedWriter::Zstd(zstd::stream::write::Encoder::new(inner, 0)?)
            }
        })
    }
}

/// A compressing writer sitting between a tar encoder and its in-memory buffer.
///
/// `finish` must be called once the tar stream is closed so the trailer of the
/// compressed stream gets written.
pub(crate) enum CompressedWriter<W: Write> {
    Gzip(GzEncoder<W>),
    Xz(XzEncoder<W>),
    Zstd(zstd::stream::write::Encoder<'static, W>),
}

impl<W: Write> CompressedWriter<W> {
    pub(crate) fn finish(self) -> io::Result<W> {
        match self {
            CompressedWriter::Gzip(encoder) => encoder.finish(),
            CompressedWriter::Xz(encoder) => encoder.finish(),
            CompressedWriter::Zstd(encoder) => encoder.finish(),
        }
    }
}

impl<W: Write> Write for CompressedWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            CompressedWriter::Gzip(encoder) => encoder.write(buf),
            CompressedWriter::Xz(encoder) => encoder.write(buf),
            CompressedWriter::Zstd(encoder) => encoder.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            CompressedWriter::Gzip(encoder) => encoder.flush(),
            CompressedWriter::Xz(encoder) => encoder.flush(),
            CompressedWriter::Zstd(encoder) => encoder.flush(),
        }
    }
}
