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

use std::borrow::Cow;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, Utc};

use crate::error::{DebError, Result};

// Represents the various architectures Deb supports, according to
// https://wiki.debian.org/SupportedArchitectures
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DebArchitecture {
    All,
    Alpha,
    Arm,
    Armel,
    Armhf,
    Arm64,
    Hppa,
    I386,
    Amd64,
    Ia64,
    M68k,
    Mips,
    Mipsel,
    Mips64el,
    PowerPC,
    PowerSPE,
    Ppc64,
    Ppc64el,
    Riscv64,
    S390,
    S390x,
    Sh4,
    Sparc64,
    X32,
    HurdI386,
    NetbsdI386,
    NetbsdAlpha,
    KFreebsdI386,
    KFreebsdAmd64,
}

impl DebArchitecture {
    // Converts DebArchitecture to &str
    pub fn as_str(&self) -> &str {
        match self {
            DebArchitecture::All => "all",
            DebArchitecture::Alpha => "alpha",
            DebArchitecture::Arm => "arm",
            DebArchitecture::Armel => "armel",
            DebArchitecture::Armhf => "armhf",
            DebArchitecture::Arm64 => "arm64",
            DebArchitecture::Hppa => "hppa",
            DebArchitecture::I386 => "i386",
            DebArchitecture::Amd64 => "amd64",
            DebArchitecture::Ia64 => "ia64",
            DebArchitecture::M68k => "m68k",
            DebArchitecture::Mips => "mips",
            DebArchitecture::Mipsel => "mipsel",
            DebArchitecture::Mips64el => "mips64el",
            DebArchitecture::PowerPC => "powerpc",
            DebArchitecture::PowerSPE => "powerpcspe",
            DebArchitecture::Ppc64 => "ppc64",
            DebArchitecture::Ppc64el => "ppc64el",
            DebArchitecture::Riscv64 => "riscv64",
            DebArchitecture::S390 => "s390",
            DebArchitecture::S390x => "s390x",
            DebArchitecture::Sh4 => "sh4",
            DebArchitecture::Sparc64 => "sparc64",
            DebArchitecture::X32 => "x32",
            DebArchitecture::HurdI386 => "hurd-i386",
            DebArchitecture::NetbsdI386 => "netbsd-i386",
            DebArchitecture::NetbsdAlpha => "netbsd-alpha",
            DebArchitecture::KFreebsdI386 => "kfreebsd-i386",
            DebArchitecture::KFreebsdAmd64 => "kfreebsd-amd64",
        }
    }
}

impl FromStr for DebArchitecture {
    type Err = DebError;

    // Converts &str to DebArchitecture
    fn from_str(input: &str) -> Result<Self> {
        match input {
            "all" => Ok(DebArchitecture::All),
            "alpha" => Ok(DebArchitecture::Alpha),
            "arm" => Ok(DebArchitecture::Arm),
            "armel" => Ok(DebArchitecture::Armel),
            "armhf" => Ok(DebArchitecture::Armhf),
            "arm64" => Ok(DebArchitecture::Arm64),
            "hppa" => Ok(DebArchitecture::Hppa),
            "i386" => Ok(DebArchitecture::I386),
            "amd64" => Ok(DebArchitecture::Amd64),
            "ia64" => Ok(DebArchitecture::Ia64),
            "m68k" => Ok(DebArchitecture::M68k),
            "mips" => Ok(DebArchitecture::Mips),
            "mipsel" => Ok(DebArchitecture::Mipsel),
            "mips64el" => Ok(DebArchitecture::Mips64el),
            "powerpc" => Ok(DebArchitecture::PowerPC),
            "powerpcspe" => Ok(DebArchitecture::PowerSPE),
            "ppc64" => Ok(DebArchitecture::Ppc64),
            "ppc64el" => Ok(DebArchitecture::Ppc64el),
            "riscv64" => Ok(DebArchitecture::Riscv64),
            "s390" => Ok(DebArchitecture::S390),
            "s390x" => Ok(DebArchitecture::S390x),
            "sh4" => Ok(DebArchitecture::Sh4),
            "sparc64" => Ok(DebArchitecture::Sparc64),
            "x32" => Ok(DebArchitecture::X32),
            "hurd-i386" => Ok(DebArchitecture::HurdI386),
            "netbsd-i386" => Ok(DebArchitecture::NetbsdI386),
            "netbsd-alpha" => Ok(DebArchitecture::NetbsdAlpha),
            "kfreebsd-i386" => Ok(DebArchitecture::KFreebsdI386),
            "kfreebsd-amd64" => Ok(DebArchitecture::KFreebsdAmd64),
            other => Err(DebError::Format(format!(
                "invalid architecture name {other:?}"
            ))),
        }
    }
}

impl fmt::Display for DebArchitecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// Used for Deb's Priority field
// This is described in Debian's official documentation here:
// https://www.debian.org/doc/debian-policy/ch-controlfields.html#priority
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DebPriority {
    Required,
    Important,
    Standard,
    Optional,
    Extra,
}

impl DebPriority {
    // Converts DebPriority to &str
    pub fn as_str(&self) -> &str {
        match self {
            DebPriority::Required => "required",
            DebPriority::Important => "important",
            DebPriority::Standard => "standard",
            DebPriority::Optional => "optional",
            DebPriority::Extra => "extra",
        }
    }
}

impl FromStr for DebPriority {
    type Err = DebError;

    fn from_str(input: &str) -> Result<Self> {
        match input {
            "required" => Ok(DebPriority::Required),
            "important" => Ok(DebPriority::Important),
            "standard" => Ok(DebPriority::Standard),
            "optional" => Ok(DebPriority::Optional),
            "extra" => Ok(DebPriority::Extra),
            other => Err(DebError::Format(format!("invalid priority name {other:?}"))),
        }
    }
}

/// Where the content of a manifest entry comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntrySource {
    /// A file on disk, read when the package is written.
    Path(PathBuf),
    /// Content held in memory.
    Buffer(Vec<u8>),
}

impl EntrySource {
    // Returns the raw, untransformed content
    pub(crate) fn read(&self) -> Result<Cow<'_, [u8]>> {
        match self {
            EntrySource::Path(path) => fs::read(path)
                .map(Cow::Owned)
                .map_err(|source| DebError::SourceRead {
                    path: path.clone(),
                    source,
                }),
            EntrySource::Buffer(buf) => Ok(Cow::Borrowed(buf.as_slice())),
        }
    }

    // Modification time of an on-disk source, in seconds since the epoch
    pub(crate) fn mtime(&self) -> Option<u64> {
        match self {
            EntrySource::Path(path) => {
                let modified = fs::metadata(path).and_then(|m| m.modified()).ok()?;
                u64::try_from(DateTime::<Utc>::from(modified).timestamp()).ok()
            }
            EntrySource::Buffer(_) => None,
        }
    }
}

/// One file or directory of a package.
///
/// Destination paths are relative to the filesystem root; a leading `/` and
/// repeated separators are dropped. Directory entries have no source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    source: Option<EntrySource>, // Where the file's content comes from
    path: String,                // The path the entry goes to in the archive
    uid: u32,                    // The owner's user ID
    gid: u32,                    // The owner's group ID
    mode: u32,                   // The entry's permissions in octal form
    directory: bool,             // Whether the entry is a directory
    config: bool,                // Whether the file is listed in conffiles
    text: bool,                  // Whether CR bytes are stripped from the content
}

impl ManifestEntry {
    // Creates a file entry read from `from` when the package is written
    pub fn from_path<F, T>(from: F, to: T) -> Self
    where
        F: AsRef<Path>,
        T: AsRef<str>,
    {
        Self::file(EntrySource::Path(from.as_ref().to_path_buf()), to.as_ref())
    }

    // Creates a file entry from Vec<u8>
    pub fn from_buf<T: AsRef<str>>(buf: Vec<u8>, to: T) -> Self {
        Self::file(EntrySource::Buffer(buf), to.as_ref())
    }

    // Creates an empty directory entry
    pub fn directory<T: AsRef<str>>(to: T) -> Self {
        Self {
            source: None,
            path: normalize_path(to.as_ref()),
            uid: 0,
            gid: 0,
            mode: 0o755,
            directory: true,
            config: false,
            text: false,
        }
    }

    fn file(source: EntrySource, to: &str) -> Self {
        Self {
            source: Some(source),
            path: normalize_path(to),
            uid: 0,
            gid: 0,
            mode: 0o644,
            directory: false,
            config: false,
            text: false,
        }
    }

    // Sets the file's mode to have executable permissions
    pub fn is_exec(mut self) -> Self {
        self.mode = 0o755;
        self
    }

    // Marks the file as a configuration file with rw- permissions
    pub fn is_conf(mut self) -> Self {
        self.mode = 0o644;
        self.config = true;
        self
    }

    // Marks the file's content as text, converting CRLF line endings to LF
    pub fn is_text(mut self) -> Self {
        self.text = true;
        self
    }

    // Sets the entry's mode
    pub fn set_mode(mut self, mode: u32) -> Self {
        self.mode = mode;
        self
    }

    // Sets the entry's owner
    pub fn set_owner(mut self, uid: u32, gid: u32) -> Self {
        self.uid = uid;
        self.gid = gid;
        self
    }

    // Sets whether the file is listed in conffiles
    pub fn set_config(mut self, config: bool) -> Self {
        self.config = config;
        self
    }

    // Sets whether the file's line endings are converted
    pub fn set_text(mut self, text: bool) -> Self {
        self.text = text;
        self
    }

    // Sets the entry's path
    pub fn set_path<T: AsRef<str>>(mut self, to: T) -> Self {
        self.path = normalize_path(to.as_ref());
        self
    }

    pub fn source(&self) -> Option<&EntrySource> {
        self.source.as_ref()
    }

    // Returns the entry's path, without a leading slash
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn uid(&self) -> u32 {
        self.uid
    }

    pub fn gid(&self) -> u32 {
        self.gid
    }

    pub fn mode(&self) -> u32 {
        self.mode
    }

    pub fn is_dir(&self) -> bool {
        self.directory
    }

    pub fn config(&self) -> bool {
        self.config
    }

    pub fn text(&self) -> bool {
        self.text
    }
}

// Archive paths are relative to the root, with no empty segments and no
// trailing slash on directories
fn normalize_path(path: &str) -> String {
    path.split('/')
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}
