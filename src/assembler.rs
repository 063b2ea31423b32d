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

//! Drives the encoders to turn a [`DebPackage`] into a `.deb` byte stream.
//!
//! The outer `ar` archive always holds, in this order, `debian-binary`, the
//! compressed control tar and the compressed data tar. Each tar is fully
//! buffered in memory before it is handed to the `ar` encoder.
//!
//! `md5sums` and `Installed-Size` are computed from the raw source bytes, while
//! text entries are archived with their CR bytes stripped. For such files the
//! checksum in `md5sums` does not match the installed file.

use std::collections::{HashMap, HashSet};
use std::io::Write;

use log::{debug, info, warn};

use crate::ar_encoder::{ArEncoder, ArEntry};
use crate::binary::DebPackage;
use crate::compression::CompressedWriter;
use crate::error::{BuildStage, DebError, Result};
use crate::shared::ManifestEntry;
use crate::tar_encoder::{TarEncoder, TarHeader};

/// Content of the `debian-binary` member.
pub const DEBIAN_BINARY: &[u8] = b"2.0\n";

type InnerArchive = TarEncoder<CompressedWriter<Vec<u8>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AssemblerState {
    Init,
    VersionWritten,
    ControlWritten,
    DataWritten,
    Closed,
}

/// Writes one package. Directories already emitted to the data archive are
/// tracked per instance, so every build starts from a clean slate.
pub(crate) struct PackageAssembler<'a, W: Write> {
    package: &'a DebPackage,
    ar: ArEncoder<W>,
    state: AssemblerState,
    created_dirs: HashSet<String>,
    // First explicit manifest entry for each directory path
    explicit_dirs: HashMap<&'a str, &'a ManifestEntry>,
    now: u64,
}

impl<'a, W: Write> PackageAssembler<'a, W> {
    pub(crate) fn new(package: &'a DebPackage, output: W) -> Self {
        Self {
            package,
            ar: ArEncoder::new(output),
            state: AssemblerState::Init,
            created_dirs: HashSet::new(),
            explicit_dirs: HashMap::new(),
            now: timestamp(chrono::Utc::now()),
        }
    }

    /// Writes the whole package and returns the output writer.
    pub(crate) fn assemble(mut self) -> Result<W> {
        info!(
            "building {} {} with {} manifest entries",
            self.package.name(),
            self.package.version(),
            self.package.files().len()
        );

        self.write_version()?;
        self.write_control()?;
        self.write_data()?;
        self.close()
    }

    fn write_version(&mut self) -> Result<()> {
        self.expect_state(AssemblerState::Init)?;
        self.write_debian_binary()
            .map_err(|e| e.during(BuildStage::Version, "debian-binary"))?;
        self.state = AssemblerState::VersionWritten;
        Ok(())
    }

    fn write_debian_binary(&mut self) -> Result<()> {
        let entry =
            ArEntry::new("debian-binary", DEBIAN_BINARY.len() as u64).set_mtime(self.mtime());
        self.ar.initialize()?;
        self.ar.write_entry(&entry, DEBIAN_BINARY)
    }

    fn write_control(&mut self) -> Result<()> {
        self.expect_state(AssemblerState::VersionWritten)?;
        let stage = BuildStage::Control;
        let package = self.package;
        let mtime = self.mtime();

        let mut md5sums = String::new();
        let mut conffiles = String::new();
        let mut byte_count: u64 = 0;
        for entry in package.files() {
            let Some(source) = entry.source() else {
                continue;
            };
            let raw = source.read().map_err(|e| e.during(stage, entry.path()))?;
            byte_count += raw.len() as u64;
            md5sums.push_str(&format!("{:x}  {}\n", md5::compute(&raw), entry.path()));
            if entry.config() {
                conffiles.push_str(&format!("/{}\n", entry.path()));
            }
        }
        let installed_size = byte_count.div_ceil(1024);

        let version = package
            .converted_version()
            .map_err(|e| e.during(stage, "control"))?;
        let control = package.control().serialize(&version, installed_size);

        let mut tar = self.open_inner().map_err(|e| e.during(stage, "control"))?;
        let generated = [
            ("control", control),
            ("md5sums", md5sums.into_bytes()),
            ("conffiles", conffiles.into_bytes()),
        ];
        for (name, content) in generated {
            debug!("adding {} to control archive", name);
            let header = TarHeader::new_file(name, content.len() as u64).set_mtime(mtime);
            tar.write_entry(&header, content.as_slice())
                .map_err(|e| e.during(stage, name))?;
        }
        for entry in package.scripts().chain(package.control_files()) {
            self.add_file(&mut tar, entry, false)
                .map_err(|e| e.during(stage, entry.path()))?;
        }

        let name = format!("control.tar{}", package.compression().extension());
        self.finish_inner(tar, &name)
            .map_err(|e| e.during(stage, &name))?;
        self.state = AssemblerState::ControlWritten;
        Ok(())
    }

    fn write_data(&mut self) -> Result<()> {
        self.expect_state(AssemblerState::ControlWritten)?;
        let stage = BuildStage::Data;
        let package = self.package;

        let mut tar = self.open_inner().map_err(|e| e.during(stage, "data"))?;

        for entry in package.files().iter().filter(|entry| entry.is_dir()) {
            if self.explicit_dirs.contains_key(entry.path()) {
                warn!("directory {} is listed more than once, keeping the first", entry.path());
            } else {
                self.explicit_dirs.insert(entry.path(), entry);
            }
        }

        // Directories as a group go before files, each group in manifest order
        let (directories, files): (Vec<&ManifestEntry>, Vec<&ManifestEntry>) =
            package.files().iter().partition(|entry| entry.is_dir());

        for entry in directories {
            self.add_directory(&mut tar, entry)
                .map_err(|e| e.during(stage, entry.path()))?;
        }
        for entry in files {
            self.add_file(&mut tar, entry, true)
                .map_err(|e| e.during(stage, entry.path()))?;
        }

        let name = format!("data.tar{}", package.compression().extension());
        self.finish_inner(tar, &name)
            .map_err(|e| e.during(stage, &name))?;
        self.state = AssemblerState::DataWritten;
        Ok(())
    }

    fn close(mut self) -> Result<W> {
        self.expect_state(AssemblerState::DataWritten)?;
        self.state = AssemblerState::Closed;
        debug!("package complete, {} bytes", self.ar.offset());
        self.ar.into_inner()
    }

    // Buffer, compressor and tar encoder for one inner archive
    fn open_inner(&self) -> Result<InnerArchive> {
        let compressor = self.package.compression().writer(Vec::new())?;
        Ok(TarEncoder::new(compressor, self.package.header_format()))
    }

    // The tar end marker goes out before the compressor writes its trailer
    fn finish_inner(&mut self, tar: InnerArchive, name: &str) -> Result<()> {
        let compressed = tar.finish()?.finish()?;
        debug!("adding {} ({} bytes) to package", name, compressed.len());
        let entry = ArEntry::new(name, compressed.len() as u64).set_mtime(self.mtime());
        self.ar.write_entry(&entry, compressed.as_slice())
    }

    fn add_directory(&mut self, tar: &mut InnerArchive, entry: &ManifestEntry) -> Result<()> {
        if entry.path().is_empty() {
            return Err(DebError::Format("directory entry has an empty path".into()));
        }
        self.ensure_parents(tar, entry.path(), entry.uid(), entry.gid())?;
        if !self.created_dirs.insert(entry.path().to_string()) {
            debug!("directory {} already written", entry.path());
            return Ok(());
        }
        debug!("adding directory {}", entry.path());
        tar.write_directory_entry(
            entry.path(),
            entry.uid(),
            entry.gid(),
            entry.mode(),
            self.mtime(),
        )
    }

    fn add_file(
        &mut self,
        tar: &mut InnerArchive,
        entry: &ManifestEntry,
        with_parents: bool,
    ) -> Result<()> {
        let Some(source) = entry.source() else {
            return Err(DebError::Format(format!(
                "file entry {} has no source",
                entry.path()
            )));
        };
        if entry.path().is_empty() {
            return Err(DebError::Format("file entry has an empty path".into()));
        }
        if with_parents {
            self.ensure_parents(tar, entry.path(), entry.uid(), entry.gid())?;
        }

        let raw = source.read()?;
        let content = if entry.text() {
            let stripped = strip_carriage_returns(&raw);
            if stripped.len() != raw.len() {
                warn!(
                    "stripped {} CR bytes from {}; its md5sums line covers the unconverted content",
                    raw.len() - stripped.len(),
                    entry.path()
                );
            }
            stripped
        } else {
            raw.into_owned()
        };

        debug!("adding file {} ({} bytes)", entry.path(), content.len());
        let mtime = match self.package.mtime() {
            Some(fixed) => timestamp(fixed),
            None => source.mtime().unwrap_or(self.now),
        };
        let header = TarHeader::new_file(entry.path(), content.len() as u64)
            .set_mode(entry.mode())
            .set_owner(entry.uid(), entry.gid())
            .set_mtime(mtime);
        tar.write_entry(&header, content.as_slice())
    }

    // Emits every ancestor of `path` not written yet, outermost first. An
    // ancestor listed in the manifest keeps its own mode and owner.
    fn ensure_parents(
        &mut self,
        tar: &mut InnerArchive,
        path: &str,
        uid: u32,
        gid: u32,
    ) -> Result<()> {
        let Some((parent, _)) = path.rsplit_once('/') else {
            return Ok(());
        };
        if parent.is_empty() {
            return Ok(());
        }
        self.ensure_parents(tar, parent, uid, gid)?;
        if self.created_dirs.insert(parent.to_string()) {
            debug!("adding parent directory {}", parent);
            let (mode, uid, gid) = match self.explicit_dirs.get(parent) {
                Some(explicit) => (explicit.mode(), explicit.uid(), explicit.gid()),
                None => (self.package.default_dir_mode(), uid, gid),
            };
            tar.write_directory_entry(parent, uid, gid, mode, self.mtime())?;
        }
        Ok(())
    }

    fn mtime(&self) -> u64 {
        self.package.mtime().map(timestamp).unwrap_or(self.now)
    }

    fn expect_state(&self, expected: AssemblerState) -> Result<()> {
        if self.state != expected {
            return Err(DebError::InvalidState("package sections written out of order"));
        }
        Ok(())
    }
}

// Seconds since the epoch, clamped at zero
fn timestamp(time: chrono::DateTime<chrono::Utc>) -> u64 {
    u64::try_from(time.timestamp()).unwrap_or(0)
}

/// Converts DOS to Unix line endings by dropping every CR byte.
pub fn strip_carriage_returns(content: &[u8]) -> Vec<u8> {
    content.iter().copied().filter(|b| *b != b'\r').collect()
}
