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

//! Build binary Deb packages.
//!
//! Binary packages contain executable programs, documentation for said executables,
//! configuration files, libraries, etc. Basically, anything that's not source code.
//!
//! # Example
//!
//! ```
//! use std::fs::File;
//! use mkdeb::*;
//! use mkdeb::binary::*;
//!
//! fn main() -> mkdeb::Result<()> {
//!     let package = DebPackage::new("example")
//!         .set_version("0.1.0")
//!         .set_description("mkdeb example")
//!         .set_maintainer("Jane Doe <jane@example.com>")
//!         .set_architecture(DebArchitecture::Amd64)
//!         .with_depend("bash")
//!         .with_file(ManifestEntry::from_path(
//!             "target/release/example",
//!             "/usr/bin/example",
//!         ).is_exec());
//!
//!     package.write(File::create(package.default_file_name()?)?)?;
//!
//!     Ok(())
//! }
//! ```

use crate::assembler::PackageAssembler;
use crate::compression::DebCompression;
use crate::error::{DebError, Result};
use crate::shared::*;
use crate::tar_encoder::HeaderFormat;

use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;

use chrono::{DateTime, Utc};
use regex::Regex;

// Used in DebPackage to store a package's metadata
// More about these fields here:
// https://www.debian.org/doc/debian-policy/ch-controlfields.html#binary-package-control-files-debian-control
#[derive(Debug, Clone)]
pub(crate) struct DebControl {
    name: String,
    version: String,
    architecture: DebArchitecture,
    depends: Vec<String>,
    pre_depends: Vec<String>,
    conflicts: Vec<String>,
    section: String,
    priority: Option<DebPriority>,
    maintainer: String,
    homepage: String,
    description: String,
}

impl DebControl {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            version: String::new(),
            architecture: DebArchitecture::All,
            depends: Vec::new(),
            pre_depends: Vec::new(),
            conflicts: Vec::new(),
            section: String::new(),
            priority: None,
            maintainer: String::new(),
            homepage: String::new(),
            description: String::new(),
        }
    }

    // Checks the fields dpkg requires and the version syntax
    pub(crate) fn validate(&self) -> Result<()> {
        let required = [
            ("Package", self.name.as_str()),
            ("Version", self.version.as_str()),
            ("Maintainer", self.maintainer.as_str()),
            ("Description", self.description.as_str()),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(DebError::Format(format!("{field} field missing")));
            }
        }

        // https://www.debian.org/doc/debian-policy/ch-controlfields.html#s-f-source
        let name_regex = Regex::new(r"^[a-z0-9+.-]+$")?;
        if !name_regex.is_match(&self.name) {
            return Err(DebError::Format(format!("invalid package name {:?}", self.name)));
        }

        // https://www.debian.org/doc/debian-policy/ch-controlfields.html#s-f-version
        let version_regex = Regex::new(r"^[A-Za-z0-9.+~-]+$")?;
        if !version_regex.is_match(&self.version) {
            return Err(DebError::Format(format!(
                "invalid format of the version number {:?}",
                self.version
            )));
        }

        Ok(())
    }

    // Converts DebControl into a dpkg-readable control file
    pub(crate) fn serialize(&self, version: &str, installed_size: u64) -> Vec<u8> {
        // Binding temporary values to longer living variables
        let depends = self.depends.join(", ");
        let pre_depends = self.pre_depends.join(", ");
        let conflicts = self.conflicts.join(", ");
        let installed_size = installed_size.to_string();
        let priority = self.priority.as_ref().map(DebPriority::as_str).unwrap_or("");
        let description = format_description(&self.description);
        let control = [
            ["Package", self.name.as_str()],
            ["Version", version],
            ["Architecture", self.architecture.as_str()],
            ["Depends", depends.as_str()],
            ["Pre-Depends", pre_depends.as_str()],
            ["Conflicts", conflicts.as_str()],
            ["Installed-Size", installed_size.as_str()],
            ["Section", self.section.as_str()],
            ["Priority", priority],
            ["Maintainer", self.maintainer.as_str()],
            ["Homepage", self.homepage.as_str()],
            ["Description", description.as_str()],
        ];
        let mut write_out = String::new();
        for [key, value] in control {
            if !value.is_empty() {
                write_out.push_str(&format!("{key}: {value}\n"));
            }
        }
        write_out.into_bytes()
    }
}

// Continuation lines of multi-line fields start with a space, and empty lines
// are written as " ."
fn format_description(description: &str) -> String {
    let mut lines = description.trim_end().lines();
    let mut output = lines.next().unwrap_or("").trim().to_string();
    for line in lines {
        output.push('\n');
        if line.trim().is_empty() {
            output.push_str(" .");
        } else if line.starts_with(char::is_whitespace) {
            output.push_str(line.trim_end());
        } else {
            output.push(' ');
            output.push_str(line.trim_end());
        }
    }
    output
}

// Rewrites a SemVer pre-release like 1.2.3-beta.4 into 1.2.3~beta.4, which
// dpkg sorts before 1.2.3
fn convert_from_semver(version: &str) -> Result<String> {
    let semver_regex =
        Regex::new(r"^([0-9]+\.[0-9]+\.[0-9]+)-([^-]+)[^.+]*(\.[0-9]+)?(\+[^-]+)?")?;
    Ok(semver_regex.replace(version, "$1~$2$3$4").into_owned())
}

/// Maintainer scripts run by dpkg around installation and removal.
///
/// More about them here:
/// https://www.debian.org/doc/debian-policy/ch-maintainerscripts.html
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MaintainerScript {
    Preinst,
    Postinst,
    Prerm,
    Postrm,
}

impl MaintainerScript {
    /// Name of the script inside the control archive.
    pub fn as_str(&self) -> &str {
        match self {
            MaintainerScript::Preinst => "preinst",
            MaintainerScript::Postinst => "postinst",
            MaintainerScript::Prerm => "prerm",
            MaintainerScript::Postrm => "postrm",
        }
    }
}

/// A high-level structure representing a Deb package.
///
/// Holds the package's metadata, the manifest of files and directories to
/// install, the maintainer scripts and the settings used when writing the
/// `.deb` file.
///
/// For binary package's, it may be helpful to read
/// [Debian's documentation on binary packages' metadata][1].
///
/// [1]: https://www.debian.org/doc/debian-policy/ch-controlfields.html#binary-package-control-files-debian-control
#[derive(Debug, Clone)]
pub struct DebPackage {
    control: DebControl,                               // Package's metadata
    data: Vec<ManifestEntry>,                          // Package's contents
    scripts: BTreeMap<MaintainerScript, ManifestEntry>, // Package's maintainer scripts
    control_files: Vec<ManifestEntry>,                 // Extra files for the control archive
    compression: DebCompression,                       // Compression of the inner archives
    mtime: Option<DateTime<Utc>>,                      // Fixed timestamp for all entries
    header_format: HeaderFormat,                       // Layout of tar headers
    default_dir_mode: u32,                             // Mode of synthesized directories
    convert_from_semver: bool,                         // Rewrite SemVer pre-releases
}

impl DebPackage {
    /// Creates a new DebPackage with `name` as it's name.
    pub fn new(name: &str) -> Self {
        Self {
            control: DebControl::new(name),
            data: Vec::new(),
            scripts: BTreeMap::new(),
            control_files: Vec::new(),
            compression: DebCompression::Gzip,
            mtime: None,
            header_format: HeaderFormat::Ustar,
            default_dir_mode: 0o755,
            convert_from_semver: false,
        }
    }

    /// Sets the package's name.
    pub fn set_name(mut self, name: &str) -> Self {
        self.control.name = name.to_string();
        self
    }

    /// Sets the package's version. Surrounding whitespace is removed.
    pub fn set_version(mut self, version: &str) -> Self {
        self.control.version = version.trim().to_string();
        self
    }

    /// Sets whether SemVer pre-release versions are rewritten to Debian's
    /// `~` convention when written.
    pub fn set_convert_from_semver(mut self, convert: bool) -> Self {
        self.convert_from_semver = convert;
        self
    }

    /// Sets the package's architecture.
    pub fn set_architecture(mut self, architecture: DebArchitecture) -> Self {
        self.control.architecture = architecture;
        self
    }

    /// Adds a single dependency from &str.
    pub fn with_depend(mut self, depend: &str) -> Self {
        self.control.depends.push(depend.to_string());
        self
    }

    /// Adds a number of dependencies from Vec<&str>.
    pub fn with_depends(mut self, depends: Vec<&str>) -> Self {
        self.control
            .depends
            .extend(depends.iter().map(|str| str.to_string()));
        self
    }

    /// Resets dependencies.
    pub fn no_depends(mut self) -> Self {
        self.control.depends = Vec::new();
        self
    }

    /// Adds a single pre-dependency from &str.
    pub fn with_pre_depend(mut self, depend: &str) -> Self {
        self.control.pre_depends.push(depend.to_string());
        self
    }

    /// Adds a number of pre-dependencies from Vec<&str>.
    pub fn with_pre_depends(mut self, depends: Vec<&str>) -> Self {
        self.control
            .pre_depends
            .extend(depends.iter().map(|str| str.to_string()));
        self
    }

    /// Resets pre-dependencies.
    pub fn no_pre_depends(mut self) -> Self {
        self.control.pre_depends = Vec::new();
        self
    }

    /// Adds a single conflict from &str.
    ///
    /// Conflicts extend the minimal control layout, which stops at Package,
    /// Version, Architecture, Depends, Pre-Depends, Installed-Size, Section,
    /// Priority, Maintainer, Homepage and Description. When set, the field is
    /// written right after Pre-Depends.
    pub fn with_conflict(mut self, conflict: &str) -> Self {
        self.control.conflicts.push(conflict.to_string());
        self
    }

    /// Resets conflicts.
    pub fn no_conflicts(mut self) -> Self {
        self.control.conflicts = Vec::new();
        self
    }

    /// Sets the package's section.
    pub fn set_section(mut self, section: &str) -> Self {
        self.control.section = section.to_string();
        self
    }

    /// Sets the package's priority.
    pub fn set_priority(mut self, priority: DebPriority) -> Self {
        self.control.priority = Some(priority);
        self
    }

    /// Sets the package's maintainer.
    pub fn set_maintainer(mut self, maintainer: &str) -> Self {
        self.control.maintainer = maintainer.to_string();
        self
    }

    /// Sets the package's description.
    ///
    /// The first line is the synopsis; following lines form the extended
    /// description.
    pub fn set_description(mut self, description: &str) -> Self {
        self.control.description = description.to_string();
        self
    }

    /// Sets the package's homepage.
    pub fn set_homepage(mut self, homepage: &str) -> Self {
        self.control.homepage = homepage.to_string();
        self
    }

    /// Adds a file or directory to the package.
    pub fn with_file(mut self, file: ManifestEntry) -> Self {
        self.data.push(file);
        self
    }

    /// Recursively adds directory `from` to package as `to`.
    ///
    /// This adds all files in `from` and its sub-directories below `to`. For
    /// example, if you had a directory `test` containing the files `foo` and
    /// `bar`, then you can add those files as `/usr/bin/foo` and `/usr/bin/bar`
    /// with `with_dir("test", "/usr/bin")?;`
    ///
    /// On Unix the files keep their permission bits; elsewhere they get `0o644`.
    ///
    /// # Errors
    ///
    /// This function may return an error if `from` doesn't exist.
    pub fn with_dir<P: AsRef<Path>>(mut self, from: P, to: &str) -> Result<Self> {
        let from = from.as_ref();
        let to = to.trim_end_matches('/');
        for file_result in walkdir::WalkDir::new(from).sort_by_file_name() {
            let file = file_result.map_err(std::io::Error::from)?;
            if !file.file_type().is_file() {
                continue;
            }
            // Cutting the `from` directory out of the path
            let relative = file.path().strip_prefix(from).unwrap_or(file.path());
            let relative = relative
                .components()
                .map(|component| component.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            let entry = ManifestEntry::from_path(file.path(), format!("{to}/{relative}"))
                .set_mode(source_mode(&file.metadata().map_err(std::io::Error::from)?));
            self = self.with_file(entry);
        }
        Ok(self)
    }

    /// Removes all file's from the package.
    pub fn clear_files(mut self) -> Self {
        self.data = Vec::new();
        self
    }

    /// Adds an extra file to the control archive, after the maintainer scripts.
    pub fn with_control_file(mut self, file: ManifestEntry) -> Self {
        self.control_files.push(file);
        self
    }

    /// Sets a maintainer script. The entry is installed executable under the
    /// script's name, whatever its path and mode were.
    pub fn with_script(mut self, script: MaintainerScript, entry: ManifestEntry) -> Self {
        let entry = entry.set_path(script.as_str()).is_exec();
        self.scripts.insert(script, entry);
        self
    }

    /// Removes a maintainer script.
    pub fn no_script(mut self, script: MaintainerScript) -> Self {
        self.scripts.remove(&script);
        self
    }

    /// Sets preinst script from &str.
    pub fn preinst_from_str(self, script: &str) -> Self {
        self.with_script(
            MaintainerScript::Preinst,
            ManifestEntry::from_buf(script.as_bytes().to_vec(), ""),
        )
    }

    /// Sets postinst script from &str.
    pub fn postinst_from_str(self, script: &str) -> Self {
        self.with_script(
            MaintainerScript::Postinst,
            ManifestEntry::from_buf(script.as_bytes().to_vec(), ""),
        )
    }

    /// Sets prerm script from &str.
    pub fn prerm_from_str(self, script: &str) -> Self {
        self.with_script(
            MaintainerScript::Prerm,
            ManifestEntry::from_buf(script.as_bytes().to_vec(), ""),
        )
    }

    /// Sets postrm script from &str.
    pub fn postrm_from_str(self, script: &str) -> Self {
        self.with_script(
            MaintainerScript::Postrm,
            ManifestEntry::from_buf(script.as_bytes().to_vec(), ""),
        )
    }

    /// Sets the package's compression standard.
    pub fn set_compression(mut self, compression: DebCompression) -> Self {
        self.compression = compression;
        self
    }

    /// Sets the modified time used for every archive member.
    ///
    /// If not set, generated members use the current time and files read from
    /// disk keep their own modification time.
    pub fn set_mtime(mut self, mtime: Option<DateTime<Utc>>) -> Self {
        self.mtime = mtime;
        self
    }

    /// Sets the layout of the tar headers.
    pub fn set_header_format(mut self, format: HeaderFormat) -> Self {
        self.header_format = format;
        self
    }

    /// Sets the mode of parent directories added automatically.
    pub fn set_default_dir_mode(mut self, mode: u32) -> Self {
        self.default_dir_mode = mode;
        self
    }

    /// Returns the package's name.
    pub fn name(&self) -> &str {
        &self.control.name
    }

    /// Returns the package's version, as configured.
    pub fn version(&self) -> &str {
        &self.control.version
    }

    /// Returns the version written to the control file.
    pub fn converted_version(&self) -> Result<String> {
        if self.convert_from_semver {
            convert_from_semver(&self.control.version)
        } else {
            Ok(self.control.version.clone())
        }
    }

    /// Returns the package's architecture.
    pub fn architecture(&self) -> &DebArchitecture {
        &self.control.architecture
    }

    /// Returns the package's depends.
    pub fn depends(&self) -> &Vec<String> {
        &self.control.depends
    }

    /// Returns the package's pre-depends.
    pub fn pre_depends(&self) -> &Vec<String> {
        &self.control.pre_depends
    }

    /// Returns the package's conflicts.
    pub fn conflicts(&self) -> &Vec<String> {
        &self.control.conflicts
    }

    /// Returns the package's section.
    pub fn section(&self) -> &str {
        &self.control.section
    }

    /// Returns the package's priority.
    pub fn priority(&self) -> Option<&DebPriority> {
        self.control.priority.as_ref()
    }

    /// Returns the package's maintainer.
    pub fn maintainer(&self) -> &str {
        &self.control.maintainer
    }

    /// Returns the package's description.
    pub fn description(&self) -> &str {
        &self.control.description
    }

    /// Returns the package's homepage.
    pub fn homepage(&self) -> &str {
        &self.control.homepage
    }

    /// Returns the package's files and directories, in manifest order.
    pub fn files(&self) -> &Vec<ManifestEntry> {
        &self.data
    }

    /// Returns the extra control archive files.
    pub fn control_files(&self) -> &Vec<ManifestEntry> {
        &self.control_files
    }

    /// Returns a maintainer script.
    pub fn script(&self, script: MaintainerScript) -> Option<&ManifestEntry> {
        self.scripts.get(&script)
    }

    /// Returns the configured maintainer scripts in control archive order.
    pub fn scripts(&self) -> impl Iterator<Item = &ManifestEntry> {
        self.scripts.values()
    }

    /// Returns the package's compression standard.
    pub fn compression(&self) -> &DebCompression {
        &self.compression
    }

    /// Returns the fixed modified time, if any.
    pub fn mtime(&self) -> Option<DateTime<Utc>> {
        self.mtime
    }

    pub fn header_format(&self) -> HeaderFormat {
        self.header_format
    }

    pub fn default_dir_mode(&self) -> u32 {
        self.default_dir_mode
    }

    pub(crate) fn control(&self) -> &DebControl {
        &self.control
    }

    /// Returns the conventional file name, `name_version_architecture.deb`.
    pub fn default_file_name(&self) -> Result<String> {
        Ok(format!(
            "{}_{}_{}.deb",
            self.control.name,
            self.converted_version()?,
            self.control.architecture
        ))
    }

    /// Writes the package to `output` and returns it.
    ///
    /// # Errors
    ///
    /// Fails if required control fields are missing, a source file can't be
    /// read, or writing to `output` fails. On error the output holds a partial
    /// package and must be discarded.
    pub fn write<W: Write>(&self, output: W) -> Result<W> {
        self.control.validate()?;
        PackageAssembler::new(self, output).assemble()
    }

    /// Builds the package into memory.
    pub fn build(&self) -> Result<Vec<u8>> {
        self.write(Vec::new())
    }
}

#[cfg(unix)]
fn source_mode(metadata: &std::fs::Metadata) -> u32 {
    use std::os::unix::fs::MetadataExt;
    metadata.mode() & 0o7777
}

// File modes are a Unix feature
#[cfg(not(unix))]
fn source_mode(_metadata: &std::fs::Metadata) -> u32 {
    0o644
}
