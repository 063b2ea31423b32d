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

//! Error handling.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// The part of a package build that was in progress when an error occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildStage {
    /// Writing the `debian-binary` member.
    Version,
    /// Writing the control archive.
    Control,
    /// Writing the data archive.
    Data,
}

impl fmt::Display for BuildStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BuildStage::Version => "version",
            BuildStage::Control => "control",
            BuildStage::Data => "data",
        })
    }
}

/// Primary crate error type.
#[derive(Debug, Error)]
pub enum DebError {
    /// A name or configuration value violates a format constraint.
    #[error("format error: {0}")]
    Format(String),

    /// A value does not fit the fixed-width header field it is written to.
    #[error("{field} value {value} is out of range (maximum {max})")]
    Range {
        field: &'static str,
        value: u64,
        max: u64,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unable to read source file {}: {source}", path.display())]
    SourceRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// An encoder was used in a state that does not allow the operation.
    #[error("invalid state: {0}")]
    InvalidState(&'static str),

    #[error("regular expression error: {0}")]
    Regex(#[from] regex::Error),

    #[error("{stage} stage failed at {entry}: {source}")]
    Build {
        stage: BuildStage,
        entry: String,
        #[source]
        source: Box<DebError>,
    },
}

impl DebError {
    /// Attaches the build stage and entry name to an error.
    ///
    /// Errors that already carry build context are returned unchanged.
    pub(crate) fn during(self, stage: BuildStage, entry: &str) -> Self {
        match self {
            DebError::Build { .. } => self,
            other => DebError::Build {
                stage,
                entry: entry.to_string(),
                source: Box::new(other),
            },
        }
    }

    /// Returns the innermost error, looking through build context.
    pub fn root(&self) -> &DebError {
        match self {
            DebError::Build { source, .. } => source.root(),
            other => other,
        }
    }
}

/// Result type for this crate.
pub type Result<T, E = DebError> = std::result::Result<T, E>;
