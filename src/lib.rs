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

//! A pure Rust library for assembling binary Deb packages.
//!
//! A package is described by a [`binary::DebPackage`]: control metadata, a
//! manifest of files and directories, and optional maintainer scripts. Writing
//! it produces the `.deb` container: an `ar` archive holding `debian-binary`,
//! `control.tar.gz` and `data.tar.gz`. The `ar` and `tar` encoders are exposed
//! for callers that need them directly.
//!
//! The library logs through the `log` facade and never installs a logger.

mod assembler;
pub mod ar_encoder;
pub mod binary;
mod compression;
mod error;
mod shared;
pub mod tar_encoder;
#[cfg(test)]
mod test;

pub use assembler::{strip_carriage_returns, DEBIAN_BINARY};
pub use compression::DebCompression;
pub use error::{BuildStage, DebError, Result};
pub use shared::*;
