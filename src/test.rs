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

use std::fs;
use std::io::Read;

use chrono::{TimeZone, Utc};

use crate::binary::*;
use crate::*;

struct TarItem {
    path: String,
    directory: bool,
    mode: u32,
    owner: (u64, u64),
    mtime: u64,
    content: Vec<u8>,
}

// Splits a .deb into its ar members
fn ar_members(deb: &[u8]) -> Result<Vec<(String, Vec<u8>)>> {
    let mut archive = ar::Archive::new(deb);
    let mut output = Vec::new();
    while let Some(entry) = archive.next_entry() {
        let mut entry = entry?;
        let name = String::from_utf8_lossy(entry.header().identifier()).to_string();
        let mut content = Vec::new();
        entry.read_to_end(&mut content)?;
        output.push((name, content));
    }
    Ok(output)
}

fn gunzip(compressed: &[u8]) -> Result<Vec<u8>> {
    let mut output = Vec::new();
    flate2::read::GzDecoder::new(compressed).read_to_end(&mut output)?;
    Ok(output)
}

fn tar_items(tar_bytes: &[u8]) -> Result<Vec<TarItem>> {
    let mut archive = tar::Archive::new(tar_bytes);
    let mut output = Vec::new();
    for entry in archive.entries()? {
        let mut entry = entry?;
        let header = entry.header().clone();
        let mut content = Vec::new();
        entry.read_to_end(&mut content)?;
        output.push(TarItem {
            path: entry.path()?.to_string_lossy().into_owned(),
            directory: header.entry_type().is_dir(),
            mode: header.mode()?,
            owner: (header.uid()?, header.gid()?),
            mtime: header.mtime()?,
            content,
        });
    }
    Ok(output)
}

// Control and data tar items of a gzip compressed package
fn inner_archives(deb: &[u8]) -> Result<(Vec<TarItem>, Vec<TarItem>)> {
    let members = ar_members(deb)?;
    Ok((
        tar_items(&gunzip(&members[1].1)?)?,
        tar_items(&gunzip(&members[2].1)?)?,
    ))
}

fn item<'a>(items: &'a [TarItem], path: &str) -> &'a TarItem {
    items
        .iter()
        .find(|item| item.path == path)
        .unwrap_or_else(|| panic!("{path} missing from archive"))
}

fn app_package() -> DebPackage {
    DebPackage::new("app")
        .set_version("1.0")
        .set_architecture(DebArchitecture::Amd64)
        .set_maintainer("x")
        .set_description("y")
        .set_mtime(Some(Utc.with_ymd_and_hms(2023, 5, 1, 12, 0, 0).unwrap()))
}

#[test]
fn build_config_file_package() -> Result<()> {
    let deb = app_package()
        .with_file(
            ManifestEntry::from_buf(b"key=value\n".to_vec(), "/etc/app/app.conf").is_conf(),
        )
        .build()?;

    let members = ar_members(&deb)?;
    let names: Vec<&str> = members.iter().map(|(name, _)| name.as_str()).collect();
    assert_eq!(names, vec!["debian-binary", "control.tar.gz", "data.tar.gz"]);
    assert_eq!(members[0].1, b"2.0\n");

    let (control, data) = inner_archives(&deb)?;
    let control_names: Vec<&str> = control.iter().map(|item| item.path.as_str()).collect();
    assert_eq!(control_names, vec!["control", "md5sums", "conffiles"]);
    assert_eq!(item(&control, "conffiles").content, b"/etc/app/app.conf\n");
    assert_eq!(
        String::from_utf8_lossy(&item(&control, "control").content),
        "Package: app\nVersion: 1.0\nArchitecture: amd64\nInstalled-Size: 1\n\
         Maintainer: x\nDescription: y\n"
    );
    assert_eq!(
        String::from_utf8_lossy(&item(&control, "md5sums").content),
        format!("{:x}  etc/app/app.conf\n", md5::compute(b"key=value\n"))
    );

    let data_names: Vec<&str> = data.iter().map(|item| item.path.as_str()).collect();
    assert_eq!(data_names, vec!["etc/", "etc/app/", "etc/app/app.conf"]);
    let conf = item(&data, "etc/app/app.conf");
    assert_eq!(conf.content, b"key=value\n");
    assert_eq!(conf.mode, 0o644);
    assert_eq!(conf.mtime, 1_682_942_400);
    Ok(())
}

#[test]
fn ar_members_start_on_even_offsets() -> Result<()> {
    let deb = app_package()
        .with_file(ManifestEntry::from_buf(vec![7; 333], "opt/app/blob"))
        .build()?;

    let mut offset = 8;
    assert_eq!(&deb[..offset], b"!<arch>\n");
    while offset < deb.len() {
        assert_eq!(offset % 2, 0);
        let size: usize = String::from_utf8_lossy(&deb[offset + 48..offset + 58])
            .trim()
            .parse()
            .unwrap();
        assert_eq!(&deb[offset + 58..offset + 60], b"`\n");
        offset += 60 + size;
        offset += offset % 2;
    }
    assert_eq!(offset, deb.len());
    Ok(())
}

#[test]
fn parent_directories_are_synthesized_once() -> Result<()> {
    let deb = app_package()
        .with_file(ManifestEntry::from_buf(b"c".to_vec(), "a/b/c.txt"))
        .with_file(ManifestEntry::from_buf(b"d".to_vec(), "a/b/d.txt"))
        .with_file(ManifestEntry::from_buf(b"e".to_vec(), "a/e.txt"))
        .build()?;

    let (_, data) = inner_archives(&deb)?;
    let names: Vec<&str> = data.iter().map(|item| item.path.as_str()).collect();
    assert_eq!(names, vec!["a/", "a/b/", "a/b/c.txt", "a/b/d.txt", "a/e.txt"]);
    assert!(item(&data, "a/").directory);
    assert_eq!(item(&data, "a/b/").mode, 0o755);
    Ok(())
}

#[test]
fn default_directory_mode_is_configurable() -> Result<()> {
    let deb = app_package()
        .set_default_dir_mode(0o750)
        .with_file(ManifestEntry::from_buf(b"c".to_vec(), "srv/data/c"))
        .build()?;

    let (_, data) = inner_archives(&deb)?;
    assert_eq!(item(&data, "srv/").mode, 0o750);
    assert_eq!(item(&data, "srv/data/").mode, 0o750);
    Ok(())
}

#[test]
fn directories_precede_files() -> Result<()> {
    let deb = app_package()
        .with_file(ManifestEntry::from_buf(b"1".to_vec(), "usr/bin/one"))
        .with_file(ManifestEntry::directory("var/lib/app").set_mode(0o700))
        .with_file(ManifestEntry::from_buf(b"2".to_vec(), "usr/share/two"))
        .with_file(ManifestEntry::directory("var/log/app"))
        .build()?;

    let (_, data) = inner_archives(&deb)?;
    let position = |path: &str| data.iter().position(|item| item.path == path).unwrap();

    for dir in ["var/lib/app/", "var/log/app/"] {
        for file in ["usr/bin/one", "usr/share/two"] {
            assert!(position(dir) < position(file));
        }
    }
    // Each group keeps manifest order
    assert!(position("var/lib/app/") < position("var/log/app/"));
    assert!(position("usr/bin/one") < position("usr/share/two"));
    assert_eq!(item(&data, "var/lib/app/").mode, 0o700);

    let var_count = data.iter().filter(|item| item.path == "var/").count();
    assert_eq!(var_count, 1);
    Ok(())
}

#[test]
fn duplicate_directories_are_written_once() -> Result<()> {
    let deb = app_package()
        .with_file(ManifestEntry::directory("opt/app/lib"))
        .with_file(ManifestEntry::directory("opt/app"))
        .build()?;

    let (_, data) = inner_archives(&deb)?;
    let names: Vec<&str> = data.iter().map(|item| item.path.as_str()).collect();
    assert_eq!(names, vec!["opt/", "opt/app/", "opt/app/lib/"]);
    Ok(())
}

#[test]
fn listed_parent_keeps_its_attributes() -> Result<()> {
    let deb = app_package()
        .with_file(ManifestEntry::directory("opt/app/lib"))
        .with_file(ManifestEntry::directory("opt/app").set_mode(0o700).set_owner(5, 6))
        .with_file(ManifestEntry::from_buf(b"x".to_vec(), "opt/app/bin/x"))
        .build()?;

    let (_, data) = inner_archives(&deb)?;
    let names: Vec<&str> = data.iter().map(|item| item.path.as_str()).collect();
    assert_eq!(
        names,
        vec!["opt/", "opt/app/", "opt/app/lib/", "opt/app/bin/", "opt/app/bin/x"]
    );
    let app = item(&data, "opt/app/");
    assert_eq!(app.mode, 0o700);
    assert_eq!(app.owner, (5, 6));
    // Unlisted ancestors still get the default
    assert_eq!(item(&data, "opt/").mode, 0o755);
    assert_eq!(item(&data, "opt/").owner, (0, 0));
    assert_eq!(item(&data, "opt/app/bin/").mode, 0o755);
    Ok(())
}

#[test]
fn repeated_separators_do_not_duplicate_directories() -> Result<()> {
    let deb = app_package()
        .with_file(ManifestEntry::from_buf(b"x".to_vec(), "a//b"))
        .with_file(ManifestEntry::from_buf(b"y".to_vec(), "/a///c//d"))
        .build()?;

    let (control, data) = inner_archives(&deb)?;
    let names: Vec<&str> = data.iter().map(|item| item.path.as_str()).collect();
    assert_eq!(names, vec!["a/", "a/b", "a/c/", "a/c/d"]);

    let md5sums = String::from_utf8_lossy(&item(&control, "md5sums").content).into_owned();
    assert!(md5sums.contains("  a/b\n"));
    assert!(md5sums.contains("  a/c/d\n"));
    Ok(())
}

#[test]
fn empty_destination_is_rejected() {
    let result = app_package()
        .with_file(ManifestEntry::from_buf(b"x".to_vec(), "//"))
        .build();

    match result {
        Err(error @ DebError::Build { stage: BuildStage::Data, .. }) => {
            assert!(matches!(error.root(), DebError::Format(_)));
        }
        other => panic!("unexpected result {other:?}"),
    }
}

#[test]
fn invalid_package_name_is_rejected() {
    let result = app_package().set_name("Bad Name_X").build();
    match result {
        Err(DebError::Format(message)) => assert!(message.contains("Bad Name_X")),
        other => panic!("unexpected result {other:?}"),
    }
}

// The md5sums line and Installed-Size follow the raw bytes, not the archived
// text. This mismatch is kept for compatibility with existing packages.
#[test]
fn text_files_lose_carriage_returns() -> Result<()> {
    let raw = vec![0x48, 0x0d, 0x0a, 0x49];
    let deb = app_package()
        .with_file(ManifestEntry::from_buf(raw.clone(), "usr/share/doc/app/README").is_text())
        .build()?;

    let (control, data) = inner_archives(&deb)?;
    let readme = item(&data, "usr/share/doc/app/README");
    assert_eq!(readme.content, vec![0x48, 0x0a, 0x49]);

    let md5sums = String::from_utf8_lossy(&item(&control, "md5sums").content).into_owned();
    assert_eq!(
        md5sums,
        format!("{:x}  usr/share/doc/app/README\n", md5::compute(&raw))
    );
    assert_ne!(
        format!("{:x}", md5::compute(&raw)),
        format!("{:x}", md5::compute(&readme.content))
    );
    Ok(())
}

#[test]
fn declared_size_of_text_file_is_transformed_length() -> Result<()> {
    let deb = app_package()
        .with_file(ManifestEntry::from_buf(b"H\r\nI".to_vec(), "t").is_text())
        .build()?;

    let members = ar_members(&deb)?;
    let data = gunzip(&members[2].1)?;
    let mut archive = tar::Archive::new(data.as_slice());
    let entry = archive.entries()?.next().unwrap()?;
    assert_eq!(entry.header().size()?, 3);
    Ok(())
}

#[test]
fn installed_size_rounds_up_to_kib() -> Result<()> {
    let deb = app_package()
        .with_file(ManifestEntry::from_buf(vec![0; 500], "usr/lib/app/a"))
        .with_file(ManifestEntry::from_buf(vec![0; 1600], "usr/lib/app/b"))
        .with_file(ManifestEntry::directory("usr/lib/app/empty"))
        .build()?;

    let (control, _) = inner_archives(&deb)?;
    let text = String::from_utf8_lossy(&item(&control, "control").content).into_owned();
    assert!(text.contains("\nInstalled-Size: 3\n"));

    let md5sums = String::from_utf8_lossy(&item(&control, "md5sums").content).into_owned();
    assert_eq!(md5sums.lines().count(), 2);
    Ok(())
}

#[test]
fn maintainer_scripts_follow_generated_files() -> Result<()> {
    let deb = app_package()
        .postinst_from_str("#!/bin/sh\r\nsystemctl daemon-reload\r\n")
        .preinst_from_str("#!/bin/sh\n")
        .with_script(
            MaintainerScript::Postrm,
            ManifestEntry::from_buf(b"#!/bin/sh\r\n".to_vec(), "").is_text(),
        )
        .with_control_file(ManifestEntry::from_buf(
            b"activate-noawait ldconfig\n".to_vec(),
            "triggers",
        ))
        .build()?;

    let (control, _) = inner_archives(&deb)?;
    let names: Vec<&str> = control.iter().map(|item| item.path.as_str()).collect();
    assert_eq!(
        names,
        vec![
            "control",
            "md5sums",
            "conffiles",
            "preinst",
            "postinst",
            "postrm",
            "triggers"
        ]
    );
    for script in ["preinst", "postinst", "postrm"] {
        assert_eq!(item(&control, script).mode, 0o755);
    }
    // Only scripts marked as text are converted
    assert_eq!(item(&control, "postrm").content, b"#!/bin/sh\n");
    assert_eq!(
        item(&control, "postinst").content,
        b"#!/bin/sh\r\nsystemctl daemon-reload\r\n"
    );
    assert_eq!(item(&control, "triggers").mode, 0o644);
    Ok(())
}

#[test]
fn files_from_disk() -> Result<()> {
    let source = tempfile::tempdir()?;
    fs::create_dir_all(source.path().join("bin"))?;
    fs::write(source.path().join("bin/tool"), b"#!/bin/sh\necho tool\n")?;
    fs::write(source.path().join("README"), b"read me\n")?;

    let deb = app_package()
        .with_dir(source.path(), "/opt/tool/")?
        .with_file(ManifestEntry::from_path(
            source.path().join("README"),
            "usr/share/doc/tool/README",
        ))
        .build()?;

    let (control, data) = inner_archives(&deb)?;
    assert_eq!(item(&data, "opt/tool/bin/tool").content, b"#!/bin/sh\necho tool\n");
    assert_eq!(item(&data, "opt/tool/README").content, b"read me\n");
    assert_eq!(item(&data, "usr/share/doc/tool/README").content, b"read me\n");
    assert!(item(&data, "opt/tool/bin/").directory);

    let md5sums = String::from_utf8_lossy(&item(&control, "md5sums").content).into_owned();
    let tool_sum = md5::compute(b"#!/bin/sh\necho tool\n");
    assert!(md5sums.contains(&format!("{tool_sum:x}  opt/tool/bin/tool\n")));
    Ok(())
}

#[test]
fn missing_source_fails_with_context() {
    let result = app_package()
        .with_file(ManifestEntry::from_path("/nonexistent/mkdeb/app", "usr/bin/app"))
        .build();

    match result {
        Err(DebError::Build { stage, entry, source }) => {
            assert_eq!(stage, BuildStage::Control);
            assert_eq!(entry, "usr/bin/app");
            assert!(matches!(*source, DebError::SourceRead { .. }));
        }
        other => panic!("unexpected result {other:?}"),
    }
}

#[test]
fn invalid_control_fails_before_writing() {
    let mut output = Vec::new();
    let result = DebPackage::new("app")
        .set_version("1.0")
        .set_description("y")
        .write(&mut output);
    assert!(matches!(result, Err(DebError::Format(_))));
    assert!(output.is_empty());
}

#[test]
fn long_paths_survive() -> Result<()> {
    let path = format!("usr/share/app/{}/file.txt", "deep".repeat(40));
    let deb = app_package()
        .with_file(ManifestEntry::from_buf(b"deep".to_vec(), &path))
        .build()?;

    let (control, data) = inner_archives(&deb)?;
    assert_eq!(item(&data, &path).content, b"deep");
    let md5sums = String::from_utf8_lossy(&item(&control, "md5sums").content).into_owned();
    assert!(md5sums.ends_with(&format!("  {path}\n")));
    Ok(())
}

#[test]
fn repeated_builds_are_identical() -> Result<()> {
    let package = app_package()
        .with_file(ManifestEntry::from_buf(b"a".to_vec(), "x/y/a"))
        .with_file(ManifestEntry::directory("x/z"));
    assert_eq!(package.build()?, package.build()?);
    Ok(())
}

#[test]
fn alternative_compression() -> Result<()> {
    let package = app_package().with_file(ManifestEntry::from_buf(b"z".to_vec(), "z"));

    let deb = package.clone().set_compression(DebCompression::Zstd).build()?;
    let members = ar_members(&deb)?;
    assert_eq!(members[1].0, "control.tar.zst");
    assert_eq!(members[2].0, "data.tar.zst");
    let mut data = Vec::new();
    zstd::stream::copy_decode(members[2].1.as_slice(), &mut data)?;
    assert_eq!(item(&tar_items(&data)?, "z").content, b"z");

    let deb = package.set_compression(DebCompression::Xz).build()?;
    let members = ar_members(&deb)?;
    assert_eq!(members[1].0, "control.tar.xz");
    assert_eq!(members[2].0, "data.tar.xz");
    let mut data = Vec::new();
    xz::read::XzDecoder::new(members[2].1.as_slice()).read_to_end(&mut data)?;
    assert_eq!(item(&tar_items(&data)?, "z").content, b"z");
    Ok(())
}

#[test]
fn write_to_file() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let package = app_package()
        .with_file(ManifestEntry::from_buf(b"#!/bin/sh\n".to_vec(), "/usr/bin/hello").is_exec());
    let path = dir.path().join(package.default_file_name()?);
    package.write(fs::File::create(&path)?)?;

    assert_eq!(path.file_name().unwrap(), "app_1.0_amd64.deb");
    let bytes = fs::read(&path)?;
    assert_eq!(bytes, package.build()?);
    let (_, data) = inner_archives(&bytes)?;
    assert_eq!(item(&data, "usr/bin/hello").mode, 0o755);
    Ok(())
}
