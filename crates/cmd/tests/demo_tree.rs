// SPDX-FileCopyrightText: 2025 The proctree Authors
//
// SPDX-License-Identifier: Apache-2.0

use std::path::Path;

use anyhow::Result;
use cmd::commands::{config_command, tree_command};
use cmd::demo;
use proctree::{Caller, Error, Filesystem, FsOptions, IdleTransport, OpenMode, Session};

fn write(fs: &Filesystem, path: &str, text: &str) -> proctree::Result<()> {
    let caller = Caller::current();
    let tid = fs.open(path, OpenMode::WriteOnly, &caller)?;
    let written = fs.write(path, text.as_bytes(), 0, tid, &caller);
    let released = fs.release(path, tid, &caller);
    written?;
    released
}

fn read(fs: &Filesystem, path: &str) -> proctree::Result<String> {
    let caller = Caller::current();
    let tid = fs.open(path, OpenMode::ReadOnly, &caller)?;
    let mut buf = [0u8; 256];
    let n = fs.read(path, &mut buf, 0, tid, &caller)?;
    fs.release(path, tid, &caller)?;
    Ok(String::from_utf8_lossy(&buf[..n]).into_owned())
}

#[test]
fn test_tree_command_lists_demo_leaves() -> Result<()> {
    let mut out = Vec::new();
    tree_command(None, &mut out)?;
    let text = String::from_utf8(out)?;

    assert!(text.starts_with("/\n"));
    assert!(text.contains("  port [typed 666 refs=0]\n"));
    assert!(text.contains("  speed [typed 444 refs=0]\n"));
    assert!(text.contains("    file [typed 222 refs=0]\n"));
    assert!(text.contains("      list [leaf 444 refs=0]\n"));
    assert!(text.contains("      add [leaf 222 refs=0]\n"));
    Ok(())
}

#[test]
fn test_config_command_round_trips() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let file = dir.path().join("options.yaml");
    std::fs::write(&file, "fs_name: sensors\nsingle_threaded: true\n")?;

    let mut out = Vec::new();
    config_command(Some(&file), &mut out)?;
    let options = FsOptions::from_yaml_str(std::str::from_utf8(&out)?)?;
    assert_eq!(options.fs_name, "sensors");
    assert!(options.single_threaded);

    assert!(config_command(Some(Path::new("/nonexistent.yaml")), &mut Vec::new()).is_err());
    Ok(())
}

#[test]
fn test_demo_tree_behaviour() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let mut session = Session::create("demo", dir.path(), FsOptions::default(), Some(demo::appdata()))?;
    let fs = session.filesystem();
    demo::register(&fs)?;
    session.run(Box::new(IdleTransport), false)?;

    assert_eq!(read(&fs, "/speed")?, "123.45");
    assert_eq!(read(&fs, "/port")?, "80");
    write(&fs, "/port", "8080\n")?;
    assert_eq!(fs.read_as::<i32>("/port")?, 8080);
    assert!(matches!(write(&fs, "/port", "70000"), Err(Error::Rejected(_))));
    assert_eq!(fs.read_as::<i32>("/port")?, 8080);

    write(&fs, "/net/hosts/add", "alpha\n")?;
    write(&fs, "/net/hosts/add", "beta\n")?;
    write(&fs, "/net/hosts/del", "alpha\n")?;
    assert_eq!(read(&fs, "/net/hosts/list")?, "beta;");

    let caller = Caller::current();
    fs.truncate("/log/file", 0, &caller)?;
    write(&fs, "/log/file", "started")?;
    assert_eq!(fs.read_as::<String>("/log/file")?, "started");
    assert!(matches!(
        fs.open("/log/file", OpenMode::ReadOnly, &caller),
        Err(Error::AccessDenied(_))
    ));

    session.destroy()?;
    assert_eq!(fs.leaf_count(), 0);
    Ok(())
}
