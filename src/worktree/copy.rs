// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Full directory copy for projects that are not under version control.

use std::io;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

/// Directory names never copied into a workspace.
const SKIPPED: &[&str] = &[".git"];

/// Recursively copy `src` into `dest`, skipping VCS metadata. Blocking.
///
/// Anything under `dest` or one of `excluded` is left out, so a storage root that lives inside
/// the project is never copied into itself. Returns the number of files copied.
pub fn copy_project(src: &Path, dest: &Path, excluded: &[PathBuf]) -> io::Result<u64> {
    std::fs::create_dir_all(dest)?;
    let mut files = 0;

    let walker = WalkDir::new(src)
        .min_depth(1)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| {
            let path = entry.path();
            let skipped = SKIPPED
                .iter()
                .any(|skip| entry.file_name() == std::ffi::OsStr::new(skip));
            !skipped && !path.starts_with(dest) && !excluded.iter().any(|e| path.starts_with(e))
        });

    for entry in walker {
        let entry = entry.map_err(io::Error::other)?;
        let relative = entry
            .path()
            .strip_prefix(src)
            .map_err(io::Error::other)?;
        let target = dest.join(relative);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            std::fs::create_dir_all(&target)?;
        } else if file_type.is_symlink() {
            copy_symlink(entry.path(), &target)?;
        } else {
            std::fs::copy(entry.path(), &target)?;
            files += 1;
        }
    }

    Ok(files)
}

#[cfg(unix)]
fn copy_symlink(src: &Path, dest: &Path) -> io::Result<()> {
    let link = std::fs::read_link(src)?;
    std::os::unix::fs::symlink(link, dest)
}

#[cfg(not(unix))]
fn copy_symlink(src: &Path, dest: &Path) -> io::Result<()> {
    std::fs::copy(src, dest).map(|_| ())
}
