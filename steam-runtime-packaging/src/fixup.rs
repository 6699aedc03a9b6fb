// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Post-installation adjustments to a runtime tree.

Packages are unpacked as if into `/`, so their absolute symlinks point into
the host. [fix_symlinks()] rewrites them relative to the architecture's
root so the tree can be relocated.
*/

use {
    crate::{
        error::Result,
        io::check_path_traversal,
        tools::elf_build_id,
    },
    log::debug,
    std::{
        ffi::OsString,
        os::unix::fs::{symlink, PermissionsExt},
        path::{Component, Path, PathBuf},
    },
    walkdir::WalkDir,
};

/// Lexically normalize a path into its components.
fn normalized_components(path: &Path) -> Vec<OsString> {
    let mut res: Vec<OsString> = vec![];

    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                res.pop();
            }
            c => res.push(c.as_os_str().to_os_string()),
        }
    }

    res
}

/// Compute a path to `target` relative to the directory `base`.
///
/// Both are interpreted lexically; symlinks are not resolved.
pub fn relative_path(target: &Path, base: &Path) -> PathBuf {
    let target = normalized_components(target);
    let base = normalized_components(base);

    let common = target
        .iter()
        .zip(base.iter())
        .take_while(|(a, b)| a == b)
        .count();

    let res = std::iter::repeat(OsString::from(".."))
        .take(base.len() - common)
        .chain(target[common..].iter().cloned())
        .collect::<PathBuf>();

    if res.as_os_str().is_empty() {
        PathBuf::from(".")
    } else {
        res
    }
}

/// Rewrite absolute symlinks under `root` to relative ones.
///
/// Absolute targets are resolved against `root`, as if it were `/`. Returns
/// the number of links rewritten.
pub fn fix_symlinks(root: &Path) -> Result<usize> {
    let mut count = 0;

    for entry in WalkDir::new(root).follow_links(false) {
        let entry = entry?;
        if !entry.path_is_symlink() {
            continue;
        }

        let target = std::fs::read_link(entry.path())?;
        if !target.is_absolute() {
            continue;
        }

        let resolved = root.join(target.strip_prefix("/").unwrap_or(&target));
        let parent = entry.path().parent().unwrap_or(root);
        let relative = relative_path(&resolved, parent);

        debug!(
            "Rewriting symlink {} from {} to {}",
            entry.path().display(),
            target.display(),
            relative.display()
        );

        std::fs::remove_file(entry.path())?;
        symlink(&relative, entry.path())?;
        count += 1;
    }

    Ok(count)
}

/// Create `usr/lib/debug/.build-id/XX/YYYY.debug` pointing at a debug file.
pub fn link_build_id(root: &Path, debug_file: &Path, build_id: &str) -> Result<PathBuf> {
    let (prefix, rest) = build_id.split_at(2.min(build_id.len()));
    check_path_traversal(prefix)?;
    check_path_traversal(rest)?;

    let link_dir = root.join("usr/lib/debug/.build-id").join(prefix);
    std::fs::create_dir_all(&link_dir)?;

    let link = link_dir.join(format!("{}.debug", rest));
    let target = relative_path(debug_file, &link_dir);
    debug!("Symlinking symbol file {} to {}", link.display(), target.display());

    if std::fs::symlink_metadata(&link).is_ok() {
        std::fs::remove_file(&link)?;
    }
    symlink(&target, &link)?;

    Ok(link)
}

/// Create the build ID symlink tree for every debug file under `root`.
///
/// Returns the number of links created.
pub fn fix_debug_links(root: &Path) -> Result<usize> {
    let debug_dir = root.join("usr/lib/debug");
    if !debug_dir.is_dir() {
        return Ok(0);
    }

    let mut count = 0;

    let walker = WalkDir::new(&debug_dir)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.depth() != 1 || e.file_name() != ".build-id");

    for entry in walker {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }

        if let Some(build_id) = elf_build_id(entry.path())? {
            link_build_id(root, entry.path(), &build_id)?;
            count += 1;
        }
    }

    Ok(count)
}

/// Apply `u=rwX,go=rX` to everything under `root`, like `chmod -R`.
///
/// Symlinks are left alone. Returns the number of entries changed.
pub fn normalize_permissions(root: &Path) -> Result<usize> {
    let mut count = 0;

    for entry in WalkDir::new(root).follow_links(false) {
        let entry = entry?;
        if entry.path_is_symlink() {
            continue;
        }

        let metadata = entry.metadata()?;
        let mode = metadata.permissions().mode() & 0o7777;
        let executable = metadata.is_dir() || mode & 0o111 != 0;
        let wanted = if executable { 0o755 } else { 0o644 };

        if mode != wanted {
            debug!("mode of '{}' changed from {:04o} to {:04o}", entry.path().display(), mode, wanted);
            std::fs::set_permissions(entry.path(), std::fs::Permissions::from_mode(wanted))?;
            count += 1;
        }
    }

    Ok(count)
}
