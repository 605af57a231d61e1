use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use tik_domain::PurgatoryEntry;
use walkdir::WalkDir;

pub const PURGATORY_DIR: &str = "__purgatory";

/// Best-effort recursive chmod for paths that may have been write-protected.
#[cfg(unix)]
pub(crate) fn make_writable_recursive(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    let Ok(meta) = fs::symlink_metadata(path) else {
        return;
    };
    if meta.file_type().is_symlink() {
        return;
    }
    let mode = if meta.is_dir() { 0o755 } else { 0o644 };
    let _ = fs::set_permissions(path, fs::Permissions::from_mode(mode));
    if meta.is_dir() {
        if let Ok(entries) = fs::read_dir(path) {
            for entry in entries.flatten() {
                make_writable_recursive(&entry.path());
            }
        }
    }
}

#[cfg(not(unix))]
pub(crate) fn make_writable_recursive(path: &Path) {
    let Ok(meta) = fs::symlink_metadata(path) else {
        return;
    };
    if meta.file_type().is_symlink() {
        return;
    }
    let mut perms = meta.permissions();
    if perms.readonly() {
        perms.set_readonly(false);
        let _ = fs::set_permissions(path, perms);
    }
    if meta.is_dir() {
        if let Ok(entries) = fs::read_dir(path) {
            for entry in entries.flatten() {
                make_writable_recursive(&entry.path());
            }
        }
    }
}

/// Removes a file or folder tree, lifting write protection first.
pub(crate) fn remove_all_writable(path: &Path) -> Result<()> {
    let meta = match fs::symlink_metadata(path) {
        Ok(meta) => meta,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(()),
        Err(err) => return Err(err).with_context(|| format!("failed to stat {}", path.display())),
    };
    if meta.file_type().is_symlink() || meta.is_file() {
        make_writable_recursive(path);
        fs::remove_file(path).with_context(|| format!("failed to remove {}", path.display()))?;
        return Ok(());
    }
    make_writable_recursive(path);
    fs::remove_dir_all(path).with_context(|| format!("failed to remove {}", path.display()))?;
    Ok(())
}

fn remove_write_permissions(path: &Path) -> Result<()> {
    let metadata = fs::symlink_metadata(path)?;
    if metadata.file_type().is_symlink() {
        return Ok(());
    }
    let mut perms = metadata.permissions();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = perms.mode();
        let new_mode = mode & !0o222;
        if mode != new_mode {
            perms.set_mode(new_mode);
            fs::set_permissions(path, perms)?;
        }
    }
    #[cfg(not(unix))]
    {
        if !perms.readonly() {
            perms.set_readonly(true);
            fs::set_permissions(path, perms)?;
        }
    }
    Ok(())
}

/// Write-protects every file below `path`. Folders stay writable so later
/// publishes can add siblings.
pub(crate) fn protect_files_recursive(path: &Path) -> Result<()> {
    for entry in WalkDir::new(path).follow_links(false) {
        let entry = entry.with_context(|| format!("failed to walk {}", path.display()))?;
        if entry.file_type().is_file() {
            remove_write_permissions(entry.path())
                .with_context(|| format!("failed to protect {}", entry.path().display()))?;
        }
    }
    Ok(())
}

/// Soft delete: moves `target` (which must live under `root`) into
/// `root/__purgatory`, keeping its relative location. An existing entry at
/// the destination gets a numbered sibling instead of being overwritten.
///
/// Returns the new location, or `None` when `target` did not exist.
pub(crate) fn move_to_purgatory(root: &Path, target: &Path) -> Result<Option<PathBuf>> {
    if fs::symlink_metadata(target).is_err() {
        return Ok(None);
    }
    let relative = target.strip_prefix(root).with_context(|| {
        format!(
            "{} is outside of {}",
            target.display(),
            root.display()
        )
    })?;
    let mut destination = root.join(PURGATORY_DIR).join(relative);
    if destination.exists() {
        let stem = destination
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let mut counter = 1_u32;
        loop {
            let candidate = destination.with_file_name(format!("{stem}.{counter}"));
            if !candidate.exists() {
                destination = candidate;
                break;
            }
            counter += 1;
        }
    }
    if let Some(parent) = destination.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    fs::rename(target, &destination).with_context(|| {
        format!(
            "failed to move {} to {}",
            target.display(),
            destination.display()
        )
    })?;
    tracing::info!(
        from = %target.display(),
        to = %destination.display(),
        "moved to purgatory"
    );
    Ok(Some(destination))
}

/// Like [`move_to_purgatory`], but returns both locations so the move can
/// be undone with [`restore_from_purgatory`].
pub(crate) fn send_to_purgatory(root: &Path, target: &Path) -> Result<Option<PurgatoryEntry>> {
    let Some(moved) = move_to_purgatory(root, target)? else {
        return Ok(None);
    };
    Ok(Some(PurgatoryEntry {
        original: relative_posix(root, target)?,
        moved: relative_posix(root, &moved)?,
    }))
}

/// Puts a soft-deleted file back. Never overwrites whatever took its place
/// in the meantime.
pub(crate) fn restore_from_purgatory(root: &Path, entry: &PurgatoryEntry) -> Result<()> {
    let original = join_posix(root, &entry.original);
    let moved = join_posix(root, &entry.moved);
    if fs::symlink_metadata(&original).is_ok() {
        bail!(
            "cannot restore {}: {} already exists",
            moved.display(),
            original.display()
        );
    }
    if fs::symlink_metadata(&moved).is_err() {
        tracing::warn!(path = %moved.display(), "purgatory entry is gone");
        return Ok(());
    }
    move_path(&moved, &original)?;
    tracing::info!(
        from = %moved.display(),
        to = %original.display(),
        "restored from purgatory"
    );
    Ok(())
}

/// The latest purgatory copy of `original`: numbered siblings are newer
/// than the plain name.
pub(crate) fn newest_in_purgatory(root: &Path, original: &Path) -> Result<Option<PathBuf>> {
    let relative = original.strip_prefix(root).with_context(|| {
        format!("{} is outside of {}", original.display(), root.display())
    })?;
    let buried = root.join(PURGATORY_DIR).join(relative);
    let (Some(folder), Some(file_name)) = (buried.parent(), buried.file_name()) else {
        return Ok(None);
    };
    let file_name = file_name.to_string_lossy().into_owned();
    let entries = match fs::read_dir(folder) {
        Ok(entries) => entries,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err).with_context(|| format!("failed to read {}", folder.display())),
    };
    let newest = entries
        .flatten()
        .filter_map(|entry| {
            let name = entry.file_name().to_string_lossy().into_owned();
            let rank = if name == file_name {
                0
            } else {
                name.strip_prefix(&file_name)?
                    .strip_prefix('.')?
                    .parse::<u32>()
                    .ok()?
            };
            Some((rank, entry.path()))
        })
        .max_by_key(|(rank, _)| *rank)
        .map(|(_, path)| path);
    Ok(newest)
}

pub(crate) fn join_posix(root: &Path, relative: &str) -> PathBuf {
    let mut path = root.to_path_buf();
    path.extend(relative.split('/').filter(|part| !part.is_empty()));
    path
}

/// Posix form of `path` relative to `root`, for records that must stay
/// valid when the share is mounted elsewhere.
pub(crate) fn relative_posix(root: &Path, path: &Path) -> Result<String> {
    let relative = path.strip_prefix(root).with_context(|| {
        format!("{} is outside of {}", path.display(), root.display())
    })?;
    Ok(relative
        .components()
        .map(|component| component.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/"))
}

/// Moves a file or folder, creating the destination parent.
pub(crate) fn move_path(from: &Path, to: &Path) -> Result<()> {
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    fs::rename(from, to)
        .with_context(|| format!("failed to move {} to {}", from.display(), to.display()))
}
