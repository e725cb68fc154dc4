//! Small capability-scoped file helpers shared by the store, key and
//! cloud-init modules.
//!
//! Every helper opens the parent directory with ambient authority and then
//! operates on the file name relative to it.

use std::io::{self, Write};

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::ambient_authority;
#[cfg(unix)]
use cap_std::fs_utf8::OpenOptionsExt;
use cap_std::fs_utf8::{Dir, OpenOptions};

/// Mode of files created by [`write`]; records carry TLS key material.
#[cfg(unix)]
const PRIVATE_MODE: u32 = 0o600;

fn split(path: &Utf8Path) -> io::Result<(&Utf8Path, &Utf8Path)> {
    let file_name = path.file_name().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("path has no file name: {path}"),
        )
    })?;
    let parent = match path.parent() {
        Some(parent) if !parent.as_str().is_empty() => parent,
        _ => Utf8Path::new("."),
    };
    Ok((parent, Utf8Path::new(file_name)))
}

/// Expands a leading `~/` using `HOME`.
pub(crate) fn expand_tilde(path: &str) -> Utf8PathBuf {
    if let Some(rest) = path.strip_prefix("~/")
        && let Some(home) = std::env::var_os("HOME")
    {
        return Utf8PathBuf::from(format!("{}/{rest}", home.to_string_lossy()));
    }
    Utf8PathBuf::from(path)
}

/// Reads `path` into a string.
pub(crate) fn read_to_string(path: &Utf8Path) -> io::Result<String> {
    let (parent, file_name) = split(path)?;
    let dir = Dir::open_ambient_dir(parent, ambient_authority())?;
    dir.read_to_string(file_name)
}

/// Returns whether `path` exists. A missing parent directory counts as absent.
pub(crate) fn exists(path: &Utf8Path) -> io::Result<bool> {
    let (parent, file_name) = split(path)?;
    match Dir::open_ambient_dir(parent, ambient_authority()) {
        Ok(dir) => dir.try_exists(file_name),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err),
    }
}

/// Writes `contents` to `path`, creating parent directories as needed.
/// New files are readable by their owner only.
pub(crate) fn write(path: &Utf8Path, contents: &str) -> io::Result<()> {
    let (parent, file_name) = split(path)?;
    Dir::create_ambient_dir_all(parent, ambient_authority())?;
    let dir = Dir::open_ambient_dir(parent, ambient_authority())?;
    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    options.mode(PRIVATE_MODE);
    let mut file = dir.open_with(file_name, &options)?;
    file.write_all(contents.as_bytes())
}

/// Creates `path` and all missing ancestors.
pub(crate) fn create_dir_all(path: &Utf8Path) -> io::Result<()> {
    Dir::create_ambient_dir_all(path, ambient_authority())
}

/// Removes the directory at `path` with its contents. Absent paths succeed.
pub(crate) fn remove_dir_all(path: &Utf8Path) -> io::Result<()> {
    let (parent, name) = split(path)?;
    let dir = match Dir::open_ambient_dir(parent, ambient_authority()) {
        Ok(dir) => dir,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(err) => return Err(err),
    };
    match dir.remove_dir_all(name) {
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}
