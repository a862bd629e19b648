use std::{fs, io::Write, path::Path};

use anyhow::{Context, Result};
use tempfile::NamedTempFile;
use tracing::debug;

pub fn read_module(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).with_context(|| format!("failed to read {}", path.display()))
}

/// Replaces the contents of `path` with `bytes`.
///
/// The new contents go to a temporary file next to `path` which is then
/// renamed over it, so a failed write leaves the original untouched.
pub fn replace_file(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };

    let mut tmp = NamedTempFile::new_in(dir)
        .with_context(|| format!("failed to create a temporary file in {}", dir.display()))?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;

    let permissions = fs::metadata(path)
        .with_context(|| format!("failed to stat {}", path.display()))?
        .permissions();
    fs::set_permissions(tmp.path(), permissions)?;

    tmp.persist(path)
        .with_context(|| format!("failed to replace {}", path.display()))?;
    debug!(path = %path.display(), len = bytes.len(), "rewrote module");

    Ok(())
}

#[cfg(test)]
mod fs_tests {
    use super::{read_module, replace_file};
    use anyhow::Result;

    #[test]
    fn replace_overwrites_contents() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("lib.wasm");
        std::fs::write(&path, b"old contents")?;

        replace_file(&path, b"new")?;

        assert_eq!(b"new".to_vec(), read_module(&path)?);
        assert_eq!(1, std::fs::read_dir(dir.path())?.count());
        Ok(())
    }

    #[test]
    fn replace_requires_existing_file() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("missing.wasm");

        assert!(replace_file(&path, b"new").is_err());
        assert!(!path.exists());
        Ok(())
    }
}
