//! Filesystem access needed while binding artefacts.

use std::path::Path;
use std::time::SystemTime;

/// MTime info gathered for a file.  This also models "file is absent", which
/// orders before any real timestamp, so it doubles as the zero timestamp of
/// non-file artefacts.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum MTime {
    Missing,
    Stamp(SystemTime),
}

impl MTime {
    pub fn exists(&self) -> bool {
        matches!(self, MTime::Stamp(_))
    }
}

/// stat() a path, yielding to the runtime while the disk is consulted.
/// Dangling symlinks count as present (with the link's own time), so they are
/// rebuilt over rather than reported missing forever.
pub async fn stat(path: &Path) -> std::io::Result<MTime> {
    let meta = match tokio::fs::metadata(path).await {
        Ok(meta) => meta,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            match tokio::fs::symlink_metadata(path).await {
                Ok(meta) => meta,
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                    return Ok(MTime::Missing)
                }
                Err(err) => return Err(err),
            }
        }
        Err(err) => return Err(err),
    };
    Ok(MTime::Stamp(meta.modified()?))
}

/// Make sure the directory that will hold `path` exists.
pub async fn ensure_parent_dir(path: &Path) -> std::io::Result<()> {
    match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => tokio::fs::create_dir_all(dir).await,
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_orders_first() {
        assert!(MTime::Missing < MTime::Stamp(SystemTime::UNIX_EPOCH));
        assert!(!MTime::Missing.exists());
    }

    #[tokio::test]
    async fn stat_and_mkdir() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("sub/dir/file");
        assert_eq!(stat(&path).await?, MTime::Missing);
        ensure_parent_dir(&path).await?;
        assert!(dir.path().join("sub/dir").is_dir());
        std::fs::write(&path, "")?;
        assert!(stat(&path).await?.exists());
        Ok(())
    }
}
