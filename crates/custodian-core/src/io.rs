use crate::error::Result;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;

/// Atomically write `data` to `path` using a tempfile in the same directory.
/// Prevents partial writes from corrupting state files.
pub fn atomic_write(path: &Path, data: &[u8]) -> Result<()> {
    atomic_write_with(path, |w| {
        w.write_all(data)?;
        Ok(())
    })
}

/// Atomically replace `path` with whatever `fill` writes.
///
/// `fill` streams into a tempfile created next to `path`; the rename only
/// happens once `fill` returns `Ok` and the data is flushed. If `fill` fails
/// the tempfile is dropped (and deleted) and `path` is left untouched.
pub fn atomic_write_with<F>(path: &Path, fill: F) -> Result<()>
where
    F: FnOnce(&mut dyn Write) -> Result<()>,
{
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let mut tmp = NamedTempFile::new_in(dir)?;
    fill(tmp.as_file_mut())?;
    tmp.as_file_mut().flush()?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CustodianError;
    use tempfile::TempDir;

    #[test]
    fn atomic_write_creates_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.yaml");
        atomic_write(&path, b"hello: world").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "hello: world");
    }

    #[test]
    fn atomic_write_creates_parents() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a/b/c/test.yaml");
        atomic_write(&path, b"data").unwrap();
        assert!(path.exists());
    }

    #[test]
    fn failed_fill_leaves_original_intact() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("queue.csv");
        std::fs::write(&path, b"request_id,status\nR1,READY\n").unwrap();
        let before = std::fs::read(&path).unwrap();

        let result = atomic_write_with(&path, |w| {
            w.write_all(b"request_id,status\nR1,ERR")?;
            Err(CustodianError::Validation("crash before rename".into()))
        });
        assert!(result.is_err());

        assert_eq!(std::fs::read(&path).unwrap(), before);
        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path() != path)
            .collect();
        assert!(leftovers.is_empty(), "tempfile should be cleaned up");
    }
}
