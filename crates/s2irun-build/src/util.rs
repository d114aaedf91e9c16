use std::io::Write;
use std::path::Path;

/// 同じディレクトリの一時ファイルに書き込んでからrenameする
///
/// 書き込み途中のファイルが読まれることはありません。
pub fn write_atomic(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(contents)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_write_atomic_creates_parents() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("a/b/config.json");

        write_atomic(&path, b"{}").unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "{}");
    }

    #[test]
    fn test_write_atomic_replaces_existing() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("Dockerfile");
        fs::write(&path, "old").unwrap();

        write_atomic(&path, b"FROM alpine\n").unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "FROM alpine\n");
        // 一時ファイルが残っていない
        assert_eq!(fs::read_dir(temp_dir.path()).unwrap().count(), 1);
    }
}
