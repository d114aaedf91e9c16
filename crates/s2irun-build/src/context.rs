use crate::error::{BuildError, Result};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use std::fs;
use std::io::{Cursor, Read};
use std::path::Path;
use tar::{Archive, Builder};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

pub struct ContextBuilder;

impl ContextBuilder {
    /// ビルドコンテキストをtar.gzアーカイブとして作成
    ///
    /// `context_path` 直下に `dockerfile` があることが前提です。
    pub fn create_context(context_path: &Path, dockerfile: &str) -> Result<Vec<u8>> {
        tracing::debug!("Creating build context from: {}", context_path.display());

        if !context_path.join(dockerfile).is_file() {
            return Err(BuildError::InvalidConfig(format!(
                "{} not found in build context {}",
                dockerfile,
                context_path.display()
            )));
        }

        let mut archive_data = Vec::new();
        {
            let encoder = GzEncoder::new(&mut archive_data, Compression::default());
            let mut tar = Builder::new(encoder);
            tar.follow_symlinks(false);

            tar.append_dir_all(".", context_path)
                .map_err(BuildError::Io)?;

            tar.into_inner()
                .and_then(|encoder| encoder.finish())
                .map_err(BuildError::Io)?;
        }

        tracing::debug!("Build context created: {} bytes", archive_data.len());

        Self::check_context_size(archive_data.len());

        Ok(archive_data)
    }

    /// コンテキストサイズのチェックと警告
    fn check_context_size(size: usize) {
        const MAX_CONTEXT_SIZE: usize = 500 * 1024 * 1024; // 500MB

        if size > MAX_CONTEXT_SIZE {
            tracing::warn!(
                "Build context is large ({}MB); consider removing unneeded files from the source",
                size / 1024 / 1024
            );
        }
    }
}

/// tar または tar.gz を `dest` に展開
pub fn extract_archive(data: &[u8], dest: &Path) -> Result<()> {
    fs::create_dir_all(dest)?;

    let reader: Box<dyn Read> = if data.starts_with(&GZIP_MAGIC) {
        Box::new(GzDecoder::new(Cursor::new(data)))
    } else {
        Box::new(Cursor::new(data))
    };

    let mut archive = Archive::new(reader);
    archive.set_preserve_permissions(true);
    // unpack は `..` や絶対パスのエントリを dest の外に書き出さない
    archive.unpack(dest)?;
    Ok(())
}

/// ディレクトリを再帰的にコピー（シンボリックリンクはリンクのまま）
///
/// コピー先が `src` の内側にある場合、コピー先とその親ディレクトリはコピーしない。
pub fn copy_dir(src: &Path, dest: &Path) -> Result<()> {
    fs::create_dir_all(dest)?;
    let dest = dest.canonicalize()?;
    copy_dir_excluding(src, &dest, &dest)
}

fn copy_dir_excluding(src: &Path, dest: &Path, excluded: &Path) -> Result<()> {
    fs::create_dir_all(dest)?;

    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        let target = dest.join(entry.file_name());

        if file_type.is_dir() {
            let path = entry.path().canonicalize()?;
            if excluded.starts_with(&path) {
                tracing::debug!("Skipping {} (contains copy destination)", path.display());
                continue;
            }
            copy_dir_excluding(&entry.path(), &target, excluded)?;
        } else if file_type.is_symlink() {
            copy_symlink(&entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

#[cfg(unix)]
fn copy_symlink(src: &Path, dest: &Path) -> Result<()> {
    let link = fs::read_link(src)?;
    std::os::unix::fs::symlink(link, dest)?;
    Ok(())
}

#[cfg(not(unix))]
fn copy_symlink(src: &Path, dest: &Path) -> Result<()> {
    fs::copy(src, dest)?;
    Ok(())
}
