//! 成品打包：把下载目录压成 CBZ。

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use tracing::info;
use zip::CompressionMethod;
use zip::write::FileOptions;

/// 同名文件已存在时追加 ` (1)` ` (2)` … 直到找到空位。
pub fn unique_name(path: &Path) -> PathBuf {
    if !path.exists() {
        return path.to_path_buf();
    }
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let ext = path
        .extension()
        .map(|s| format!(".{}", s.to_string_lossy()))
        .unwrap_or_default();
    let parent = path.parent().unwrap_or_else(|| Path::new(""));

    let mut i = 1usize;
    loop {
        let candidate = parent.join(format!("{stem} ({i}){ext}"));
        if !candidate.exists() {
            return candidate;
        }
        i += 1;
    }
}

/// 把一个下载完成的目录打包成 CBZ，返回生成的文件路径。
///
/// 页文件按文件名排序写入，保证阅读器里的页序。
pub fn create_cbz(source_dir: &Path) -> Result<PathBuf> {
    if !source_dir.is_dir() {
        return Err(anyhow!("not a directory: {}", source_dir.display()));
    }

    let mut pages: Vec<PathBuf> = fs::read_dir(source_dir)
        .with_context(|| format!("read dir {}", source_dir.display()))?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file())
        .collect();
    if pages.is_empty() {
        return Err(anyhow!("nothing to pack in {}", source_dir.display()));
    }
    pages.sort();

    let cbz_path = unique_name(&PathBuf::from(format!(
        "{}.cbz",
        source_dir.to_string_lossy()
    )));

    let file = File::create(&cbz_path)
        .with_context(|| format!("create {}", cbz_path.display()))?;
    let mut zip = zip::ZipWriter::new(file);
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);

    for page in &pages {
        let name = page
            .file_name()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        zip.start_file(name, options)?;
        let mut src = File::open(page)?;
        io::copy(&mut src, &mut zip)?;
    }
    zip.finish()?;

    info!("CBZ 已生成: {}", cbz_path.display());
    Ok(cbz_path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packs_directory_into_cbz() {
        let dir = tempfile::tempdir().unwrap();
        let book = dir.path().join("Book");
        std::fs::create_dir(&book).unwrap();
        std::fs::write(book.join("Book 001.jpeg"), b"aaa").unwrap();
        std::fs::write(book.join("Book 002.jpeg"), b"bbb").unwrap();

        let cbz = create_cbz(&book).unwrap();
        assert_eq!(cbz, dir.path().join("Book.cbz"));
        assert!(std::fs::metadata(&cbz).unwrap().len() > 0);
    }

    #[test]
    fn existing_archive_gets_numeric_suffix() {
        let dir = tempfile::tempdir().unwrap();
        let book = dir.path().join("Book");
        std::fs::create_dir(&book).unwrap();
        std::fs::write(book.join("Book 001.jpeg"), b"aaa").unwrap();

        let first = create_cbz(&book).unwrap();
        let second = create_cbz(&book).unwrap();
        assert_eq!(first, dir.path().join("Book.cbz"));
        assert_eq!(second, dir.path().join("Book (1).cbz"));
        let third = create_cbz(&book).unwrap();
        assert_eq!(third, dir.path().join("Book (2).cbz"));
    }

    #[test]
    fn empty_directory_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let book = dir.path().join("Empty");
        std::fs::create_dir(&book).unwrap();
        assert!(create_cbz(&book).is_err());
    }
}
