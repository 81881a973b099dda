//! 断点续传判定：磁盘上已成型的页面直接跳过，不发网络请求。

use std::fs;
use std::path::{Path, PathBuf};

use crate::base_system::context::ImageFormat;
use crate::comic::naming;

/// 第 `index` 页的预期最终路径。`Origin` 目标在下载前扩展名未知，返回 None。
pub fn expected_final_path(
    save_path: &Path,
    title_used: &str,
    index: usize,
    planned_total: usize,
    target: ImageFormat,
) -> Option<PathBuf> {
    let ext = target.extension()?;
    Some(save_path.join(naming::page_file_name(title_used, index, planned_total, ext)))
}

/// 该页是否已经满足，可以跳过。
///
/// 只有续传开启、目标格式确定、文件存在且非空时才算满足；
/// 零字节文件视为写了一半的残留，重新抓取。
pub fn page_already_satisfied(
    save_path: &Path,
    title_used: &str,
    index: usize,
    planned_total: usize,
    target: ImageFormat,
    resume_enabled: bool,
) -> bool {
    if !resume_enabled {
        return false;
    }
    let Some(path) = expected_final_path(save_path, title_used, index, planned_total, target)
    else {
        return false;
    };
    fs::metadata(&path).map(|m| m.len() > 0).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn satisfied_only_when_file_exists_and_nonempty() {
        let dir = tempfile::tempdir().unwrap();
        let page = dir.path().join("Book 001.jpeg");

        assert!(!page_already_satisfied(
            dir.path(),
            "Book",
            0,
            3,
            ImageFormat::Jpeg,
            true
        ));

        std::fs::write(&page, b"data").unwrap();
        assert!(page_already_satisfied(
            dir.path(),
            "Book",
            0,
            3,
            ImageFormat::Jpeg,
            true
        ));
    }

    #[test]
    fn zero_byte_file_never_satisfies() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("Book 001.jpeg"), b"").unwrap();
        assert!(!page_already_satisfied(
            dir.path(),
            "Book",
            0,
            3,
            ImageFormat::Jpeg,
            true
        ));
    }

    #[test]
    fn resume_disabled_always_refetches() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("Book 001.jpeg"), b"data").unwrap();
        assert!(!page_already_satisfied(
            dir.path(),
            "Book",
            0,
            3,
            ImageFormat::Jpeg,
            false
        ));
    }

    #[test]
    fn origin_target_is_never_checked() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("Book 001.png"), b"data").unwrap();
        assert!(!page_already_satisfied(
            dir.path(),
            "Book",
            0,
            3,
            ImageFormat::Origin,
            true
        ));
        assert!(expected_final_path(dir.path(), "Book", 0, 3, ImageFormat::Origin).is_none());
    }
}
