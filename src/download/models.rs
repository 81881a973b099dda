//! 下载相关的数据模型定义。
//!
//! 单页结果、单本会话与汇总计数。会话由调度器独占，汇总后即丢弃。

use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageStatus {
    Downloaded,
    SkippedExisting,
    NotFound,
    Unavailable,
}

impl PageStatus {
    /// 该页是否已在磁盘上成型（下载成功或此前已有）。
    pub fn is_satisfied(self) -> bool {
        matches!(self, Self::Downloaded | Self::SkippedExisting)
    }

    /// 终结信号：源站不再提供后续页面，顺序模式据此停止发起新请求。
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::NotFound | Self::Unavailable)
    }
}

/// 一次页面抓取的结果。
#[derive(Debug, Clone)]
pub struct PageOutcome {
    pub index: usize,
    pub final_path: Option<PathBuf>,
    pub status: PageStatus,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DownloadSummary {
    pub downloaded: u32,
    pub skipped: u32,
    pub failed: u32,
}

/// 单本书下载期间的工作状态。
#[derive(Debug)]
pub struct DownloadSession {
    pub save_path: PathBuf,
    pub title_used: String,
    /// 完成时按页序升序排列。
    pub outcomes: Vec<PageOutcome>,
    /// 断点续传时发现成品压缩包已存在，本书整体跳过。
    pub archive_exists: bool,
}

impl DownloadSession {
    pub fn summary(&self) -> DownloadSummary {
        let mut summary = DownloadSummary::default();
        for outcome in &self.outcomes {
            match outcome.status {
                PageStatus::Downloaded => summary.downloaded += 1,
                PageStatus::SkippedExisting => summary.skipped += 1,
                PageStatus::NotFound | PageStatus::Unavailable => summary.failed += 1,
            }
        }
        summary
    }

    /// 至少一页成型才算下载成功；零页成功的会话按失败书处理，不进打包。
    pub fn is_success(&self) -> bool {
        self.archive_exists || self.outcomes.iter().any(|o| o.status.is_satisfied())
    }

    pub fn satisfied_files(&self) -> Vec<PathBuf> {
        self.outcomes
            .iter()
            .filter(|o| o.status.is_satisfied())
            .filter_map(|o| o.final_path.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_counts_by_status() {
        let session = DownloadSession {
            save_path: PathBuf::from("x"),
            title_used: "x".into(),
            outcomes: vec![
                PageOutcome {
                    index: 0,
                    final_path: Some(PathBuf::from("a")),
                    status: PageStatus::Downloaded,
                },
                PageOutcome {
                    index: 1,
                    final_path: Some(PathBuf::from("b")),
                    status: PageStatus::SkippedExisting,
                },
                PageOutcome {
                    index: 2,
                    final_path: None,
                    status: PageStatus::NotFound,
                },
            ],
            archive_exists: false,
        };
        let summary = session.summary();
        assert_eq!(summary.downloaded, 1);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.failed, 1);
        assert!(session.is_success());
        assert_eq!(session.satisfied_files().len(), 2);
    }

    #[test]
    fn zero_satisfied_pages_is_a_failed_book() {
        let session = DownloadSession {
            save_path: PathBuf::from("x"),
            title_used: "x".into(),
            outcomes: vec![PageOutcome {
                index: 0,
                final_path: None,
                status: PageStatus::Unavailable,
            }],
            archive_exists: false,
        };
        assert!(!session.is_success());
    }
}
