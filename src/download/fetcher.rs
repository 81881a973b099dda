//! 单页抓取：续传判定、传输、响应分类、解密后处理、归一化落盘。
//!
//! 先写 `.tmp` 再改名，半截文件永远不会带最终扩展名；进程被打断后
//! 残留的 `.tmp` 不会被续传逻辑误认为完成。

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, warn};

use crate::base_system::context::ImageFormat;
use crate::base_system::http::{PageError, looks_like_html};
use crate::comic::{image_codec, naming};
use crate::sources::SourceResolver;

use super::models::{PageOutcome, PageStatus};
use super::resume;

#[derive(Clone)]
pub struct PageFetcher {
    resolver: Arc<dyn SourceResolver>,
    save_path: PathBuf,
    title_used: String,
    planned_total: usize,
    target: ImageFormat,
    quality: u8,
    resume_enabled: bool,
    reported_pages: usize,
}

impl PageFetcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        resolver: Arc<dyn SourceResolver>,
        save_path: PathBuf,
        title_used: String,
        planned_total: usize,
        target: ImageFormat,
        quality: u8,
        resume_enabled: bool,
        reported_pages: usize,
    ) -> Self {
        Self {
            resolver,
            save_path,
            title_used,
            planned_total,
            target,
            quality,
            resume_enabled,
            reported_pages,
        }
    }

    /// 抓取并落盘一页。
    ///
    /// 页级失败（404、解密失败、内容不是图片）折叠进 `PageOutcome`；
    /// 只有文件系统写失败才作为 `Err` 向上冒泡，终结整本书。
    pub async fn fetch(&self, index: usize, locator: &str) -> Result<PageOutcome> {
        if resume::page_already_satisfied(
            &self.save_path,
            &self.title_used,
            index,
            self.planned_total,
            self.target,
            self.resume_enabled,
        ) {
            let final_path = resume::expected_final_path(
                &self.save_path,
                &self.title_used,
                index,
                self.planned_total,
                self.target,
            );
            debug!("第 {} 页已存在, 跳过", index + 1);
            return Ok(PageOutcome {
                index,
                final_path,
                status: PageStatus::SkippedExisting,
            });
        }

        let raw = match self.resolver.fetch_page(index, locator).await {
            Ok(bytes) => bytes,
            Err(PageError::NotFound(code)) => {
                if index < self.reported_pages {
                    warn!(
                        "第 {} 页返回 http {}（源站报告共 {} 页）",
                        index + 1,
                        code,
                        self.reported_pages
                    );
                } else {
                    debug!("第 {} 页返回 http {}, 视为到底", index + 1, code);
                }
                return Ok(self.failed(index, PageStatus::NotFound));
            }
            Err(PageError::Unavailable(reason)) => {
                warn!("第 {} 页不可用: {}", index + 1, reason);
                return Ok(self.failed(index, PageStatus::Unavailable));
            }
            Err(PageError::Transient(err)) => {
                warn!("第 {} 页重试耗尽: {}", index + 1, err);
                return Ok(self.failed(index, PageStatus::Unavailable));
            }
        };

        // 预期是图片二进制, 拿到 HTML 错误页说明源站不再提供该页
        if looks_like_html(&raw) {
            warn!("第 {} 页返回了 HTML 而非图片", index + 1);
            return Ok(self.failed(index, PageStatus::Unavailable));
        }

        let decoded = match self.resolver.post_process(raw, index) {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!("第 {} 页后处理失败: {}", index + 1, err);
                return Ok(self.failed(index, PageStatus::Unavailable));
            }
        };

        let tmp_path = self.save_path.join(naming::page_file_name(
            &self.title_used,
            index,
            self.planned_total,
            "tmp",
        ));
        std::fs::write(&tmp_path, &decoded)
            .with_context(|| format!("write {}", tmp_path.display()))?;

        match image_codec::normalize(&tmp_path, self.target, self.quality) {
            Ok(final_path) => Ok(PageOutcome {
                index,
                final_path: Some(final_path),
                status: PageStatus::Downloaded,
            }),
            Err(err) => {
                warn!("第 {} 页图像归一化失败: {err:#}", index + 1);
                let _ = std::fs::remove_file(&tmp_path);
                Ok(self.failed(index, PageStatus::Unavailable))
            }
        }
    }

    fn failed(&self, index: usize, status: PageStatus) -> PageOutcome {
        PageOutcome {
            index,
            final_path: None,
            status,
        }
    }
}
