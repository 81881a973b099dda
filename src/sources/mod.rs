//! 站点解析器模块入口。
//!
//! 每个受支持的源站一个实现，编译期注册：按声明顺序用 URL 模式逐个匹配，
//! 第一个命中的实现胜出。没有运行时插件发现。
//!
//! 子模块：
//! - `izneo`       — 阅读器型源站（逐页 AES-CBC 解密）
//! - `archive_org` — 借阅型源站（借出/归还钩子, 首 1KiB AES-CTR 解混淆）
//! - `webtoons`    — 条漫型源站（下载后纵向拼接）

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::base_system::context::Config;
use crate::base_system::http::PageError;
use crate::comic::book_infos::BookInfos;
use crate::download::models::PageOutcome;

pub mod archive_org;
pub mod izneo;
pub mod webtoons;

/// 一个源站解析器需要满足的能力。
///
/// 元数据在每个实例内只解析一次（内部记忆化），换一本书就换一个实例。
#[async_trait]
pub trait SourceResolver: Send + Sync {
    /// 认证 / 会话准备。无需认证的源站留空实现。
    async fn authenticate(&self) -> Result<()> {
        Ok(())
    }

    /// 解析书籍元数据（标题、页数、逐页定位符、私有字段）。
    async fn get_book_infos(&self) -> Result<BookInfos>;

    /// 通过解析器自己的传输层抓取一页的原始字节。
    async fn fetch_page(&self, index: usize, locator: &str) -> Result<Vec<u8>, PageError>;

    /// 逐页内容变换（解密 / 解包）。默认原样返回。
    fn post_process(&self, raw: Vec<u8>, index: usize) -> Result<Vec<u8>, PageError> {
        let _ = index;
        Ok(raw)
    }

    /// 下载前置钩子（借出、授权检查）。返回 `false` 表示本书被拒绝下载。
    async fn before_download(&self) -> Result<bool> {
        Ok(true)
    }

    /// 下载后置钩子（归还借阅、成品再加工）。
    async fn after_download(&self, outcomes: &[PageOutcome]) -> Result<()> {
        let _ = outcomes;
        Ok(())
    }
}

/// 按 URL 选择解析器。声明顺序即优先级，第一个命中者胜出。
pub fn resolver_for(url: &str, config: &Config) -> Result<Option<Arc<dyn SourceResolver>>> {
    if izneo::Izneo::is_valid_url(url) {
        return Ok(Some(Arc::new(izneo::Izneo::new(url, config)?)));
    }
    if archive_org::ArchiveOrg::is_valid_url(url) {
        return Ok(Some(Arc::new(archive_org::ArchiveOrg::new(url, config)?)));
    }
    if webtoons::Webtoons::is_valid_url(url) {
        return Ok(Some(Arc::new(webtoons::Webtoons::new(url, config)?)));
    }
    Ok(None)
}

// ── 解析器公用的小工具 ─────────────────────────────────────────

/// 去掉 HTML 标签。
pub(crate) fn strip_tags(html: &str) -> String {
    let re = regex::Regex::new("<[^<]+?>").expect("static regex");
    re.replace_all(html, "").to_string()
}

/// 反转义常见 HTML 实体并做文件名清洗，用于来自页面的元数据字段。
pub(crate) fn clean_attribute(attribute: &str) -> String {
    if attribute.is_empty() {
        return String::new();
    }
    let unescaped = attribute
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&nbsp;", " ");
    crate::comic::naming::sanitize(&unescaped, false)
}
