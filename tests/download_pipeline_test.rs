//! 页面采集管线的端到端测试：用桩解析器替代真实源站。

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

use comic_shelf_downloader::base_system::context::{Config, ImageFormat};
use comic_shelf_downloader::base_system::http::PageError;
use comic_shelf_downloader::comic::book_infos::BookInfos;
use comic_shelf_downloader::comic::image_codec::{self, ImageKind};
use comic_shelf_downloader::download::models::PageStatus;
use comic_shelf_downloader::download::scheduler;
use comic_shelf_downloader::sources::SourceResolver;

fn jpeg_bytes() -> Vec<u8> {
    let img = image::RgbImage::from_fn(6, 6, |x, y| image::Rgb([x as u8 * 30, y as u8 * 30, 99]));
    let mut out = std::io::Cursor::new(Vec::new());
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut out, image::ImageFormat::Jpeg)
        .unwrap();
    out.into_inner()
}

/// 桩解析器：内存里造一本书，按 index 决定返回图片 / 404 / HTML。
struct StubResolver {
    infos: BookInfos,
    /// 该 index 起全部 404
    serve_until: usize,
    /// 这些 index 返回 HTML 错误页
    html_at: Vec<usize>,
    /// 逐 index 的模拟网络延迟
    delay_ms: HashMap<usize, u64>,
    fetch_count: AtomicUsize,
    fetched_indices: Mutex<Vec<usize>>,
}

impl StubResolver {
    fn new(title: &str, pages: usize, locators: usize, serve_until: usize) -> Self {
        Self {
            infos: BookInfos {
                title: title.to_string(),
                pages,
                page_locators: (0..locators).map(|i| format!("stub://page/{i}")).collect(),
                ..Default::default()
            },
            serve_until,
            html_at: Vec::new(),
            delay_ms: HashMap::new(),
            fetch_count: AtomicUsize::new(0),
            fetched_indices: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl SourceResolver for StubResolver {
    async fn get_book_infos(&self) -> Result<BookInfos> {
        Ok(self.infos.clone())
    }

    async fn fetch_page(&self, index: usize, _locator: &str) -> Result<Vec<u8>, PageError> {
        self.fetch_count.fetch_add(1, Ordering::SeqCst);
        self.fetched_indices.lock().unwrap().push(index);
        if let Some(ms) = self.delay_ms.get(&index) {
            tokio::time::sleep(Duration::from_millis(*ms)).await;
        }
        if index >= self.serve_until {
            return Err(PageError::NotFound(404));
        }
        if self.html_at.contains(&index) {
            return Ok(b"<html><body>error</body></html>".to_vec());
        }
        Ok(jpeg_bytes())
    }
}

fn test_config(output_root: &std::path::Path, pause_sec: u64, resume: bool) -> Config {
    let mut config = Config::default();
    config.output_folder = output_root.to_string_lossy().to_string();
    config.output_filename = "{title}".to_string();
    config.image_format = ImageFormat::Jpeg;
    config.pause_sec = pause_sec;
    config.continue_from_existing = resume;
    config.page_sup_to_grab = 5;
    config.nb_page_limit = 10;
    config
}

fn page_path(root: &std::path::Path, title: &str, number: usize) -> PathBuf {
    root.join(title).join(format!("{title} {number:03}.jpeg"))
}

// ── 端到端场景 ──────────────────────────────────────────────────

#[tokio::test]
async fn three_pages_then_404_yields_three_files() {
    let dir = tempfile::tempdir().unwrap();
    // 源站报告 3 页、3 个定位符, 第 4 页起 404, 限额远大于页数
    let resolver = std::sync::Arc::new(StubResolver::new("Book", 3, 3, 3));
    let config = test_config(dir.path(), 0, false);
    let infos = resolver.get_book_infos().await.unwrap();

    let session = scheduler::run(resolver.clone(), &infos, &config, None, None)
        .await
        .unwrap();

    assert!(session.is_success());
    let summary = session.summary();
    assert_eq!(summary.downloaded, 3);
    assert_eq!(summary.failed, 0);
    // 定位符就是抓取次数的上限, 不会去试第 4 页
    assert_eq!(resolver.fetch_count.load(Ordering::SeqCst), 3);

    for number in 1..=3 {
        let path = page_path(dir.path(), "Book", number);
        assert!(path.exists(), "missing {}", path.display());
        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(image_codec::detect_format(&bytes), Some(ImageKind::Jpeg));
    }
}

// ── 页序连续性假设 ──────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn sequential_run_stops_after_not_found() {
    let dir = tempfile::tempdir().unwrap();
    // 10 个定位符, 第 6 页 (index 5) 起 404, 限速顺序模式
    let resolver = std::sync::Arc::new(StubResolver::new("Book", 10, 10, 5));
    let config = test_config(dir.path(), 1, false);
    let infos = resolver.get_book_infos().await.unwrap();

    let session = scheduler::run(resolver.clone(), &infos, &config, None, None)
        .await
        .unwrap();

    // 会话正常完成, 不算中止
    assert!(session.is_success());
    let summary = session.summary();
    assert_eq!(summary.downloaded, 5);
    assert_eq!(summary.failed, 1);
    // index 5 撞到 404 之后, 6..10 永远不会被请求
    assert_eq!(resolver.fetch_count.load(Ordering::SeqCst), 6);
    let fetched = resolver.fetched_indices.lock().unwrap().clone();
    assert_eq!(fetched, vec![0, 1, 2, 3, 4, 5]);
}

// ── 并发聚合的序无关性 ──────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn concurrent_outcomes_sorted_by_index_regardless_of_completion_order() {
    let dir = tempfile::tempdir().unwrap();
    let mut resolver = StubResolver::new("Book", 5, 5, 5);
    // index 越小越慢, 完成顺序与页序完全相反
    for index in 0..5usize {
        resolver.delay_ms.insert(index, ((5 - index) * 100) as u64);
    }
    let resolver = std::sync::Arc::new(resolver);
    let config = test_config(dir.path(), 0, false);
    let infos = resolver.get_book_infos().await.unwrap();

    let session = scheduler::run(resolver.clone(), &infos, &config, None, None)
        .await
        .unwrap();

    let indices: Vec<usize> = session.outcomes.iter().map(|o| o.index).collect();
    assert_eq!(indices, vec![0, 1, 2, 3, 4]);
    assert_eq!(session.summary().downloaded, 5);
}

// ── 并发批次不互相取消 ──────────────────────────────────────────

#[tokio::test]
async fn concurrent_failure_does_not_cancel_siblings() {
    let dir = tempfile::tempdir().unwrap();
    let mut resolver = StubResolver::new("Book", 3, 3, 3);
    resolver.html_at.push(1);
    let resolver = std::sync::Arc::new(resolver);
    let config = test_config(dir.path(), 0, false);
    let infos = resolver.get_book_infos().await.unwrap();

    let session = scheduler::run(resolver.clone(), &infos, &config, None, None)
        .await
        .unwrap();

    // 三页都发了请求, 中间一页失败不传染
    assert_eq!(resolver.fetch_count.load(Ordering::SeqCst), 3);
    assert_eq!(session.outcomes[1].status, PageStatus::Unavailable);
    assert_eq!(session.outcomes[0].status, PageStatus::Downloaded);
    assert_eq!(session.outcomes[2].status, PageStatus::Downloaded);
    assert!(session.is_success());
}

// ── 断点续传 ────────────────────────────────────────────────────

#[tokio::test]
async fn resume_is_idempotent_and_skips_network() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path(), 0, true);

    let first = std::sync::Arc::new(StubResolver::new("Book", 3, 3, 3));
    let infos = first.get_book_infos().await.unwrap();
    let session = scheduler::run(first.clone(), &infos, &config, None, None)
        .await
        .unwrap();
    assert_eq!(session.summary().downloaded, 3);

    let listing = |root: &std::path::Path| -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(root.join("Book"))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        names.sort();
        names
    };
    let after_first = listing(dir.path());

    // 第二轮: 一次网络请求都不该发
    let second = std::sync::Arc::new(StubResolver::new("Book", 3, 3, 3));
    let session = scheduler::run(second.clone(), &infos, &config, None, None)
        .await
        .unwrap();
    assert_eq!(second.fetch_count.load(Ordering::SeqCst), 0);
    let summary = session.summary();
    assert_eq!(summary.downloaded, 0);
    assert_eq!(summary.skipped, 3);
    assert_eq!(listing(dir.path()), after_first);
}

#[tokio::test]
async fn zero_byte_file_is_refetched() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path(), 0, true);

    let book_dir = dir.path().join("Book");
    std::fs::create_dir_all(&book_dir).unwrap();
    // index 0 是零字节残留, index 1 是完好文件
    std::fs::write(page_path(dir.path(), "Book", 1), b"").unwrap();
    std::fs::write(page_path(dir.path(), "Book", 2), b"ok").unwrap();

    let resolver = std::sync::Arc::new(StubResolver::new("Book", 3, 3, 3));
    let infos = resolver.get_book_infos().await.unwrap();
    let session = scheduler::run(resolver.clone(), &infos, &config, None, None)
        .await
        .unwrap();

    let fetched = {
        let mut v = resolver.fetched_indices.lock().unwrap().clone();
        v.sort();
        v
    };
    assert_eq!(fetched, vec![0, 2]);
    assert_eq!(session.outcomes[0].status, PageStatus::Downloaded);
    assert_eq!(session.outcomes[1].status, PageStatus::SkippedExisting);
    assert_eq!(session.outcomes[2].status, PageStatus::Downloaded);
    // 零字节文件被真实内容替换
    let bytes = std::fs::read(page_path(dir.path(), "Book", 1)).unwrap();
    assert!(!bytes.is_empty());
}

// ── 元数据不合法 ────────────────────────────────────────────────

#[tokio::test]
async fn empty_metadata_aborts_without_creating_directory() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path(), 0, false);
    let resolver = std::sync::Arc::new(StubResolver::new("", 0, 0, 0));
    let infos = resolver.get_book_infos().await.unwrap();

    let result = scheduler::run(resolver.clone(), &infos, &config, None, None).await;
    assert!(result.is_err());
    // 没创建任何目录, 也没发请求
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    assert_eq!(resolver.fetch_count.load(Ordering::SeqCst), 0);
}

// ── 无定位符时按报告页数 + 余量推进 ─────────────────────────────

#[tokio::test]
async fn locatorless_book_respects_margin_and_limit() {
    let dir = tempfile::tempdir().unwrap();
    // 报告 3 页, 无定位符; 余量 5, 上限 10, 计划 8 次, 第 4 页起 404
    let resolver = std::sync::Arc::new(StubResolver::new("Book", 3, 0, 3));
    let config = test_config(dir.path(), 0, false);
    let infos = resolver.get_book_infos().await.unwrap();

    let session = scheduler::run(resolver.clone(), &infos, &config, None, None)
        .await
        .unwrap();

    // 并发模式 8 个任务全部铺开
    assert_eq!(resolver.fetch_count.load(Ordering::SeqCst), 8);
    let summary = session.summary();
    assert_eq!(summary.downloaded, 3);
    assert_eq!(summary.failed, 5);
    assert!(session.is_success());
}
