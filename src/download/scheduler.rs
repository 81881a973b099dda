//! 下载调度：一本书一个会话，按配置选择限速顺序或并发两种策略。
//!
//! 策略在会话开始时选定一次，永不混用：配了暂停间隔就逐页顺序抓取，
//! 否则整批并发铺开。无论完成顺序如何，汇总结果都按页序升序。

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::base_system::context::Config;
use crate::comic::book_infos::BookInfos;
use crate::comic::naming;
use crate::sources::SourceResolver;

use super::fetcher::PageFetcher;
use super::models::{DownloadSession, PageOutcome, PageStatus};
use super::progress::{ProgressReporter, ProgressSnapshot, make_reporter};

/// 执行一本书的页面采集，返回完成的会话。
///
/// 元数据不合法（空标题且无页可抓）直接报"书不存在"，不创建目录；
/// 文件系统错误向上冒泡；页级失败只体现在会话的 outcome 里。
pub async fn run(
    resolver: Arc<dyn SourceResolver>,
    infos: &BookInfos,
    config: &Config,
    forced_title: Option<&str>,
    progress: Option<Box<dyn FnMut(ProgressSnapshot) + Send>>,
) -> Result<DownloadSession> {
    if infos.title.is_empty() || (infos.page_locators.is_empty() && infos.pages == 0) {
        bail!("book not found: empty title or no pages reported");
    }

    let title_used = match forced_title {
        Some(forced) => {
            let cleaned = naming::sanitize(forced, false);
            info!("以标题 \"{}\" 保存 \"{}\"", cleaned, infos.title);
            cleaned
        }
        None => naming::compute_title(&config.output_filename, infos),
    };

    let folder = naming::sanitize(&naming::render(&config.output_folder, infos), true);
    let save_path = PathBuf::from(folder).join(&title_used);

    // 断点续传且成品压缩包已在, 整本跳过
    let cbz_path = PathBuf::from(format!("{}.cbz", save_path.to_string_lossy()));
    if config.continue_from_existing && cbz_path.exists() {
        info!("{} 已存在, 跳过本书", cbz_path.display());
        return Ok(DownloadSession {
            save_path,
            title_used,
            outcomes: Vec::new(),
            archive_exists: true,
        });
    }

    let planned = infos.planned_pages(config.page_sup_to_grab, config.nb_page_limit);
    info!(
        "开始下载 \"{}\": 预计 {} 页 (源站报告 {} 页)",
        title_used, planned, infos.pages
    );

    std::fs::create_dir_all(&save_path)
        .with_context(|| format!("create dir {}", save_path.display()))?;

    let fetcher = PageFetcher::new(
        Arc::clone(&resolver),
        save_path.clone(),
        title_used.clone(),
        planned,
        config.image_format,
        config.image_quality,
        config.continue_from_existing,
        infos.pages,
    );

    let mut reporter = make_reporter(planned, progress);

    let mut outcomes = match config.pacing() {
        Some(pause) => run_paced(&fetcher, infos, planned, pause, &mut reporter).await?,
        None => run_concurrent(&fetcher, infos, planned, &mut reporter).await?,
    };
    outcomes.sort_by_key(|o| o.index);
    reporter.finish();

    let session = DownloadSession {
        save_path,
        title_used,
        outcomes,
        archive_exists: false,
    };

    let summary = session.summary();
    let satisfied = (summary.downloaded + summary.skipped) as usize;
    if satisfied < infos.pages {
        warn!(
            "只取到 {} 页（源站报告 {} 页）",
            satisfied, infos.pages
        );
    }
    info!(
        "下载结束 \"{}\": 成功 {} 页, 跳过 {} 页, 失败 {} 页",
        session.title_used, summary.downloaded, summary.skipped, summary.failed
    );

    Ok(session)
}

fn locator_of(infos: &BookInfos, index: usize) -> &str {
    infos
        .page_locators
        .get(index)
        .map(String::as_str)
        .unwrap_or("")
}

/// 限速顺序策略：一次一页，网络抓取后强制暂停（跳过不暂停），
/// 碰到终结信号立即停止发起后续请求。
async fn run_paced(
    fetcher: &PageFetcher,
    infos: &BookInfos,
    planned: usize,
    pause: Duration,
    reporter: &mut ProgressReporter,
) -> Result<Vec<PageOutcome>> {
    let mut outcomes = Vec::with_capacity(planned);
    for index in 0..planned {
        let outcome = fetcher.fetch(index, locator_of(infos, index)).await?;
        let status = outcome.status;
        reporter.record(status);
        outcomes.push(outcome);

        if status.is_terminal() {
            debug!("第 {} 页到底, 停止后续请求", index + 1);
            break;
        }
        // 页序连续性假设: 后续页默认存在, 按限速节奏继续
        if status == PageStatus::Downloaded && index + 1 < planned {
            tokio::time::sleep(pause).await;
        }
    }
    Ok(outcomes)
}

/// 并发策略：整批任务立即铺开，不做批内取消；失败只记录不传染。
async fn run_concurrent(
    fetcher: &PageFetcher,
    infos: &BookInfos,
    planned: usize,
    reporter: &mut ProgressReporter,
) -> Result<Vec<PageOutcome>> {
    let mut tasks = JoinSet::new();
    for index in 0..planned {
        let fetcher = fetcher.clone();
        let locator = locator_of(infos, index).to_string();
        tasks.spawn(async move { fetcher.fetch(index, &locator).await });
    }

    let mut outcomes = Vec::with_capacity(planned);
    let mut fatal: Option<anyhow::Error> = None;
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(Ok(outcome)) => {
                reporter.record(outcome.status);
                outcomes.push(outcome);
            }
            Ok(Err(err)) => {
                // 文件系统级失败: 等批次收完再冒泡, 不让 JoinSet 悬空
                if fatal.is_none() {
                    fatal = Some(err);
                }
            }
            Err(join_err) => {
                if fatal.is_none() {
                    fatal = Some(anyhow::Error::new(join_err).context("page task panicked"));
                }
            }
        }
    }
    if let Some(err) = fatal {
        return Err(err);
    }
    Ok(outcomes)
}
