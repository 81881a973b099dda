use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Result, anyhow};
use clap::Parser;
use tracing::{error, info, warn};

use comic_shelf_downloader::base_system::config::load_or_create;
use comic_shelf_downloader::base_system::context::{Config, ImageFormat, OutputFormat};
use comic_shelf_downloader::base_system::logging::{LogOptions, LogSystem};
use comic_shelf_downloader::comic::{image_codec, packaging};
use comic_shelf_downloader::download::scheduler;
use comic_shelf_downloader::sources;

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Parser)]
#[command(name = "comic-shelf-downloader")]
#[command(about = "Comic Shelf Downloader (漫画书架下载器)")]
struct Cli {
    /// 书籍 URL, 或每行一个 URL 的清单文件
    url: Option<String>,

    /// 配置文件路径（默认当前目录 config.yml）
    #[arg(long)]
    config: Option<String>,

    /// 动作: infos / download / convert / pack / process
    #[arg(long, default_value = "process")]
    action: String,

    /// 强制使用的保存标题
    #[arg(long)]
    force_title: Option<String>,

    /// 输出根目录（覆盖配置文件）
    #[arg(long)]
    output_folder: Option<String>,

    /// 图片格式: origin / jpeg / webp（覆盖配置文件）
    #[arg(long)]
    image_format: Option<String>,

    /// 输出形式: images / cbz / both（覆盖配置文件）
    #[arg(long)]
    output_format: Option<String>,

    /// 页面请求间隔秒数, 0 表示并发下载（覆盖配置文件）
    #[arg(long)]
    pause: Option<u64>,

    /// 断点续传: 跳过已存在的页面
    #[arg(long, default_value_t = false)]
    continue_from_existing: bool,

    /// 启用调试日志输出
    #[arg(long, default_value_t = false)]
    debug: bool,

    /// 显示版本信息后退出
    #[arg(long, default_value_t = false)]
    version: bool,
}

/// 对一个 URL 执行到哪一步。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    Infos,
    Download,
    Convert,
    Pack,
    Process,
}

impl Action {
    fn from_str(value: &str) -> Self {
        match value.to_ascii_uppercase().as_str() {
            "INFOS" => Self::Infos,
            "DOWNLOAD" => Self::Download,
            "CONVERT" => Self::Convert,
            "PACK" => Self::Pack,
            _ => Self::Process,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.version {
        println!("Comic Shelf Downloader v{VERSION}");
        return Ok(());
    }

    let _log = init_logging(cli.debug)?;
    info!("当前版本: v{VERSION}");

    let mut config: Config = load_or_create(cli.config.as_deref().map(Path::new))
        .map_err(|e| anyhow!(e.to_string()))?;
    apply_overrides(&mut config, &cli);

    let action = Action::from_str(&cli.action);
    let url = match cli.url.clone() {
        Some(url) => url,
        None => prompt_url()?,
    };

    // 单本失败不阻断清单里剩下的书
    for (url, forced_title) in collect_urls(&url)? {
        let forced = forced_title.as_deref().or(cli.force_title.as_deref());
        if let Err(err) = process_one(&url, forced, &config, action).await {
            error!("处理 {} 失败: {err:#}", url);
        }
    }

    info!("全部完成");
    Ok(())
}

async fn process_one(
    url: &str,
    forced_title: Option<&str>,
    config: &Config,
    action: Action,
) -> Result<()> {
    let Some(resolver) = sources::resolver_for(url, config)? else {
        warn!("没有匹配 {} 的解析器", url);
        return Ok(());
    };

    resolver.authenticate().await?;
    let infos = resolver.get_book_infos().await?;
    println!("{infos}");
    if action == Action::Infos {
        return Ok(());
    }

    if !resolver.before_download().await? {
        warn!("本书被源站/用户拒绝, 跳过");
        return Ok(());
    }

    let session = scheduler::run(Arc::clone(&resolver), &infos, config, forced_title, None).await?;
    resolver.after_download(&session.outcomes).await?;

    if session.archive_exists {
        return Ok(());
    }
    if !session.is_success() {
        return Err(anyhow!("一页都没有拿到, 按失败处理"));
    }

    if matches!(action, Action::Convert | Action::Process)
        && config.image_format != ImageFormat::Origin
    {
        image_codec::convert_folder(&session.save_path, config.image_format, config.image_quality)?;
    }

    if matches!(action, Action::Pack | Action::Process) && config.output_format.wants_cbz() {
        packaging::create_cbz(&session.save_path)?;
        if config.output_format == OutputFormat::Cbz {
            std::fs::remove_dir_all(&session.save_path)?;
        }
    }

    Ok(())
}

/// 输入是清单文件时逐行取 URL；`# --force-title X` 注释作用于下一行。
fn collect_urls(input: &str) -> Result<Vec<(String, Option<String>)>> {
    if !Path::new(input).exists() {
        return Ok(vec![(input.to_string(), None)]);
    }

    let text = std::fs::read_to_string(input)?;
    let mut out = Vec::new();
    let mut next_forced_title: Option<String> = None;
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(comment) = line.strip_prefix('#') {
            if let Some(title) = comment.trim().strip_prefix("--force-title ") {
                next_forced_title = Some(title.trim().to_string());
            }
            continue;
        }
        out.push((line.to_string(), next_forced_title.take()));
    }
    Ok(out)
}

fn apply_overrides(config: &mut Config, cli: &Cli) {
    if let Some(folder) = &cli.output_folder {
        config.output_folder = folder.clone();
    }
    if let Some(format) = &cli.image_format {
        match ImageFormat::parse(format) {
            Some(parsed) => config.image_format = parsed,
            None => warn!("未知图片格式 \"{}\", 保持 {:?}", format, config.image_format),
        }
    }
    if let Some(format) = &cli.output_format {
        match OutputFormat::parse(format) {
            Some(parsed) => config.output_format = parsed,
            None => warn!("未知输出形式 \"{}\", 保持 {:?}", format, config.output_format),
        }
    }
    if let Some(pause) = cli.pause {
        config.pause_sec = pause;
    }
    if cli.continue_from_existing {
        config.continue_from_existing = true;
    }
}

fn prompt_url() -> Result<String> {
    let mut url = String::new();
    while url.trim().is_empty() {
        print!("URL: ");
        std::io::stdout().flush().ok();
        url.clear();
        std::io::stdin().read_line(&mut url)?;
    }
    Ok(url.trim().to_string())
}

fn init_logging(debug: bool) -> Result<LogSystem> {
    let opts = LogOptions {
        debug,
        use_color: true,
        archive_on_exit: true,
    };
    LogSystem::init(opts).map_err(|e| anyhow!(e))
}
