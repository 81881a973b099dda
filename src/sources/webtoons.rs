//! 条漫型源站解析器。
//!
//! 一话就是一组竖条图片；下载完后把所有分片纵向拼接成单张 JPEG，
//! 窄图水平居中。

use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use image::codecs::jpeg::JpegEncoder;
use image::{ExtendedColorType, GenericImageView, RgbImage, imageops};
use regex::Regex;
use reqwest::Client;
use reqwest::header::{HeaderMap, HeaderValue, REFERER};
use tracing::{info, warn};

use crate::base_system::context::Config;
use crate::base_system::http::{self, PageError};
use crate::comic::book_infos::BookInfos;
use crate::download::models::PageOutcome;

use super::SourceResolver;

const URL_PATTERN: &str = r"^https://www\.webtoons\.com/.*";

pub struct Webtoons {
    url: String,
    client: Client,
    max_retries: u32,
    book_infos: Mutex<Option<BookInfos>>,
}

impl Webtoons {
    pub fn is_valid_url(url: &str) -> bool {
        Regex::new(URL_PATTERN).expect("static regex").is_match(url)
    }

    pub fn new(url: &str, config: &Config) -> Result<Self> {
        Ok(Self {
            url: url.to_string(),
            client: http::build_client(config)?,
            max_retries: config.max_retries,
            book_infos: Mutex::new(None),
        })
    }

    fn page_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(REFERER, HeaderValue::from_static("https://www.webtoons.com/"));
        headers.insert("Sec-Fetch-Site", HeaderValue::from_static("same-site"));
        headers.insert("Sec-Fetch-Mode", HeaderValue::from_static("no-cors"));
        headers.insert("Sec-Fetch-Dest", HeaderValue::from_static("image"));
        headers
    }

    async fn resolve_book_infos(&self) -> Result<BookInfos> {
        let bytes = http::get_bytes_with_retry(
            &self.client,
            &self.url,
            &HeaderMap::new(),
            self.max_retries,
        )
        .await
        .map_err(|e| anyhow!("fetch episode page: {e}"))?;
        let text = String::from_utf8_lossy(&bytes);

        let title = capture(&text, r#"title\s*:\s*['"]([^'"]+)['"]"#);
        let subtitle = capture(&text, r#"episodeTitle\s*:\s*['"]([^'"]+)['"]"#);
        let language = capture(&text, r#"languageCode\s*:\s*['"]([^'"]+)['"]"#);
        let description = capture(&text, r#"titleSynopsis\s*:\s*['"]([^'"]+)['"]"#)
            .replace("\\n", "\n")
            .replace("\\\"", "\"");
        let chapter = capture(&text, r"episodeNo\s*:\s*(\d+)");

        // 分片图片列表在 _imageList 容器里
        let scope = text
            .find("_imageList")
            .map(|start| {
                let tail = &text[start..];
                let end = tail.find("</div>").unwrap_or(tail.len());
                &tail[..end]
            })
            .unwrap_or_else(|| text.as_ref());
        let data_url = Regex::new(r#"data-url="([^"]+)""#).expect("static regex");
        let mut page_locators: Vec<String> = data_url
            .captures_iter(scope)
            .map(|caps| caps[1].to_string())
            .collect();
        if page_locators.is_empty() {
            page_locators = vec![self.url.clone()];
        }

        Ok(BookInfos {
            title,
            subtitle,
            pages: page_locators.len(),
            volume: chapter.clone(),
            chapter,
            language,
            description,
            page_locators,
            ..Default::default()
        })
    }
}

#[async_trait]
impl SourceResolver for Webtoons {
    async fn get_book_infos(&self) -> Result<BookInfos> {
        if let Some(infos) = self.book_infos.lock().expect("infos lock").clone() {
            return Ok(infos);
        }
        let infos = self.resolve_book_infos().await?;
        *self.book_infos.lock().expect("infos lock") = Some(infos.clone());
        Ok(infos)
    }

    async fn fetch_page(&self, _index: usize, locator: &str) -> Result<Vec<u8>, PageError> {
        http::get_bytes_with_retry(&self.client, locator, &self.page_headers(), self.max_retries)
            .await
    }

    async fn after_download(&self, outcomes: &[PageOutcome]) -> Result<()> {
        let mut files: Vec<PathBuf> = outcomes
            .iter()
            .filter(|o| o.status.is_satisfied())
            .filter_map(|o| o.final_path.clone())
            .collect();
        if files.is_empty() {
            return Ok(());
        }
        files.sort();
        compose_strip(&files)
    }
}

/// 把一话的分片纵向拼成单张 JPEG，替换掉分片文件。
fn compose_strip(sorted_files: &[PathBuf]) -> Result<()> {
    let mut images = Vec::new();
    let mut max_width = 0u32;
    let mut total_height = 0u32;

    for path in sorted_files {
        match image::open(path) {
            Ok(img) => {
                let (w, h) = img.dimensions();
                max_width = max_width.max(w);
                total_height += h;
                images.push(img);
            }
            Err(err) => warn!("分片打不开 {}: {err}", path.display()),
        }
    }
    if images.is_empty() {
        return Ok(());
    }

    let mut composite = RgbImage::new(max_width, total_height);
    let mut y_offset = 0i64;
    for img in &images {
        // 窄分片水平居中
        let x_offset = ((max_width - img.width()) / 2) as i64;
        imageops::replace(&mut composite, &img.to_rgb8(), x_offset, y_offset);
        y_offset += img.height() as i64;
    }

    let first = &sorted_files[0];
    let stem = first.with_extension("");
    let composite_path = PathBuf::from(format!("{}_composite.jpg", stem.to_string_lossy()));
    {
        let file = fs::File::create(&composite_path)
            .with_context(|| format!("create {}", composite_path.display()))?;
        let mut writer = std::io::BufWriter::new(file);
        let mut encoder = JpegEncoder::new_with_quality(&mut writer, 100);
        encoder.encode(
            &composite,
            composite.width(),
            composite.height(),
            ExtendedColorType::Rgb8,
        )?;
    }

    for path in sorted_files {
        if let Err(err) = fs::remove_file(path) {
            warn!("分片删除失败 {}: {err}", path.display());
        }
    }

    let final_path = PathBuf::from(format!("{}.jpg", stem.to_string_lossy()));
    if final_path.exists() {
        fs::remove_file(&final_path)
            .with_context(|| format!("remove {}", final_path.display()))?;
    }
    fs::rename(&composite_path, &final_path).with_context(|| {
        format!(
            "rename {} -> {}",
            composite_path.display(),
            final_path.display()
        )
    })?;
    info!("条漫拼接完成: {}", final_path.display());
    Ok(())
}

fn capture(text: &str, pattern: &str) -> String {
    Regex::new(pattern)
        .expect("static regex")
        .captures(text)
        .map(|caps| caps[1].to_string())
        .unwrap_or_default()
}
