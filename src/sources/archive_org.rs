//! 借阅型源站解析器。
//!
//! 下载前要先"借出"，下载后归还；页面前 1KiB 可能按
//! `x-obfuscate` 响应头做了 AES-CTR 混淆，密钥由页面 URI 路径的
//! SHA-1 派生。

use std::collections::HashMap;
use std::io::Write;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use aes::Aes128;
use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use ctr::Ctr128BE;
use ctr::cipher::{KeyIvInit, StreamCipher};
use regex::Regex;
use reqwest::Client;
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue, REFERER};
use serde_json::Value;
use sha1::{Digest, Sha1};
use tracing::{info, warn};

use crate::base_system::context::Config;
use crate::base_system::http::{self, PageError};
use crate::comic::book_infos::{BookInfos, ReadDirection};
use crate::download::models::PageOutcome;

use super::{SourceResolver, clean_attribute};

const URL_PATTERN: &str = r"^https://archive\.org/details/.*";
const LOAN_URL: &str = "https://archive.org/services/loans/loan/";
const ROOT: &str = "https://archive.org/";

/// 混淆解密只覆盖响应体的前 1024 字节。
const DECRYPT_SIZE: usize = 1024;

pub struct ArchiveOrg {
    url: String,
    client: Client,
    max_retries: u32,
    book_infos: Mutex<Option<BookInfos>>,
    /// fetch_page 记录的逐页 `x-obfuscate` 头, post_process 按页取用。
    obfuscation: Mutex<HashMap<usize, String>>,
}

impl ArchiveOrg {
    pub fn is_valid_url(url: &str) -> bool {
        Regex::new(URL_PATTERN).expect("static regex").is_match(url)
    }

    pub fn new(url: &str, config: &Config) -> Result<Self> {
        Ok(Self {
            url: url.to_string(),
            client: http::build_client(config)?,
            max_retries: config.max_retries,
            book_infos: Mutex::new(None),
            obfuscation: Mutex::new(HashMap::new()),
        })
    }

    fn page_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(REFERER, HeaderValue::from_static(ROOT));
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("image/avif,image/webp,image/apng,image/*,*/*;q=0.8"),
        );
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
        .map_err(|e| anyhow!("fetch details page: {e}"))?;
        let text = String::from_utf8_lossy(&bytes);

        let re = Regex::new(r#""url":"(.*?)""#).expect("static regex");
        let caps = re
            .captures(&text)
            .ok_or_else(|| anyhow!("book infos url not found in details page"))?;
        let infos_url = format!("https:{}", caps[1].replace("\\u0026", "&"));

        let bytes = http::get_bytes_with_retry(
            &self.client,
            &infos_url,
            &HeaderMap::new(),
            self.max_retries,
        )
        .await
        .map_err(|e| anyhow!("fetch book infos: {e}"))?;
        let body: Value = serde_json::from_slice(&bytes).context("book infos json")?;
        let data = body
            .get("data")
            .cloned()
            .ok_or_else(|| anyhow!("book infos payload has no data"))?;

        let br_options = data.get("brOptions").cloned().unwrap_or(Value::Null);
        let metadata = data.get("metadata").cloned().unwrap_or(Value::Null);

        let page_locators: Vec<String> = br_options
            .get("data")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_array)
                    .flatten()
                    .filter_map(|page| page.get("uri").and_then(Value::as_str))
                    .map(|uri| format!("{uri}&rotate=0&scale=0"))
                    .collect()
            })
            .unwrap_or_default();

        let read_direction =
            if br_options.get("pageProgression").and_then(Value::as_str) == Some("rl") {
                ReadDirection::RightToLeft
            } else {
                ReadDirection::LeftToRight
            };

        let mut custom_fields = HashMap::new();
        custom_fields.insert(
            "book_id".to_string(),
            br_options.get("bookId").cloned().unwrap_or(Value::from("")),
        );
        custom_fields.insert("metadata".to_string(), metadata.clone());

        Ok(BookInfos {
            title: clean_attribute(
                br_options
                    .get("bookTitle")
                    .and_then(Value::as_str)
                    .unwrap_or(""),
            ),
            pages: page_locators.len(),
            authors: meta_str(&metadata, "creator"),
            genre: meta_str(&metadata, "subject"),
            language: meta_str(&metadata, "language"),
            description: meta_str(&metadata, "description"),
            read_direction,
            page_locators,
            custom_fields,
            ..Default::default()
        })
    }

    fn book_id(&self) -> String {
        self.book_infos
            .lock()
            .expect("infos lock")
            .as_ref()
            .and_then(|infos| infos.custom_fields.get("book_id"))
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string()
    }

    async fn loan(&self) -> Result<()> {
        let book_id = self.book_id();
        if book_id.is_empty() {
            return Err(anyhow!("no book id to loan"));
        }

        let response = self
            .client
            .post(format!("{LOAN_URL}searchInside.php"))
            .form(&[("action", "grant_access"), ("identifier", book_id.as_str())])
            .send()
            .await
            .context("grant_access")?;
        if !response.status().is_success() {
            warn!("grant_access 失败: http {}", response.status().as_u16());
        }

        let boundary = multipart_boundary();
        let body = data_to_boundary(
            &boundary,
            &[("action", "browse_book"), ("identifier", &book_id)],
        );
        let response = self
            .client
            .post(LOAN_URL)
            .header(
                "Content-Type",
                format!("multipart/form-data; boundary={boundary}"),
            )
            .body(body)
            .send()
            .await
            .context("browse_book")?;
        if response.status().as_u16() == 401 {
            return Err(anyhow!("loan rejected: session expired"));
        }

        let body = data_to_boundary(
            &boundary,
            &[("action", "create_token"), ("identifier", &book_id)],
        );
        let response = self
            .client
            .post(LOAN_URL)
            .header(
                "Content-Type",
                format!("multipart/form-data; boundary={boundary}"),
            )
            .body(body)
            .send()
            .await
            .context("create_token")?;
        let text = response.text().await.unwrap_or_default();
        if text.contains("token") {
            // 借出后可读页数会变, 重新解析一次元数据
            *self.book_infos.lock().expect("infos lock") = None;
            let infos = self.resolve_book_infos().await?;
            info!("借出成功: {}", infos.title);
            *self.book_infos.lock().expect("infos lock") = Some(infos);
        }
        Ok(())
    }

    async fn return_loan(&self) -> Result<()> {
        let book_id = self.book_id();
        if book_id.is_empty() {
            return Ok(());
        }
        let response = self
            .client
            .post(LOAN_URL)
            .form(&[("action", "return_loan"), ("identifier", book_id.as_str())])
            .send()
            .await
            .context("return_loan")?;
        if response.status().is_success() {
            info!("已归还借阅: {book_id}");
        }
        Ok(())
    }

    async fn login(&self, email: &str, password: &str) -> Result<()> {
        let boundary = multipart_boundary();
        let body = data_to_boundary(
            &boundary,
            &[
                ("username", email),
                ("password", password),
                ("submit_by_js", "true"),
            ],
        );
        let response = self
            .client
            .post("https://archive.org/account/login")
            .header(
                "Content-Type",
                format!("multipart/form-data; boundary={boundary}"),
            )
            .body(body)
            .send()
            .await
            .context("login")?;
        if !response.status().is_success() {
            return Err(anyhow!("login failed: http {}", response.status().as_u16()));
        }
        Ok(())
    }
}

#[async_trait]
impl SourceResolver for ArchiveOrg {
    async fn authenticate(&self) -> Result<()> {
        let email = prompt("Email: ")?;
        let password = prompt("Password: ")?;
        // 第一次登录只换到初始 cookie, 要再登一次会话才生效
        self.login(&email, &password).await?;
        self.login(&email, &password).await?;
        Ok(())
    }

    async fn get_book_infos(&self) -> Result<BookInfos> {
        if let Some(infos) = self.book_infos.lock().expect("infos lock").clone() {
            return Ok(infos);
        }
        let infos = self.resolve_book_infos().await?;
        *self.book_infos.lock().expect("infos lock") = Some(infos.clone());
        Ok(infos)
    }

    async fn fetch_page(&self, index: usize, locator: &str) -> Result<Vec<u8>, PageError> {
        let (bytes, headers) = http::get_response_with_retry(
            &self.client,
            locator,
            &self.page_headers(),
            self.max_retries,
        )
        .await?;
        if let Some(header) = headers.get("x-obfuscate").and_then(|v| v.to_str().ok()) {
            self.obfuscation
                .lock()
                .expect("obfuscation lock")
                .insert(index, header.to_string());
        }
        Ok(bytes)
    }

    fn post_process(&self, raw: Vec<u8>, index: usize) -> Result<Vec<u8>, PageError> {
        let Some(header) = self
            .obfuscation
            .lock()
            .expect("obfuscation lock")
            .get(&index)
            .cloned()
        else {
            return Ok(raw);
        };

        let (version, counter_b64) = header
            .split_once('|')
            .ok_or_else(|| PageError::Unavailable(format!("bad obfuscation header: {header}")))?;
        if version != "1" {
            return Err(PageError::Unavailable(format!(
                "unsupported obfuscation version: {version}"
            )));
        }

        let locator = self
            .book_infos
            .lock()
            .expect("infos lock")
            .as_ref()
            .and_then(|infos| infos.page_locators.get(index).cloned())
            .ok_or_else(|| PageError::Unavailable(format!("no locator for page {index}")))?;

        deobfuscate(&raw, &locator, counter_b64)
    }

    async fn before_download(&self) -> Result<bool> {
        self.loan().await?;
        Ok(true)
    }

    async fn after_download(&self, _outcomes: &[PageOutcome]) -> Result<()> {
        self.return_loan().await
    }
}

// ── 解混淆 ──────────────────────────────────────────────────────

/// AES-CTR 解开前 1KiB：密钥取页面 URI 路径 SHA-1 的前 16 字节，
/// 计数器来自 `x-obfuscate` 头的 base64。
fn deobfuscate(buffer: &[u8], page_url: &str, counter_b64: &str) -> Result<Vec<u8>, PageError> {
    if buffer.len() < DECRYPT_SIZE {
        return Err(PageError::Unavailable(format!(
            "obfuscated image too small ({} bytes)",
            buffer.len()
        )));
    }

    let aes_key = url_path_key(page_url);
    let mut hasher = Sha1::new();
    hasher.update(aes_key.as_bytes());
    let digest = hasher.finalize();
    let key = &digest[..16];

    let counter = BASE64
        .decode(counter_b64)
        .map_err(|e| PageError::Unavailable(format!("bad obfuscation counter: {e}")))?;
    if counter.len() != 16 {
        return Err(PageError::Unavailable(format!(
            "obfuscation counter length {} (expected 16)",
            counter.len()
        )));
    }

    let mut fragment = buffer[..DECRYPT_SIZE].to_vec();
    let mut cipher = Ctr128BE::<Aes128>::new_from_slices(key, &counter)
        .map_err(|e| PageError::Unavailable(format!("bad cipher params: {e}")))?;
    cipher.apply_keystream(&mut fragment);

    let mut out = fragment;
    out.extend_from_slice(&buffer[DECRYPT_SIZE..]);
    Ok(out)
}

/// 取 URL 的路径部分（含 query），前面带 `/`。
fn url_path_key(url: &str) -> String {
    let parts: Vec<&str> = url.splitn(4, '/').collect();
    format!("/{}", parts.get(3).copied().unwrap_or(""))
}

fn meta_str(metadata: &Value, key: &str) -> String {
    match metadata.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .collect::<Vec<_>>()
            .join(", "),
        _ => String::new(),
    }
}

fn multipart_boundary() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    format!("----WebKitFormBoundary{nanos:x}")
}

fn data_to_boundary(boundary: &str, data: &[(&str, &str)]) -> String {
    let mut body = Vec::new();
    for (key, value) in data {
        body.push(format!("--{boundary}"));
        body.push(format!("Content-Disposition: form-data; name=\"{key}\""));
        body.push(String::new());
        body.push((*value).to_string());
    }
    format!("{}\r\n--{boundary}--\r\n", body.join("\r\n"))
}

fn prompt(label: &str) -> Result<String> {
    let mut value = String::new();
    while value.trim().is_empty() {
        print!("{label}");
        std::io::stdout().flush().ok();
        value.clear();
        std::io::stdin().read_line(&mut value).context("read input")?;
    }
    Ok(value.trim().to_string())
}
