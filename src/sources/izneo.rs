//! 阅读器型源站解析器。
//!
//! 两种访问方式：普通账号会话（逐页 AES-CBC 加密, 密钥/IV 逐页下发）
//! 与带 `login=cvs&sign=` 签名的直读链接（明文页面）。

use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

use aes::cipher::block_padding::NoPadding;
use aes::cipher::{BlockDecryptMut, KeyIvInit};
use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use regex::Regex;
use reqwest::Client;
use reqwest::header::{COOKIE, HeaderMap, HeaderValue};
use serde_json::Value;
use tracing::{debug, warn};

use crate::base_system::context::Config;
use crate::base_system::http::{self, PageError};
use crate::comic::book_infos::{BookInfos, ReadDirection};

use super::{SourceResolver, clean_attribute};

const URL_PATTERNS: [&str; 3] = [
    r"^https://reader\.izneo\.com/read/(\d+)(\?exiturl=.+)?",
    r"^https://www\.izneo\.com/(.+?)/(.+?)/(.+?)/(.+?)-(\d+)/(.+)-(\d+)",
    r"^https://www\.izneo\.com/(.+?)/(.+?)/(.+?)(\?exiturl=.+)?",
];

const SESSION_COOKIE_NAME: &str = "c03aab1711dbd2a02ea11200dde3e3d1";
const CACHE_FILE: &str = "izneo.cache";

pub struct Izneo {
    url: String,
    client: Client,
    max_retries: u32,
    cache_file: PathBuf,
    authentication_from_cache: bool,
    // 从 URL 一次性解出, 实例生命周期内不变
    book_id: String,
    signature: String,
    session_cookie: Mutex<String>,
    book_infos: Mutex<Option<BookInfos>>,
}

impl Izneo {
    pub fn is_valid_url(url: &str) -> bool {
        URL_PATTERNS
            .iter()
            .any(|p| Regex::new(p).expect("static regex").is_match(url))
    }

    pub fn new(url: &str, config: &Config) -> Result<Self> {
        let url = clean_url(url);
        let book_id = extract_book_id(&url);
        let signature = extract_signature(&url);
        Ok(Self {
            url,
            client: http::build_client(config)?,
            max_retries: config.max_retries,
            cache_file: config.cache_dir().join(CACHE_FILE),
            authentication_from_cache: config.authentication_from_cache,
            book_id,
            signature,
            session_cookie: Mutex::new(String::new()),
            book_infos: Mutex::new(None),
        })
    }

    fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        let cookie = self.session_cookie.lock().expect("cookie lock").clone();
        if !cookie.is_empty() {
            if let Ok(value) = HeaderValue::from_str(&cookie) {
                headers.insert(COOKIE, value);
            }
        }
        headers
    }

    fn session_id_from_prompt(&self) -> Result<String> {
        let mut session_id = String::new();
        while session_id.trim().is_empty() {
            print!("Session ID (cookie \"{SESSION_COOKIE_NAME}\"): ");
            std::io::stdout().flush().ok();
            session_id.clear();
            std::io::stdin()
                .read_line(&mut session_id)
                .context("read session id")?;
        }
        let session_id = session_id.trim().to_string();
        if let Some(parent) = self.cache_file.parent() {
            fs::create_dir_all(parent).ok();
        }
        fs::write(&self.cache_file, &session_id)
            .with_context(|| format!("write {}", self.cache_file.display()))?;
        Ok(session_id)
    }

    fn session_id_from_cache(&self) -> Result<String> {
        match fs::read_to_string(&self.cache_file) {
            Ok(cached) if !cached.trim().is_empty() => Ok(cached.trim().to_string()),
            _ => self.session_id_from_prompt(),
        }
    }

    async fn resolve_book_infos(&self) -> Result<BookInfos> {
        debug!("解析书籍: {} (book_id={})", self.url, self.book_id);
        let sign = &self.signature;
        let info_url = if sign.is_empty() {
            format!("https://www.izneo.com/book/{}", self.book_id)
        } else {
            format!("https://www.izneo.com/book/{}?{}", self.book_id, sign)
        };
        let bytes = http::get_bytes_with_retry(&self.client, &info_url, &self.headers(), self.max_retries)
            .await
            .map_err(|e| anyhow!("fetch book infos: {e}"))?;
        let body: Value = serde_json::from_slice(&bytes).context("book infos json")?;
        let mut data = body
            .get("data")
            .cloned()
            .ok_or_else(|| anyhow!("book infos payload has no data"))?;

        // 签名直读链接: 真实页数藏在阅读器页面里
        if !sign.is_empty() {
            let reader_url = format!("https://reader.izneo.com/read/{}", self.book_id);
            if let Ok(page) =
                http::get_bytes_with_retry(&self.client, &reader_url, &self.headers(), self.max_retries).await
            {
                let text = String::from_utf8_lossy(&page);
                let re = Regex::new(r"unrestrictedBoardsCount\s+=\s*(\d+)\s*;").expect("static regex");
                if let (Some(caps), Some(obj)) = (re.captures(&text), data.as_object_mut()) {
                    let total: usize = caps[1].parse().unwrap_or(0);
                    debug!("签名链接可读 {} 页", total);
                    obj.insert("nbPage".to_string(), Value::from(total));
                    obj.insert("state".to_string(), Value::from("signed"));
                    obj.insert(
                        "pages".to_string(),
                        Value::Array((0..total).map(Value::from).collect()),
                    );
                }
            }
        }

        let pages_value = data.get("pages").cloned().unwrap_or(Value::Array(Vec::new()));
        let page_count = pages_value.as_array().map(|a| a.len()).unwrap_or(0);
        let page_locators: Vec<String> = (0..page_count)
            .map(|page_num| {
                if sign.is_empty() {
                    format!(
                        "https://www.izneo.com/book/{}/{}?type=full",
                        self.book_id, page_num
                    )
                } else {
                    format!(
                        "https://reader.izneo.com/read/{}/{}?quality=HD&{}",
                        self.book_id, page_num, sign
                    )
                }
            })
            .collect();

        let read_direction = if data.get("readDirection").and_then(Value::as_str) == Some("rtl") {
            ReadDirection::RightToLeft
        } else {
            ReadDirection::LeftToRight
        };

        let mut custom_fields = std::collections::HashMap::new();
        custom_fields.insert("pages".to_string(), pages_value);
        custom_fields.insert(
            "state".to_string(),
            data.get("state").cloned().unwrap_or(Value::from("")),
        );

        Ok(BookInfos {
            title: clean_attribute(str_field(&data, "title")),
            subtitle: clean_attribute(str_field(&data, "subtitle")),
            pages: num_field(&data, "nbPage"),
            volume: str_field(&data, "volume").to_string(),
            chapter: str_field(&data, "chapter").to_string(),
            serie: str_field(&data, "serie_name").to_string(),
            genre: str_field(&data, "gender_name").to_string(),
            language: str_field(&data, "userLang").to_string(),
            description: str_field(&data, "synopsis").to_string(),
            read_direction,
            page_locators,
            custom_fields,
            ..Default::default()
        })
    }
}

#[async_trait]
impl SourceResolver for Izneo {
    async fn authenticate(&self) -> Result<()> {
        let session_id = if self.authentication_from_cache {
            self.session_id_from_cache()?
        } else {
            self.session_id_from_prompt()?
        };
        let cookie = format!("lang=fr; {SESSION_COOKIE_NAME}={session_id}");
        *self.session_cookie.lock().expect("cookie lock") = cookie;
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

    async fn fetch_page(&self, _index: usize, locator: &str) -> Result<Vec<u8>, PageError> {
        http::get_bytes_with_retry(&self.client, locator, &self.headers(), self.max_retries).await
    }

    fn post_process(&self, raw: Vec<u8>, index: usize) -> Result<Vec<u8>, PageError> {
        // 签名直读页面是明文
        if !self.signature.is_empty() {
            return Ok(raw);
        }
        let Some(infos) = self.book_infos.lock().expect("infos lock").clone() else {
            return Ok(raw);
        };
        let Some(page) = infos
            .custom_fields
            .get("pages")
            .and_then(Value::as_array)
            .and_then(|pages| pages.get(index))
        else {
            return Ok(raw);
        };
        let key = page.get("key").and_then(Value::as_str).unwrap_or("");
        let iv = page.get("iv").and_then(Value::as_str).unwrap_or("");
        if key.is_empty() || iv.is_empty() {
            return Err(PageError::Unavailable(format!(
                "missing decryption key for page {index}"
            )));
        }
        uncrypt_image(&raw, key, iv)
    }

    async fn before_download(&self) -> Result<bool> {
        let infos = self.get_book_infos().await?;
        if infos.custom_fields.get("state").and_then(Value::as_str) == Some("preview") {
            warn!(
                "当前凭据只能访问预览 ({} 页), 本书跳过",
                infos.pages
            );
            return Ok(false);
        }
        Ok(true)
    }
}

// ── 解密 ────────────────────────────────────────────────────────

/// AES-CBC 整块解密, 密钥与 IV 均为 base64, 不处理填充。
fn uncrypt_image(crypted: &[u8], key_b64: &str, iv_b64: &str) -> Result<Vec<u8>, PageError> {
    let key = BASE64
        .decode(key_b64)
        .map_err(|e| PageError::Unavailable(format!("bad page key: {e}")))?;
    let iv = BASE64
        .decode(iv_b64)
        .map_err(|e| PageError::Unavailable(format!("bad page iv: {e}")))?;

    let mut buf = crypted.to_vec();
    let plain_len = match key.len() {
        16 => decrypt_cbc::<aes::Aes128>(&key, &iv, &mut buf)?,
        24 => decrypt_cbc::<aes::Aes192>(&key, &iv, &mut buf)?,
        32 => decrypt_cbc::<aes::Aes256>(&key, &iv, &mut buf)?,
        other => {
            return Err(PageError::Unavailable(format!(
                "unsupported key length {other}"
            )));
        }
    };
    buf.truncate(plain_len);
    Ok(buf)
}

fn decrypt_cbc<C>(key: &[u8], iv: &[u8], buf: &mut [u8]) -> Result<usize, PageError>
where
    C: aes::cipher::BlockCipher + aes::cipher::KeyInit + aes::cipher::BlockDecrypt,
{
    let decryptor = cbc::Decryptor::<C>::new_from_slices(key, iv)
        .map_err(|e| PageError::Unavailable(format!("bad key/iv length: {e}")))?;
    let plain = decryptor
        .decrypt_padded_mut::<NoPadding>(buf)
        .map_err(|e| PageError::Unavailable(format!("decrypt failed: {e}")))?;
    Ok(plain.len())
}

// ── URL 解析 ────────────────────────────────────────────────────

/// `exiturl=` 参数里的内层 URL 需要重新做百分号编码。
fn clean_url(url: &str) -> String {
    let re = Regex::new(r"exiturl=(.+?)&").expect("static regex");
    if let Some(caps) = re.captures(url) {
        let from = caps.get(1).map(|m| m.as_str()).unwrap_or("");
        let to = quote_plus(from).replace("%25", "%");
        return url.replace(from, &to);
    }
    url.to_string()
}

fn quote_plus(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            b' ' => out.push('+'),
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

fn extract_book_id(url: &str) -> String {
    let mut book_id = String::new();

    // 直读链接
    let reader = Regex::new(r"(.+)reader\.(.+)/read/(.+)").expect("static regex");
    if let Some(caps) = reader.captures(url) {
        book_id = caps[3].to_string();
        if let Some(pos) = book_id.find('?') {
            book_id.truncate(pos);
        }
    }

    // 作品页 / 阅读页
    let mut tmp_url = url;
    if let Some(caps) = Regex::new(r"(.+)/read/(.+)")
        .expect("static regex")
        .captures(url)
    {
        tmp_url = caps.get(1).map(|m| m.as_str()).unwrap_or(url);
    }
    let without_query = tmp_url.split('?').next().unwrap_or(tmp_url);
    if let Some(caps) = Regex::new(r".+-(.+)/read")
        .expect("static regex")
        .captures(without_query)
    {
        book_id = caps[1].to_string();
    } else if let Some(caps) = Regex::new(r".+-([^-/]+)$")
        .expect("static regex")
        .captures(without_query)
    {
        book_id = caps[1].to_string();
    } else if book_id.is_empty() {
        let full_without_query = url.split('?').next().unwrap_or(url);
        if let Some(caps) = Regex::new(r".+/(.+)")
            .expect("static regex")
            .captures(full_without_query)
        {
            book_id = caps[1].to_string();
        }
    }
    book_id
}

fn extract_signature(url: &str) -> String {
    Regex::new(r"(.+)login=cvs&sign=([^&]*)")
        .expect("static regex")
        .captures(url)
        .map(|caps| format!("login=cvs&sign={}", &caps[2]))
        .unwrap_or_default()
}

fn str_field<'a>(data: &'a Value, key: &str) -> &'a str {
    data.get(key).and_then(Value::as_str).unwrap_or("")
}

fn num_field(data: &Value, key: &str) -> usize {
    match data.get(key) {
        Some(Value::Number(n)) => n.as_u64().unwrap_or(0) as usize,
        Some(Value::String(s)) => s.parse().unwrap_or(0),
        _ => 0,
    }
}
