//! 全局配置结构（Config）与默认值。
//!
//! 该模块同时提供生成 `config.yml` 的字段元信息。

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::config::{ConfigSpec, FieldMeta};

/// 页面图片的目标格式。`Origin` 表示不转码，按源站返回的真实格式落盘。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    Origin,
    Jpeg,
    Webp,
}

impl ImageFormat {
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "origin" => Some(Self::Origin),
            "jpeg" | "jpg" => Some(Self::Jpeg),
            "webp" => Some(Self::Webp),
            _ => None,
        }
    }

    /// 转码目标的文件扩展名；`Origin` 在下载前无法确定扩展名。
    pub fn extension(self) -> Option<&'static str> {
        match self {
            Self::Origin => None,
            Self::Jpeg => Some("jpeg"),
            Self::Webp => Some("webp"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Images,
    Cbz,
    Both,
}

impl OutputFormat {
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "images" => Some(Self::Images),
            "cbz" => Some(Self::Cbz),
            "both" => Some(Self::Both),
            _ => None,
        }
    }

    pub fn wants_cbz(self) -> bool {
        matches!(self, Self::Cbz | Self::Both)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    // 保存配置
    #[serde(default = "default_output_folder")]
    pub output_folder: String,
    #[serde(default = "default_output_filename")]
    pub output_filename: String,
    #[serde(default = "default_image_format")]
    pub image_format: ImageFormat,
    #[serde(default = "default_image_quality")]
    pub image_quality: u8,
    #[serde(default = "default_output_format")]
    pub output_format: OutputFormat,

    // 下载配置
    #[serde(default = "default_pause_sec")]
    pub pause_sec: u64,
    #[serde(default = "default_false")]
    pub continue_from_existing: bool,
    #[serde(default = "default_page_sup_to_grab")]
    pub page_sup_to_grab: usize,
    #[serde(default = "default_nb_page_limit")]
    pub nb_page_limit: usize,

    // 网络配置
    #[serde(default = "default_request_timeout")]
    pub request_timeout: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    // 认证配置
    #[serde(default = "default_cache_folder")]
    pub cache_folder: String,
    #[serde(default = "default_true")]
    pub authentication_from_cache: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            output_folder: default_output_folder(),
            output_filename: default_output_filename(),
            image_format: default_image_format(),
            image_quality: default_image_quality(),
            output_format: default_output_format(),
            pause_sec: default_pause_sec(),
            continue_from_existing: default_false(),
            page_sup_to_grab: default_page_sup_to_grab(),
            nb_page_limit: default_nb_page_limit(),
            request_timeout: default_request_timeout(),
            max_retries: default_max_retries(),
            user_agent: default_user_agent(),
            cache_folder: default_cache_folder(),
            authentication_from_cache: default_true(),
        }
    }
}

impl ConfigSpec for Config {
    const FILE_NAME: &'static str = "config.yml";

    fn fields() -> &'static [FieldMeta] {
        static FIELDS: [FieldMeta; 14] = [
            FieldMeta {
                name: "output_folder",
                description: "下载输出根目录",
            },
            FieldMeta {
                name: "output_filename",
                description: "输出文件名模板, 可用字段如 {title} {volume:2} {subtitle}",
            },
            FieldMeta {
                name: "image_format",
                description: "页面图片格式, 可选: [origin, jpeg, webp]",
            },
            FieldMeta {
                name: "image_quality",
                description: "转码质量 (1-100)",
            },
            FieldMeta {
                name: "output_format",
                description: "输出形式, 可选: [images, cbz, both]",
            },
            FieldMeta {
                name: "pause_sec",
                description: "两次页面请求之间的暂停秒数, 0 表示并发下载",
            },
            FieldMeta {
                name: "continue_from_existing",
                description: "断点续传: 跳过磁盘上已存在的完整页面",
            },
            FieldMeta {
                name: "page_sup_to_grab",
                description: "页数安全余量: 在源站报告的页数之外额外尝试的页数",
            },
            FieldMeta {
                name: "nb_page_limit",
                description: "单本下载的页数硬上限",
            },
            FieldMeta {
                name: "request_timeout",
                description: "请求超时时间（秒）",
            },
            FieldMeta {
                name: "max_retries",
                description: "瞬时网络错误的最大重试次数",
            },
            FieldMeta {
                name: "user_agent",
                description: "HTTP User-Agent",
            },
            FieldMeta {
                name: "cache_folder",
                description: "会话缓存目录",
            },
            FieldMeta {
                name: "authentication_from_cache",
                description: "优先使用缓存的会话凭据进行认证",
            },
        ];
        &FIELDS
    }
}

impl Config {
    pub fn output_dir(&self) -> PathBuf {
        if self.output_folder.trim().is_empty() {
            PathBuf::from("DOWNLOADS")
        } else {
            PathBuf::from(&self.output_folder)
        }
    }

    pub fn cache_dir(&self) -> PathBuf {
        if self.cache_folder.trim().is_empty() {
            PathBuf::from(".cache")
        } else {
            PathBuf::from(&self.cache_folder)
        }
    }

    /// 配置了暂停间隔时返回步进式下载的间隔；0 表示并发模式。
    pub fn pacing(&self) -> Option<Duration> {
        if self.pause_sec == 0 {
            None
        } else {
            Some(Duration::from_secs(self.pause_sec))
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout.max(1))
    }
}

fn default_false() -> bool {
    false
}

fn default_true() -> bool {
    true
}

fn default_output_folder() -> String {
    "DOWNLOADS".to_string()
}

fn default_output_filename() -> String {
    "{title} - {volume:2}. {subtitle}".to_string()
}

fn default_image_format() -> ImageFormat {
    ImageFormat::Origin
}

fn default_image_quality() -> u8 {
    100
}

fn default_output_format() -> OutputFormat {
    OutputFormat::Both
}

fn default_pause_sec() -> u64 {
    1
}

fn default_page_sup_to_grab() -> usize {
    20
}

fn default_nb_page_limit() -> usize {
    1000
}

fn default_request_timeout() -> u64 {
    15
}

fn default_max_retries() -> u32 {
    3
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (Windows NT 10.0) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/112.0.0.0 Safari/537.36"
        .to_string()
}

fn default_cache_folder() -> String {
    ".cache".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_format_parse() {
        assert_eq!(ImageFormat::parse("origin"), Some(ImageFormat::Origin));
        assert_eq!(ImageFormat::parse("JPEG"), Some(ImageFormat::Jpeg));
        assert_eq!(ImageFormat::parse("jpg"), Some(ImageFormat::Jpeg));
        assert_eq!(ImageFormat::parse("webp"), Some(ImageFormat::Webp));
        assert_eq!(ImageFormat::parse("bmp"), None);
    }

    #[test]
    fn pacing_zero_means_concurrent() {
        let mut config = Config::default();
        config.pause_sec = 0;
        assert!(config.pacing().is_none());
        config.pause_sec = 2;
        assert_eq!(config.pacing(), Some(Duration::from_secs(2)));
    }

    #[test]
    fn field_meta_covers_every_serialized_key() {
        let value = serde_yaml::to_value(Config::default()).unwrap();
        let mapping = value.as_mapping().unwrap();
        let names: Vec<&str> = Config::fields().iter().map(|f| f.name).collect();
        for key in mapping.keys() {
            let key = key.as_str().unwrap();
            assert!(names.contains(&key), "missing field meta for {key}");
        }
    }
}
