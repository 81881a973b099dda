//! 图片编解码：魔数嗅探、格式转换、临时文件归一化。
//!
//! 格式判断永远看字节头，不信扩展名。

use std::fs;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use image::codecs::jpeg::JpegEncoder;
use image::codecs::webp::WebPEncoder;
use image::{DynamicImage, ExtendedColorType};
use tracing::{debug, info, warn};

use crate::base_system::context::ImageFormat;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    Jpeg,
    Png,
    Webp,
    Bmp,
    Gif,
}

impl ImageKind {
    pub fn extension(self) -> &'static str {
        match self {
            Self::Jpeg => "jpeg",
            Self::Png => "png",
            Self::Webp => "webp",
            Self::Bmp => "bmp",
            Self::Gif => "gif",
        }
    }
}

// ── 魔数嗅探 ────────────────────────────────────────────────────

pub fn detect_format(bytes: &[u8]) -> Option<ImageKind> {
    if bytes.len() >= 3 && bytes[0] == 0xFF && bytes[1] == 0xD8 && bytes[2] == 0xFF {
        return Some(ImageKind::Jpeg);
    }
    if bytes.len() >= 8 && bytes[..8] == [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A] {
        return Some(ImageKind::Png);
    }
    if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        return Some(ImageKind::Webp);
    }
    if bytes.len() >= 3 && &bytes[0..3] == b"GIF" {
        return Some(ImageKind::Gif);
    }
    if bytes.len() >= 2 && &bytes[0..2] == b"BM" {
        return Some(ImageKind::Bmp);
    }
    None
}

// ── 编码 ────────────────────────────────────────────────────────

fn encode_to_file(img: &DynamicImage, dest: &Path, target: ImageFormat, quality: u8) -> Result<()> {
    let file = fs::File::create(dest)
        .with_context(|| format!("create {}", dest.display()))?;
    let mut writer = BufWriter::new(file);
    match target {
        ImageFormat::Jpeg => {
            let rgb = img.to_rgb8();
            let q = quality.clamp(1, 100);
            let mut encoder = JpegEncoder::new_with_quality(&mut writer, q);
            encoder.encode(&rgb, rgb.width(), rgb.height(), ExtendedColorType::Rgb8)?;
        }
        ImageFormat::Webp => {
            // image 0.25 的 WebP 编码只有无损模式，quality 仅作用于 JPEG
            let rgba = img.to_rgba8();
            let encoder = WebPEncoder::new_lossless(&mut writer);
            encoder.encode(&rgba, rgba.width(), rgba.height(), ExtendedColorType::Rgba8)?;
        }
        ImageFormat::Origin => return Err(anyhow!("origin is not an encode target")),
    }
    Ok(())
}

/// 把一个已存在的图片文件转码成目标格式。
///
/// 目标路径与源路径相同则原样返回；转码成功且目标非空后删除源文件。
pub fn convert(input: &Path, target: ImageFormat, quality: u8) -> Result<PathBuf> {
    let Some(ext) = target.extension() else {
        return Ok(input.to_path_buf());
    };
    let dest = input.with_extension(ext);
    if dest == input {
        return Ok(dest);
    }

    let bytes = fs::read(input).with_context(|| format!("read {}", input.display()))?;
    let img = image::load_from_memory(&bytes)
        .with_context(|| format!("decode {}", input.display()))?;
    encode_to_file(&img, &dest, target, quality)?;

    let done = fs::metadata(&dest).map(|m| m.len() > 0).unwrap_or(false);
    if done {
        fs::remove_file(input).with_context(|| format!("remove {}", input.display()))?;
    } else {
        return Err(anyhow!("conversion produced empty file: {}", dest.display()));
    }
    Ok(dest)
}

/// 把刚写完的 `.tmp` 页面文件归一化为最终产物。
///
/// 目标为 `Origin` 时只按探测到的真实格式改名；否则按目标格式转码并删除
/// 临时文件。最终路径上已有的旧文件先删掉，保证每页至多一个产物。
pub fn normalize(tmp_path: &Path, target: ImageFormat, quality: u8) -> Result<PathBuf> {
    let bytes = fs::read(tmp_path).with_context(|| format!("read {}", tmp_path.display()))?;
    let kind = detect_format(&bytes)
        .ok_or_else(|| anyhow!("unrecognized image data in {}", tmp_path.display()))?;

    let final_ext = target.extension().unwrap_or(kind.extension());
    let final_path = tmp_path.with_extension(final_ext);
    if final_path.exists() {
        fs::remove_file(&final_path)
            .with_context(|| format!("remove stale {}", final_path.display()))?;
    }

    match target {
        ImageFormat::Origin => {
            fs::rename(tmp_path, &final_path).with_context(|| {
                format!("rename {} -> {}", tmp_path.display(), final_path.display())
            })?;
        }
        _ => {
            let img = image::load_from_memory(&bytes)
                .with_context(|| format!("decode {}", tmp_path.display()))?;
            encode_to_file(&img, &final_path, target, quality)?;
            fs::remove_file(tmp_path)
                .with_context(|| format!("remove {}", tmp_path.display()))?;
        }
    }
    debug!("归一化完成: {}", final_path.display());
    Ok(final_path)
}

/// 把目录里的页面图片统一转码成目标格式（`pack`/`process` 的后置转换）。
pub fn convert_folder(dir: &Path, target: ImageFormat, quality: u8) -> Result<Vec<PathBuf>> {
    if target == ImageFormat::Origin {
        info!("目标格式为 origin, 无需转换");
        return Ok(Vec::new());
    }
    info!("开始转换 {} 下的图片 (quality: {})", dir.display(), quality);

    let mut converted = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("read dir {}", dir.display()))? {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        let ext = path
            .extension()
            .and_then(|s| s.to_str())
            .map(|s| s.to_ascii_lowercase())
            .unwrap_or_default();
        if !matches!(ext.as_str(), "jpg" | "jpeg" | "png" | "webp" | "bmp") {
            continue;
        }
        match convert(&path, target, quality) {
            Ok(dest) => converted.push(dest),
            Err(err) => warn!("转换失败 {}: {err:#}", path.display()),
        }
    }
    info!("{} 张图片转换完成", converted.len());
    Ok(converted)
}
