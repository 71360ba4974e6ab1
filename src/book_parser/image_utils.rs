//! 封面图片校验与格式归一化。
//!
//! JPEG / PNG 在确认可解码后原样保留；WebP / GIF 等阅读器支持较差的格式转码为 JPEG。

use image::GenericImageView;
use thiserror::Error;

/// 小于该字节数的图片基本是占位图。
const MIN_COVER_BYTES: usize = 1000;
const JPEG_QUALITY: u8 = 90;
const MAX_COVER_DIMENSION: u32 = 1600;
const DEFAULT_COVER_SIZE: (u32, u32) = (400, 600);

#[derive(Debug, Error)]
pub enum CoverError {
    #[error("封面图片过小（{0} 字节），疑似占位图")]
    TooSmall(usize),
    #[error("封面图片无法解码: {0}")]
    Decode(String),
    #[error("封面图片转码失败: {0}")]
    Encode(String),
}

#[derive(Debug, Clone)]
pub struct CoverImage {
    pub bytes: Vec<u8>,
    pub mime: &'static str,
    pub ext: &'static str,
}

pub(crate) fn sniff_mime_ext(bytes: &[u8]) -> (&'static str, &'static str) {
    if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        return ("image/jpeg", "jpg");
    }
    if bytes.starts_with(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]) {
        return ("image/png", "png");
    }
    if bytes.starts_with(b"GIF8") {
        return ("image/gif", "gif");
    }
    if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        return ("image/webp", "webp");
    }
    ("application/octet-stream", "")
}

pub fn prepare_cover(bytes: &[u8]) -> Result<CoverImage, CoverError> {
    if bytes.len() < MIN_COVER_BYTES {
        return Err(CoverError::TooSmall(bytes.len()));
    }

    let img = image::load_from_memory(bytes).map_err(|e| CoverError::Decode(e.to_string()))?;

    match sniff_mime_ext(bytes) {
        (mime @ ("image/jpeg" | "image/png"), ext) => Ok(CoverImage {
            bytes: bytes.to_vec(),
            mime,
            ext,
        }),
        _ => Ok(CoverImage {
            bytes: to_jpeg(img, JPEG_QUALITY, MAX_COVER_DIMENSION)?,
            mime: "image/jpeg",
            ext: "jpg",
        }),
    }
}

/// 没有可用封面时生成的默认封面：白底、黑框，中部一条由书籍 ID 决定颜色的色带。
pub fn default_cover(book_id: &str) -> Result<CoverImage, CoverError> {
    let (width, height) = DEFAULT_COVER_SIZE;
    let band = band_color(book_id);
    let band_top = height / 3;
    let band_bottom = band_top + height / 6;
    let img = image::RgbImage::from_fn(width, height, |x, y| {
        let border = x < 20 || y < 20 || x >= width - 20 || y >= height - 20;
        let frame = !border && (x < 22 || y < 22 || x >= width - 22 || y >= height - 22);
        if frame {
            image::Rgb([0, 0, 0])
        } else if !border && (band_top..band_bottom).contains(&y) {
            band
        } else {
            image::Rgb([255, 255, 255])
        }
    });
    Ok(CoverImage {
        bytes: to_jpeg(image::DynamicImage::ImageRgb8(img), JPEG_QUALITY, 0)?,
        mime: "image/jpeg",
        ext: "jpg",
    })
}

fn band_color(seed: &str) -> image::Rgb<u8> {
    // FNV-1a
    let mut hash: u32 = 0x811c_9dc5;
    for b in seed.bytes() {
        hash ^= u32::from(b);
        hash = hash.wrapping_mul(0x0100_0193);
    }
    let [r, g, b, _] = hash.to_le_bytes();
    // 压暗一些，白底上更醒目
    image::Rgb([r / 2 + 32, g / 2 + 32, b / 2 + 32])
}

fn to_jpeg(mut img: image::DynamicImage, quality: u8, max_dim: u32) -> Result<Vec<u8>, CoverError> {
    if max_dim > 0 {
        let (w, h) = img.dimensions();
        let longest = w.max(h);
        if longest > max_dim {
            let scale = max_dim as f32 / longest as f32;
            let nw = ((w as f32) * scale).round().max(1.0) as u32;
            let nh = ((h as f32) * scale).round().max(1.0) as u32;
            img = img.resize_exact(nw, nh, image::imageops::FilterType::Lanczos3);
        }
    }

    let rgb = img.to_rgb8();
    let mut out = Vec::new();
    let mut encoder =
        image::codecs::jpeg::JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100));
    encoder
        .encode(
            &rgb,
            rgb.width(),
            rgb.height(),
            image::ExtendedColorType::Rgb8,
        )
        .map_err(|e| CoverError::Encode(e.to_string()))?;
    Ok(out)
}

#[cfg(test)]
pub(crate) fn noisy_png(width: u32, height: u32) -> Vec<u8> {
    let mut seed = 0x2545_f491u32;
    let img = image::RgbImage::from_fn(width, height, |_, _| {
        let mut next = || {
            seed ^= seed << 13;
            seed ^= seed >> 17;
            seed ^= seed << 5;
            (seed & 0xFF) as u8
        };
        image::Rgb([next(), next(), next()])
    });
    let mut out = std::io::Cursor::new(Vec::new());
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut out, image::ImageFormat::Png)
        .unwrap();
    out.into_inner()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn png_cover_is_kept_as_is() {
        let png = noisy_png(48, 64);
        let cover = prepare_cover(&png).unwrap();
        assert_eq!(cover.mime, "image/png");
        assert_eq!(cover.bytes, png);
    }

    #[test]
    fn tiny_or_garbage_images_are_rejected() {
        assert!(matches!(prepare_cover(&[0xFF, 0xD8, 0xFF, 0x00]), Err(CoverError::TooSmall(4))));
        assert!(matches!(prepare_cover(&vec![7u8; 4096]), Err(CoverError::Decode(_))));
    }

    #[test]
    fn conversion_produces_jpeg_and_respects_max_dimension() {
        let img = image::load_from_memory(&noisy_png(80, 40)).unwrap();
        let jpeg = to_jpeg(img, 80, 20).unwrap();
        assert_eq!(sniff_mime_ext(&jpeg).0, "image/jpeg");
        let decoded = image::load_from_memory(&jpeg).unwrap();
        assert_eq!(decoded.dimensions(), (20, 10));
    }

    #[test]
    fn default_cover_is_a_valid_jpeg() {
        let cover = default_cover("7143038691944959011").unwrap();
        assert_eq!(cover.mime, "image/jpeg");
        assert_eq!(sniff_mime_ext(&cover.bytes).0, "image/jpeg");
        let decoded = image::load_from_memory(&cover.bytes).unwrap();
        assert_eq!(decoded.dimensions(), DEFAULT_COVER_SIZE);
        assert_ne!(band_color("1"), band_color("2"));
    }
}
