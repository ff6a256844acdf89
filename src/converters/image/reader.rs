//! Image decoding with EXIF-orientation correction, and the encoder
//! chosen by a task's target extension.

use image::{DynamicImage, ImageFormat};

use crate::errors::StoreError;

/// Decode `bytes` and apply any EXIF orientation tag found in a JPEG
/// APP1 segment. Non-JPEG formats have no orientation tag and decode
/// unchanged.
pub fn decode(bytes: &[u8]) -> Result<DynamicImage, StoreError> {
    let img = image::load_from_memory(bytes)?;
    let orientation = jpeg_orientation(bytes);
    Ok(apply_orientation(img, orientation))
}

/// Encode `img` using the format implied by `extension`, defaulting to
/// JPEG for anything unrecognized (png, gif, tiff, bmp, webp are the
/// only other formats this service writes).
pub fn encode(img: &DynamicImage, extension: &str, jpeg_quality: u8) -> Result<Vec<u8>, StoreError> {
    let format = match extension.to_ascii_lowercase().as_str() {
        "png" => ImageFormat::Png,
        "gif" => ImageFormat::Gif,
        "tiff" | "tif" => ImageFormat::Tiff,
        "bmp" => ImageFormat::Bmp,
        "webp" => ImageFormat::WebP,
        _ => ImageFormat::Jpeg,
    };
    let mut buf = std::io::Cursor::new(Vec::new());
    if format == ImageFormat::Jpeg {
        let mut encoder =
            image::codecs::jpeg::JpegEncoder::new_with_quality(&mut buf, jpeg_quality);
        encoder.encode_image(img)?;
    } else {
        img.write_to(&mut buf, format)?;
    }
    Ok(buf.into_inner())
}

/// Minimal EXIF orientation extraction (tag 0x0112 in the `Exif\0\0` TIFF
/// block of a JPEG APP1 marker). Returns 1 (no-op) when absent or the
/// format isn't JPEG.
fn jpeg_orientation(bytes: &[u8]) -> u16 {
    if !bytes.starts_with(b"\xFF\xD8") {
        return 1;
    }
    let mut pos = 2;
    while pos + 4 <= bytes.len() {
        if bytes[pos] != 0xFF {
            break;
        }
        let marker = bytes[pos + 1];
        if marker == 0xD8 || marker == 0xD9 {
            pos += 2;
            continue;
        }
        let seg_len = u16::from_be_bytes([bytes[pos + 2], bytes[pos + 3]]) as usize;
        if marker == 0xE1 && pos + 4 + seg_len <= bytes.len() {
            let seg = &bytes[pos + 4..pos + 2 + seg_len];
            if let Some(o) = parse_exif_orientation(seg) {
                return o;
            }
        }
        if marker == 0xDA {
            break; // start of scan, no more markers
        }
        pos += 2 + seg_len;
    }
    1
}

fn parse_exif_orientation(seg: &[u8]) -> Option<u16> {
    if !seg.starts_with(b"Exif\0\0") {
        return None;
    }
    let tiff = &seg[6..];
    let little_endian = tiff.starts_with(b"II");
    let read_u16 = |b: &[u8], o: usize| -> u16 {
        if little_endian {
            u16::from_le_bytes([b[o], b[o + 1]])
        } else {
            u16::from_be_bytes([b[o], b[o + 1]])
        }
    };
    let read_u32 = |b: &[u8], o: usize| -> u32 {
        if little_endian {
            u32::from_le_bytes([b[o], b[o + 1], b[o + 2], b[o + 3]])
        } else {
            u32::from_be_bytes([b[o], b[o + 1], b[o + 2], b[o + 3]])
        }
    };
    let ifd_offset = read_u32(tiff, 4) as usize;
    if ifd_offset + 2 > tiff.len() {
        return None;
    }
    let entry_count = read_u16(tiff, ifd_offset) as usize;
    for i in 0..entry_count {
        let entry = ifd_offset + 2 + i * 12;
        if entry + 12 > tiff.len() {
            break;
        }
        let tag = read_u16(tiff, entry);
        if tag == 0x0112 {
            return Some(read_u16(tiff, entry + 8));
        }
    }
    None
}

fn apply_orientation(img: DynamicImage, orientation: u16) -> DynamicImage {
    match orientation {
        2 => img.fliph(),
        3 => img.rotate180(),
        4 => img.flipv(),
        5 => img.rotate90().fliph(),
        6 => img.rotate90(),
        7 => img.rotate270().fliph(),
        8 => img.rotate270(),
        _ => img,
    }
}
