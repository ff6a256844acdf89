//! The `image` family converter: `image.validate-size`, `image.resize`,
//! `image.fit`, `image.fill`, `image.blur`, `image.sharpen`,
//! `image.gamma`, `image.contrast`, `image.brightness`,
//! `image.extract-colors`, `image.base64`, `image.save`.
//!
//! The source bytes are decoded once per task, on the first action, and
//! the resulting `DynamicImage` is carried between actions via the
//! input's scratch slot rather than round-tripped through bytes. Every
//! action but `image.save` mutates that buffer in place and reports
//! `Skip` so the engine leaves the byte stream untouched; `image.save`
//! is the terminator that encodes the accumulated buffer per the task's
//! target extension and commits it as the output bytes.

mod processors;
mod reader;

use std::collections::HashMap;

use image::DynamicImage;
use processors::ImageAction;

use crate::{
    converters::{Converter, ConverterRegistry, Input, Output, ProcessOutcome},
    errors::StoreError,
    model::manifest::Action,
    model::object::ObjectType,
};

pub fn register_defaults(registry: &mut ConverterRegistry) {
    registry.register(Box::new(ImageConverter::with_builtins()));
}

pub struct ImageConverter {
    processors: HashMap<&'static str, Box<dyn ImageAction>>,
}

impl ImageConverter {
    pub fn with_builtins() -> Self {
        let mut processors: HashMap<&'static str, Box<dyn ImageAction>> = HashMap::new();
        let builtins: Vec<Box<dyn ImageAction>> = vec![
            Box::new(processors::SizeValidator),
            Box::new(processors::Resize),
            Box::new(processors::Fit),
            Box::new(processors::Fill),
            Box::new(processors::Blur),
            Box::new(processors::Sharpen),
            Box::new(processors::Gamma),
            Box::new(processors::Contrast),
            Box::new(processors::Brightness),
            Box::new(processors::ExtractColors),
            Box::new(processors::Base64Preview),
            Box::new(processors::Save),
        ];
        for p in builtins {
            processors.insert(
                match p.name() {
                    "image.validate-size" => "image.validate-size",
                    "image.resize" => "image.resize",
                    "image.fit" => "image.fit",
                    "image.fill" => "image.fill",
                    "image.blur" => "image.blur",
                    "image.sharpen" => "image.sharpen",
                    "image.gamma" => "image.gamma",
                    "image.contrast" => "image.contrast",
                    "image.brightness" => "image.brightness",
                    "image.extract-colors" => "image.extract-colors",
                    "image.base64" => "image.base64",
                    "image.save" => "image.save",
                    other => panic!("unregistered image action name {other}"),
                },
                p,
            );
        }
        Self { processors }
    }
}

impl Converter for ImageConverter {
    fn name(&self) -> &str {
        "image"
    }

    fn test(&self, action: &Action) -> bool {
        self.processors.contains_key(action.name.as_str())
    }

    fn process(&self, input: &mut Input, output: &mut Output) -> Result<ProcessOutcome, StoreError> {
        let mut img = match input.take_scratch::<DynamicImage>() {
            Some(img) => img,
            None => {
                let bytes = input.read_all()?;
                reader::decode(&bytes)?
            }
        };

        let action = input.action().clone();
        let processor = self
            .processors
            .get(action.name.as_str())
            .ok_or_else(|| StoreError::NoConvertersForTask(input.task().id.clone()))?;
        processor.apply(&mut img, &action)?;

        match action.name.as_str() {
            "image.extract-colors" => {
                let hex = processors::ExtractColors::average_hex(&img);
                output
                    .meta_mut()
                    .set_ext("colors", serde_json::json!({ "average": hex }));
            }
            "image.base64" => {
                let target_field = action.value_string("target-meta", "base64");
                let content_type = if input.task().target.ends_with(".png") {
                    "image/png"
                } else {
                    "image/jpeg"
                };
                let quality = action.value_i64("jpeg.quality", 85) as u8;
                let uri = processors::Base64Preview::data_uri(&img, content_type, quality)?;
                output
                    .meta_mut()
                    .set_ext(&target_field, serde_json::Value::String(uri));
            }
            _ => {}
        }

        if action.name == "image.save" {
            let extension = extension_for_target(&input.task().target, &input.source_meta().content_type);
            let quality = action.value_i64("jpeg.quality", 85) as u8;
            let encoded = reader::encode(&img, &extension, quality)?;
            let (w, h) = (img.width(), img.height());
            let meta = output.meta_mut();
            meta.width = w;
            meta.height = h;
            meta.object_type = ObjectType::Image;
            meta.name_ext = extension.clone();
            meta.content_type = content_type_for_extension(&extension).to_string();
            output.set_output(encoded);
            Ok(ProcessOutcome::Written)
        } else {
            input.put_scratch(img);
            Ok(ProcessOutcome::Skip)
        }
    }
}

/// The extension to encode the task's final output under: the target
/// name's own extension if it has one, else the extension conventionally
/// associated with the source item's content type.
fn extension_for_target(target: &str, source_content_type: &str) -> String {
    if let Some(ext) = target.rsplit('.').next().filter(|e| *e != target) {
        return ext.to_ascii_lowercase();
    }
    match crate::utils::extension_for_content_type(source_content_type) {
        "bin" => "jpg".to_string(),
        ext => ext.to_string(),
    }
}

fn content_type_for_extension(ext: &str) -> &'static str {
    match ext {
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        "tiff" => "image/tiff",
        _ => "image/jpeg",
    }
}
