//! Mills: deterministic content transforms
//!
//! A mill is the first stage of file ingest. Each mill carries an identity,
//! an encryption flag, a pin flag, an accept-media predicate, an options
//! normaliser, and the transform itself. The canonical encoded options
//! participate in the source-level dedup key, so encoding must be stable:
//! sorted-key JSON.
//!
//! Built-ins: schema passthrough, blob passthrough, image resizer, image
//! metadata extractor.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::node::NodeError;

/// Options handed to a mill
#[derive(Debug, Clone, Default)]
pub struct MillOpts {
    /// Skip encryption for this file
    pub plaintext: bool,
    /// Mill-specific options
    pub extra: BTreeMap<String, Value>,
}

impl MillOpts {
    pub fn plaintext(value: bool) -> Self {
        Self {
            plaintext: value,
            extra: BTreeMap::new(),
        }
    }
}

/// Output of a mill transform
#[derive(Debug, Clone)]
pub struct MillResult {
    pub bytes: Vec<u8>,
    /// Transform-produced metadata, if any
    pub meta: Option<Value>,
}

/// A deterministic content transform
pub trait Mill: Send + Sync {
    /// Stable mill identity, e.g. `/blob`
    fn id(&self) -> &'static str;

    /// Whether outputs are encrypted by default
    fn encrypt(&self) -> bool {
        true
    }

    /// Whether outputs are pinned in the object store
    fn pin(&self) -> bool {
        false
    }

    /// Reject unsupported media types
    fn accept_media(&self, media: &str) -> Result<(), NodeError>;

    /// Canonical encoded options: sorted-key JSON over the plaintext flag
    /// plus mill-specific extras
    fn options(&self, opts: &MillOpts) -> String {
        let mut map = opts.extra.clone();
        map.insert("plaintext".to_string(), Value::Bool(opts.plaintext));
        serde_json::to_string(&map).unwrap_or_default()
    }

    /// Apply the transform
    fn mill(&self, input: &[u8], name: &str) -> Result<MillResult, NodeError>;
}

/// Sniff a payload's media type from magic bytes
pub fn detect_media(data: &[u8]) -> String {
    if data.starts_with(&[0xFF, 0xD8, 0xFF]) {
        return "image/jpeg".to_string();
    }
    if data.starts_with(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]) {
        return "image/png".to_string();
    }
    if data.starts_with(b"GIF87a") || data.starts_with(b"GIF89a") {
        return "image/gif".to_string();
    }
    let trimmed = data.iter().position(|b| !b.is_ascii_whitespace());
    if let Some(i) = trimmed {
        if data[i] == b'{' || data[i] == b'[' {
            if serde_json::from_slice::<Value>(data).is_ok() {
                return "application/json".to_string();
            }
        }
    }
    if std::str::from_utf8(data).is_ok() {
        return "text/plain".to_string();
    }
    "application/octet-stream".to_string()
}

// ============ Schema mill ============

/// Validating JSON passthrough for schema documents.
///
/// Schemas describe how files compose into directory DAGs; they are shared
/// plaintext and pinned.
#[derive(Debug, Default)]
pub struct SchemaMill;

impl Mill for SchemaMill {
    fn id(&self) -> &'static str {
        "/schema"
    }

    fn encrypt(&self) -> bool {
        false
    }

    fn pin(&self) -> bool {
        true
    }

    fn accept_media(&self, media: &str) -> Result<(), NodeError> {
        if media == "application/json" {
            Ok(())
        } else {
            Err(NodeError::InvalidInput(format!(
                "schema mill rejects media type {}",
                media
            )))
        }
    }

    fn mill(&self, input: &[u8], _name: &str) -> Result<MillResult, NodeError> {
        let value: Value = serde_json::from_slice(input)
            .map_err(|e| NodeError::InvalidInput(format!("invalid schema json: {}", e)))?;
        // Re-serialise so equivalent documents mill to identical bytes
        let bytes = serde_json::to_vec(&value)
            .map_err(|e| NodeError::InvalidInput(e.to_string()))?;
        Ok(MillResult { bytes, meta: None })
    }
}

// ============ Blob mill ============

/// Raw passthrough for arbitrary binary payloads
#[derive(Debug, Default)]
pub struct BlobMill;

impl Mill for BlobMill {
    fn id(&self) -> &'static str {
        "/blob"
    }

    fn accept_media(&self, _media: &str) -> Result<(), NodeError> {
        Ok(())
    }

    fn mill(&self, input: &[u8], _name: &str) -> Result<MillResult, NodeError> {
        Ok(MillResult {
            bytes: input.to_vec(),
            meta: None,
        })
    }
}

// ============ Image resize mill ============

/// Dimension-capped JPEG re-encode
#[derive(Debug)]
pub struct ImageResizeMill {
    /// Maximum output width in pixels
    pub width: u32,
    /// JPEG quality, 1-100
    pub quality: u8,
}

impl Default for ImageResizeMill {
    fn default() -> Self {
        Self {
            width: 800,
            quality: 80,
        }
    }
}

fn accept_image_media(media: &str) -> Result<(), NodeError> {
    match media {
        "image/jpeg" | "image/png" => Ok(()),
        other => Err(NodeError::InvalidInput(format!(
            "unsupported image media type {}",
            other
        ))),
    }
}

impl Mill for ImageResizeMill {
    fn id(&self) -> &'static str {
        "/image/resize"
    }

    fn accept_media(&self, media: &str) -> Result<(), NodeError> {
        accept_image_media(media)
    }

    fn options(&self, opts: &MillOpts) -> String {
        let mut map = opts.extra.clone();
        map.insert("plaintext".to_string(), Value::Bool(opts.plaintext));
        map.insert("width".to_string(), Value::from(self.width));
        map.insert("quality".to_string(), Value::from(self.quality));
        serde_json::to_string(&map).unwrap_or_default()
    }

    fn mill(&self, input: &[u8], _name: &str) -> Result<MillResult, NodeError> {
        let img = image::load_from_memory(input)
            .map_err(|e| NodeError::InvalidInput(format!("unreadable image: {}", e)))?;

        let img = if img.width() > self.width {
            let height = (self.width as f64 * img.height() as f64 / img.width() as f64) as u32;
            img.resize(self.width, height.max(1), image::imageops::FilterType::Lanczos3)
        } else {
            img
        };

        let mut bytes = Vec::new();
        let encoder =
            image::codecs::jpeg::JpegEncoder::new_with_quality(&mut bytes, self.quality);
        img.to_rgb8()
            .write_with_encoder(encoder)
            .map_err(|e| NodeError::InvalidInput(format!("jpeg encode failed: {}", e)))?;

        let meta = serde_json::json!({
            "width": img.width(),
            "height": img.height(),
        });
        Ok(MillResult {
            bytes,
            meta: Some(meta),
        })
    }
}

// ============ Image metadata mill ============

/// Extracts a metadata summary of an image (dimensions and container
/// format) as a JSON document
#[derive(Debug, Default)]
pub struct ImageExifMill;

impl Mill for ImageExifMill {
    fn id(&self) -> &'static str {
        "/image/exif"
    }

    fn accept_media(&self, media: &str) -> Result<(), NodeError> {
        accept_image_media(media)
    }

    fn mill(&self, input: &[u8], name: &str) -> Result<MillResult, NodeError> {
        let format = image::guess_format(input)
            .map_err(|e| NodeError::InvalidInput(format!("unreadable image: {}", e)))?;
        let img = image::load_from_memory(input)
            .map_err(|e| NodeError::InvalidInput(format!("unreadable image: {}", e)))?;

        let summary = serde_json::json!({
            "name": name,
            "format": format!("{:?}", format),
            "width": img.width(),
            "height": img.height(),
        });
        let bytes = serde_json::to_vec(&summary)
            .map_err(|e| NodeError::InvalidInput(e.to_string()))?;
        Ok(MillResult { bytes, meta: None })
    }
}
