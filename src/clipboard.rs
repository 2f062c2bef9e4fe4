use std::fs;
use std::path::Path;

use arboard::Clipboard;
use image::ImageEncoder;
use tracing::debug;

use crate::errors::{ClipError, Result};
use crate::hash::{fingerprint, text_fingerprint};
use crate::storage::models::{ClipEntry, ContentType};

/// One snapshot of the OS clipboard.
#[derive(Debug, Clone, PartialEq)]
pub enum ClipboardPayload {
    Text(String),
    /// Raw RGBA8 pixels.
    Image {
        width: usize,
        height: usize,
        bytes: Vec<u8>,
    },
}

impl ClipboardPayload {
    pub fn format(&self) -> &'static str {
        match self {
            ClipboardPayload::Text(_) => "text",
            ClipboardPayload::Image { .. } => "image",
        }
    }

    pub fn fingerprint(&self) -> String {
        match self {
            ClipboardPayload::Text(text) => text_fingerprint(text),
            ClipboardPayload::Image {
                width,
                height,
                bytes,
            } => {
                let mut data = format!("{}x{}:", width, height).into_bytes();
                data.extend_from_slice(bytes);
                fingerprint(self.format(), &data)
            }
        }
    }

    pub fn size_bytes(&self) -> usize {
        match self {
            ClipboardPayload::Text(text) => text.len(),
            ClipboardPayload::Image { bytes, .. } => bytes.len(),
        }
    }

    /// Nothing worth keeping: whitespace-only text or a zero-sized image.
    pub fn is_blank(&self) -> bool {
        match self {
            ClipboardPayload::Text(text) => text.trim().is_empty(),
            ClipboardPayload::Image {
                width,
                height,
                bytes,
            } => bytes.is_empty() || *width == 0 || *height == 0,
        }
    }
}

/// Seam over the OS clipboard so the monitor and paste protocol can be
/// driven without a display server.
pub trait ClipboardBackend: Send + Sync {
    /// `Ok(None)` when the clipboard holds nothing readable.
    fn read(&self) -> Result<Option<ClipboardPayload>>;
    fn write(&self, payload: &ClipboardPayload) -> Result<()>;
}

/// arboard-backed clipboard. A fresh handle is opened per call.
#[derive(Debug, Default)]
pub struct SystemClipboard;

impl ClipboardBackend for SystemClipboard {
    fn read(&self) -> Result<Option<ClipboardPayload>> {
        let mut cb = Clipboard::new().map_err(|e| ClipError::Clipboard(e.to_string()))?;

        if let Ok(text) = cb.get_text()
            && !text.is_empty()
        {
            return Ok(Some(ClipboardPayload::Text(text)));
        }

        if let Ok(img) = cb.get_image() {
            return Ok(Some(ClipboardPayload::Image {
                width: img.width,
                height: img.height,
                bytes: img.bytes.into_owned(),
            }));
        }

        Ok(None)
    }

    fn write(&self, payload: &ClipboardPayload) -> Result<()> {
        let mut cb = Clipboard::new().map_err(|e| ClipError::Clipboard(e.to_string()))?;
        match payload {
            ClipboardPayload::Text(text) => cb
                .set_text(text.as_str())
                .map_err(|e| ClipError::Clipboard(e.to_string())),
            ClipboardPayload::Image {
                width,
                height,
                bytes,
            } => {
                let img_data = arboard::ImageData {
                    width: *width,
                    height: *height,
                    bytes: bytes.as_slice().into(),
                };
                cb.set_image(img_data)
                    .map_err(|e| ClipError::Clipboard(e.to_string()))
            }
        }
    }
}

pub fn save_image_to_file(data: &[u8], width: u32, height: u32, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| ClipError::Image(e.to_string()))?;
    }
    let file = fs::File::create(path).map_err(|e| ClipError::Image(e.to_string()))?;
    let encoder = image::codecs::png::PngEncoder::new(file);
    encoder
        .write_image(data, width, height, image::ColorType::Rgba8.into())
        .map_err(|e| ClipError::Image(e.to_string()))
}

pub fn load_image_payload(path: &Path) -> Result<ClipboardPayload> {
    let img = image::open(path).map_err(|e| ClipError::Image(e.to_string()))?;
    let rgba = img.to_rgba8();
    let (w, h) = rgba.dimensions();
    Ok(ClipboardPayload::Image {
        width: w as usize,
        height: h as usize,
        bytes: rgba.into_raw(),
    })
}

/// What writing `entry` back to the clipboard looks like.
pub fn payload_for_entry(entry: &ClipEntry) -> Result<ClipboardPayload> {
    match entry.content_type {
        ContentType::Image => load_image_payload(Path::new(&entry.raw_content)),
        _ => Ok(ClipboardPayload::Text(entry.raw_content.clone())),
    }
}

/// Removes the PNG behind an image entry. Paths outside `images_dir`
/// (e.g. from an imported backup) are left alone.
pub fn remove_image_file(entry: &ClipEntry, images_dir: &Path) -> Result<()> {
    if entry.content_type != ContentType::Image {
        return Ok(());
    }
    let path = Path::new(&entry.raw_content);
    if !path.starts_with(images_dir) {
        return Ok(());
    }
    match fs::remove_file(path) {
        Ok(()) => {
            debug!(path = %path.display(), "removed image file");
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(ClipError::Io(e)),
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use super::*;

    /// In-process clipboard for driving the monitor and paste tests.
    #[derive(Default)]
    pub struct MemoryClipboard {
        current: Mutex<Option<ClipboardPayload>>,
        pub writes: AtomicUsize,
        pub fail_reads: AtomicBool,
        pub fail_writes: AtomicBool,
        /// Reads left that fail with a non-transient error.
        pub hard_read_failures: AtomicUsize,
    }

    impl MemoryClipboard {
        pub fn set_text(&self, text: &str) {
            *self.current.lock().unwrap() = Some(ClipboardPayload::Text(text.to_string()));
        }

        pub fn set(&self, payload: ClipboardPayload) {
            *self.current.lock().unwrap() = Some(payload);
        }

        pub fn current(&self) -> Option<ClipboardPayload> {
            self.current.lock().unwrap().clone()
        }
    }

    impl ClipboardBackend for MemoryClipboard {
        fn read(&self) -> Result<Option<ClipboardPayload>> {
            if self.fail_reads.load(Ordering::SeqCst) {
                return Err(ClipError::Clipboard("clipboard busy".into()));
            }
            if self
                .hard_read_failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(ClipError::Image("unreadable image data".into()));
            }
            Ok(self.current())
        }

        fn write(&self, payload: &ClipboardPayload) -> Result<()> {
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(ClipError::Clipboard("write refused".into()));
            }
            self.writes.fetch_add(1, Ordering::SeqCst);
            self.set(payload.clone());
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tempfile::TempDir;

    fn image_entry(path: &Path) -> ClipEntry {
        ClipEntry {
            id: 1,
            content_type: ContentType::Image,
            raw_content: path.to_string_lossy().to_string(),
            category: None,
            groups: Vec::new(),
            is_permanent: false,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_blank_payloads() {
        assert!(ClipboardPayload::Text("  \n\t".into()).is_blank());
        assert!(!ClipboardPayload::Text("x".into()).is_blank());
        assert!(
            ClipboardPayload::Image {
                width: 0,
                height: 0,
                bytes: vec![]
            }
            .is_blank()
        );
    }

    #[test]
    fn test_image_fingerprint_includes_dimensions() {
        let a = ClipboardPayload::Image {
            width: 2,
            height: 1,
            bytes: vec![0; 8],
        };
        let b = ClipboardPayload::Image {
            width: 1,
            height: 2,
            bytes: vec![0; 8],
        };
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_save_and_load_image_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("subdir/test.png");
        // 2x2 RGBA image (16 bytes)
        let data = vec![255u8; 16];
        save_image_to_file(&data, 2, 2, &path).unwrap();
        assert!(path.exists());

        let payload = load_image_payload(&path).unwrap();
        assert_eq!(
            payload,
            ClipboardPayload::Image {
                width: 2,
                height: 2,
                bytes: data
            }
        );
    }

    #[test]
    fn test_remove_image_file_inside_images_dir() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.png");
        save_image_to_file(&[0u8; 4], 1, 1, &path).unwrap();
        remove_image_file(&image_entry(&path), dir.path()).unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_remove_image_file_ignores_foreign_paths() {
        let images = TempDir::new().unwrap();
        let elsewhere = TempDir::new().unwrap();
        let path = elsewhere.path().join("keep.png");
        save_image_to_file(&[0u8; 4], 1, 1, &path).unwrap();
        remove_image_file(&image_entry(&path), images.path()).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_payload_for_text_entry() {
        let entry = ClipEntry {
            content_type: ContentType::Url,
            raw_content: "https://example.com".into(),
            ..image_entry(Path::new("/nowhere"))
        };
        assert_eq!(
            payload_for_entry(&entry).unwrap(),
            ClipboardPayload::Text("https://example.com".into())
        );
    }
}
