use std::io::Cursor;
use std::sync::Mutex;

use arboard::Clipboard;
use image::ImageEncoder;

use crate::errors::{HistoryError, Result};
use crate::hash::{hash_bytes, identity_hash};
use crate::storage::models::{Category, NewContent, NewEntry, NewItem};

pub const KIND_TEXT: &str = "text/plain";
pub const KIND_IMAGE_PNG: &str = "image/png";
pub const KIND_FILE_URI: &str = "text/uri-list";

const PREVIEW_MAX_CHARS: usize = 500;

/// One typed byte representation of a clipboard object.
#[derive(Debug, Clone)]
pub struct Payload {
    pub kind: String,
    pub bytes: Vec<u8>,
}

/// One discrete clipboard object; its payloads are ordered best-first, and
/// that order becomes the stored content priority.
#[derive(Debug, Clone)]
pub struct SnapshotItem {
    pub payloads: Vec<Payload>,
}

/// A normalized read of the clipboard at one change-counter value.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub source_app: String,
    pub preview: String,
    pub category: Category,
    pub items: Vec<SnapshotItem>,
}

impl Snapshot {
    /// Dedup key for this capture: content hash over every payload in item
    /// order, or the preview text when there are no payloads to hash.
    pub fn identity(&self) -> String {
        let payloads = self
            .items
            .iter()
            .flat_map(|item| item.payloads.iter())
            .map(|payload| payload.bytes.as_slice());
        identity_hash(payloads, &self.preview)
    }

    pub fn into_entry(self) -> NewEntry {
        let hash = self.identity();
        NewEntry {
            source_app: self.source_app,
            preview: truncate_preview(&self.preview),
            hash,
            category: self.category,
            items: self
                .items
                .into_iter()
                .map(|item| NewItem {
                    contents: item
                        .payloads
                        .into_iter()
                        .enumerate()
                        .map(|(priority, payload)| NewContent {
                            kind: payload.kind,
                            bytes: payload.bytes,
                            priority: priority as i64,
                        })
                        .collect(),
                })
                .collect(),
        }
    }
}

/// Cuts the display text down to a preview-sized string without splitting a
/// code point.
pub fn truncate_preview(text: &str) -> String {
    if text.chars().count() <= PREVIEW_MAX_CHARS {
        return text.to_string();
    }
    text.chars().take(PREVIEW_MAX_CHARS).collect()
}

/// The OS clipboard boundary: a monotonically increasing change counter plus
/// snapshot read/write. The capture loop polls `change_count` and only reads
/// a full snapshot when the counter moved.
pub trait Pasteboard: Send + Sync {
    fn change_count(&self) -> u64;
    fn read(&self) -> Result<Option<Snapshot>>;
    fn write(&self, items: &[Vec<Payload>]) -> Result<()>;
}

#[derive(Default)]
struct CounterState {
    change_count: u64,
    last_fingerprint: Option<String>,
}

/// arboard-backed pasteboard. A fresh clipboard handle is opened per
/// operation, and since arboard exposes no native change counter, one is
/// synthesized by fingerprinting the current content on each poll and
/// bumping when it differs.
///
/// arboard also carries no notion of which application wrote the clipboard,
/// so snapshots report `source_app` as "unknown" and source-based filtering
/// only applies to pasteboards that can supply a real name.
pub struct SystemPasteboard {
    counter: Mutex<CounterState>,
}

impl SystemPasteboard {
    pub fn new() -> Result<Self> {
        // Probe once so an unavailable clipboard fails at startup.
        open_clipboard()?;
        Ok(Self {
            counter: Mutex::new(CounterState::default()),
        })
    }

    fn fingerprint(clipboard: &mut Clipboard) -> Option<String> {
        if let Ok(text) = clipboard.get_text()
            && !text.is_empty()
        {
            return Some(hash_bytes(text.as_bytes()));
        }
        if let Ok(img) = clipboard.get_image() {
            return Some(hash_bytes(&img.bytes));
        }
        None
    }
}

fn open_clipboard() -> Result<Clipboard> {
    Clipboard::new().map_err(|e| HistoryError::Clipboard(e.to_string()))
}

impl Pasteboard for SystemPasteboard {
    fn change_count(&self) -> u64 {
        let Ok(mut clipboard) = open_clipboard() else {
            return 0;
        };
        let Ok(mut state) = self.counter.lock() else {
            return 0;
        };
        let current = Self::fingerprint(&mut clipboard);
        if current != state.last_fingerprint {
            state.last_fingerprint = current;
            state.change_count += 1;
        }
        state.change_count
    }

    fn read(&self) -> Result<Option<Snapshot>> {
        let mut clipboard = open_clipboard()?;

        if let Ok(text) = clipboard.get_text()
            && !text.is_empty()
        {
            return Ok(Some(Snapshot {
                source_app: "unknown".to_string(),
                preview: text.clone(),
                category: Category::Text,
                items: vec![SnapshotItem {
                    payloads: vec![Payload {
                        kind: KIND_TEXT.to_string(),
                        bytes: text.into_bytes(),
                    }],
                }],
            }));
        }

        if let Ok(img) = clipboard.get_image() {
            let png = encode_png(&img.bytes, img.width as u32, img.height as u32)?;
            return Ok(Some(Snapshot {
                source_app: "unknown".to_string(),
                preview: format!("Image {}x{}", img.width, img.height),
                category: Category::Image,
                items: vec![SnapshotItem {
                    payloads: vec![Payload {
                        kind: KIND_IMAGE_PNG.to_string(),
                        bytes: png,
                    }],
                }],
            }));
        }

        Ok(None)
    }

    fn write(&self, items: &[Vec<Payload>]) -> Result<()> {
        let mut clipboard = open_clipboard()?;

        // arboard can only hold one object; paste back the preferred
        // payload of the first item.
        let Some(payload) = items.iter().flatten().next() else {
            return Err(HistoryError::InvalidData("nothing to paste".to_string()));
        };

        match payload.kind.as_str() {
            KIND_IMAGE_PNG => {
                let img = image::load_from_memory(&payload.bytes)
                    .map_err(|e| HistoryError::Clipboard(e.to_string()))?;
                let rgba = img.to_rgba8();
                let (width, height) = rgba.dimensions();
                clipboard
                    .set_image(arboard::ImageData {
                        width: width as usize,
                        height: height as usize,
                        bytes: rgba.into_raw().into(),
                    })
                    .map_err(|e| HistoryError::Clipboard(e.to_string()))
            }
            _ => {
                let text = String::from_utf8_lossy(&payload.bytes).to_string();
                clipboard
                    .set_text(text)
                    .map_err(|e| HistoryError::Clipboard(e.to_string()))
            }
        }
    }
}

fn encode_png(rgba: &[u8], width: u32, height: u32) -> Result<Vec<u8>> {
    let mut buf = Cursor::new(Vec::new());
    let encoder = image::codecs::png::PngEncoder::new(&mut buf);
    encoder
        .write_image(rgba, width, height, image::ExtendedColorType::Rgba8)
        .map_err(|e| HistoryError::Clipboard(e.to_string()))?;
    Ok(buf.into_inner())
}
