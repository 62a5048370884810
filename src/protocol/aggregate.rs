//! Classification of execution events into logs and artifacts.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::Utc;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use super::{ExecutionEvent, MimeBundle};

/// Image mime types extracted from result and display payloads.
const IMAGE_MIME_TYPES: &[(&str, &str)] = &[("image/png", "png"), ("image/jpeg", "jpg")];

/// An image payload decoded from a rich-display event, not yet on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct DecodedImage {
    pub extension: &'static str,
    pub bytes: Vec<u8>,
}

/// Logs and decoded images of one execution.
#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct Aggregate {
    pub logs: String,
    pub images: Vec<DecodedImage>,
}

/// Folds an ordered event sequence into text output and image payloads.
///
/// Text is kept in arrival order. Error tracebacks are appended to the log
/// with an `Error:` prefix; they are user-code failures, not transport
/// failures. Status events carry no output.
pub(crate) fn aggregate(events: &[ExecutionEvent]) -> Aggregate {
    let mut out = Aggregate::default();

    for event in events {
        match event {
            ExecutionEvent::Stream { text, .. } => out.logs.push_str(text),
            ExecutionEvent::Result { data } | ExecutionEvent::Display { data } => {
                if let Some(text) = data.get("text/plain") {
                    out.logs.push_str(text);
                }
                out.images.extend(decode_images(data));
            }
            ExecutionEvent::Error {
                ename,
                evalue,
                traceback,
            } => {
                let trace = if traceback.is_empty() {
                    format!("{ename}: {evalue}")
                } else {
                    traceback.join("\n")
                };
                out.logs.push_str("Error: ");
                out.logs.push_str(&trace);
            }
            ExecutionEvent::Status { .. } => {}
        }
    }

    out
}

fn decode_images(data: &MimeBundle) -> Vec<DecodedImage> {
    IMAGE_MIME_TYPES
        .iter()
        .filter_map(|&(mime, extension)| {
            let payload = data.get(mime)?;
            let compact: String = payload.split_whitespace().collect();
            match BASE64.decode(compact.as_bytes()) {
                Ok(bytes) => Some(DecodedImage { extension, bytes }),
                Err(e) => {
                    warn!("Discarding undecodable {} payload: {}", mime, e);
                    None
                }
            }
        })
        .collect()
}

/// Writes decoded images into the workspace directory.
#[derive(Debug, Clone)]
pub(crate) struct ArtifactWriter {
    dir: PathBuf,
}

impl ArtifactWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Persists each image under a timestamp-derived name and returns the
    /// file names that were written. Write failures are logged and skipped.
    pub fn persist(&self, images: Vec<DecodedImage>) -> Vec<String> {
        let mut written = Vec::with_capacity(images.len());

        for image in images {
            let name = unique_name(&self.dir, image.extension);
            let path = self.dir.join(&name);
            match fs::write(&path, &image.bytes) {
                Ok(()) => {
                    debug!("Wrote artifact {}", path.display());
                    written.push(name);
                }
                Err(e) => warn!("Failed to write artifact {}: {}", path.display(), e),
            }
        }

        written
    }
}

/// Millisecond timestamp name, suffixed when a file of that name exists.
fn unique_name(dir: &Path, extension: &str) -> String {
    let stamp = Utc::now().timestamp_millis();
    let mut name = format!("{stamp}.{extension}");
    let mut n = 1;
    while dir.join(&name).exists() {
        name = format!("{stamp}-{n}.{extension}");
        n += 1;
    }
    name
}
