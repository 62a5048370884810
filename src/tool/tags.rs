//! In-band text conventions layered over the tool's string result.
//!
//! A leading `EXECUTION_ERROR:` line marks the rest as failure text; a
//! trailing `[IMAGE_GENERATED:a.png, b.png]` tag lists new artifacts.

use std::path::{Path, PathBuf};

pub(crate) const ERROR_PREFIX: &str = "EXECUTION_ERROR:";

const IMAGE_TAG_OPEN: &str = "[IMAGE_GENERATED:";

/// Returned when code ran but produced no text and no images.
pub(crate) const NO_OUTPUT: &str = "Success (Code Executed, No Text Output)";

/// Frames failure text with the error prefix.
pub(crate) fn format_error(text: &str) -> String {
    format!("{ERROR_PREFIX}\n{text}")
}

pub(crate) fn is_error(text: &str) -> bool {
    text.starts_with(ERROR_PREFIX)
}

/// Formats the artifact tag for the given file names.
pub(crate) fn image_tag(names: &[String]) -> String {
    format!("{IMAGE_TAG_OPEN}{}]", names.join(", "))
}

/// File names listed in the first artifact tag of `text`.
pub(crate) fn parse_image_tag(text: &str) -> Vec<String> {
    let Some(start) = text.find(IMAGE_TAG_OPEN) else {
        return Vec::new();
    };
    let rest = &text[start + IMAGE_TAG_OPEN.len()..];
    let Some(end) = rest.find(']') else {
        return Vec::new();
    };

    rest[..end]
        .split(", ")
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(String::from)
        .collect()
}

/// Resolves tagged artifact names to existing files in `workspace`,
/// dropping duplicates and names that do not exist.
pub(crate) fn extract_images(text: &str, workspace: &Path) -> Vec<PathBuf> {
    let mut names = parse_image_tag(text);
    names.sort();
    names.dedup();

    names
        .into_iter()
        .map(|name| workspace.join(name))
        .filter(|path| path.is_file())
        .collect()
}

/// Removes terminal escape sequences from interpreter output.
pub(crate) fn strip_ansi(text: &str) -> String {
    strip_ansi_escapes::strip_str(text)
}
