//! Building the script actually submitted for a call.

use crate::sandbox::WORKSPACE_ENV;

/// Environment preamble run before the marker. Missing plotting or data
/// libraries are tolerated so plain interpreters still work.
const BOOTSTRAP: &str = "\
import os
import sys
try:
    import matplotlib
    matplotlib.use('Agg')
    import matplotlib.pyplot as plt
except ImportError:
    pass
try:
    import pandas as pd
except ImportError:
    pass
";

/// Removes a surrounding Markdown code fence (with optional language tag).
pub(crate) fn strip_code_fences(code: &str) -> &str {
    let mut code = code.trim();
    if let Some(rest) = code.strip_prefix("```") {
        if let Some(newline) = rest.find('\n') {
            let tag = &rest[..newline];
            if tag.chars().all(|c| c.is_ascii_alphabetic()) {
                code = &rest[newline + 1..];
            }
        }
    }
    code.strip_suffix("\n```").unwrap_or(code)
}

/// Fresh delimiter printed before the caller's code.
pub(crate) fn new_marker() -> String {
    format!("__EXECUTION_START_{}__", uuid::Uuid::new_v4().simple())
}

/// Wraps the caller's code with the bootstrap, the marker print and a
/// final flush.
pub(crate) fn build_script(code: &str, marker: &str) -> String {
    format!(
        "{BOOTSTRAP}os.chdir(os.environ.get('{WORKSPACE_ENV}', os.getcwd()))\n\
         \n\
         print('{marker}')\n\
         {code}\n\
         sys.stdout.flush()"
    )
}

/// Returns the output produced after the marker, or the whole log when the
/// marker never appeared.
pub(crate) fn after_marker<'a>(logs: &'a str, marker: &str) -> &'a str {
    match logs.split_once(marker) {
        Some((_, rest)) => rest.trim_start(),
        None => logs,
    }
}
