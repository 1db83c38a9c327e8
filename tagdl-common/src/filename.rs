//! Filename sanitization for delivered audio files
//!
//! Titles come from an upstream metadata service and may contain anything.
//! The derived name must be valid on Linux, macOS and Windows and must be the
//! same every time for the same title.

/// Maximum length of a sanitized stem (extension excluded)
pub const MAX_STEM_LEN: usize = 120;

/// Fallback stem when nothing printable survives sanitization
pub const FALLBACK_STEM: &str = "audio";

/// Device names Windows refuses as file stems
const WINDOWS_RESERVED: &[&str] = &[
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

/// Sanitize a title into a filename stem.
///
/// Characters outside `[A-Za-z0-9-]` become `_`, runs of `_` collapse into
/// one, leading and trailing `_` are trimmed and the result is capped at
/// [`MAX_STEM_LEN`] characters.
///
/// ```
/// assert_eq!(tagdl_common::sanitize_filename("My/Song:Title?"), "My_Song_Title");
/// ```
pub fn sanitize_filename(title: &str) -> String {
    let mut stem = String::with_capacity(title.len().min(MAX_STEM_LEN));
    let mut last_was_underscore = false;

    for ch in title.chars() {
        if ch.is_ascii_alphanumeric() || ch == '-' {
            stem.push(ch);
            last_was_underscore = false;
        } else if !last_was_underscore {
            stem.push('_');
            last_was_underscore = true;
        }
    }

    // All remaining characters are ASCII so byte truncation is safe
    let mut stem = stem.trim_matches('_').to_string();
    if stem.len() > MAX_STEM_LEN {
        stem.truncate(MAX_STEM_LEN);
        stem = stem.trim_end_matches('_').to_string();
    }

    if stem.is_empty() {
        return FALLBACK_STEM.to_string();
    }

    if WINDOWS_RESERVED
        .iter()
        .any(|reserved| reserved.eq_ignore_ascii_case(&stem))
    {
        stem.push('_');
    }

    stem
}

/// Whether `stem` is already in sanitized form
pub fn is_sanitized(stem: &str) -> bool {
    !stem.is_empty() && sanitize_filename(stem) == stem
}
