//! Path normalization and scan-root overlap checks.
//!
//! macOS stores file names in NFD (decomposed) form while Linux and Windows
//! usually keep NFC (composed). The same visual name can therefore have two
//! byte representations:
//!
//! - NFC: `café` - 'é' is U+00E9
//! - NFD: `café` - 'e' U+0065 + combining acute accent U+0301
//!
//! Root validation compares NFC forms component by component, so `/a/café`
//! and `/a/cafe\u{0301}/sub` are recognised as nested.
//!
//! # Example
//!
//! ```
//! use dupehound::scanner::path_utils::{is_same_or_nested, normalize_path_str};
//! use std::path::Path;
//!
//! assert_eq!(normalize_path_str("cafe\u{0301}"), "café");
//! assert!(is_same_or_nested(Path::new("/a/b"), Path::new("/a")));
//! assert!(!is_same_or_nested(Path::new("/ab"), Path::new("/a")));
//! ```

use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use unicode_normalization::UnicodeNormalization;

/// Normalize a string to NFC form.
#[must_use]
pub fn normalize_path_str(s: &str) -> String {
    s.nfc().collect()
}

/// Normalize a path to NFC form.
///
/// Paths that are not valid UTF-8 are returned unchanged.
#[must_use]
pub fn normalize_pathbuf(path: &Path) -> PathBuf {
    match path.to_str() {
        Some(s) => PathBuf::from(normalize_path_str(s)),
        None => path.to_path_buf(),
    }
}

/// Whether `child` is `parent` or lies underneath it.
///
/// Comparison is by whole components after NFC normalization, so `/ab` is
/// not inside `/a`.
#[must_use]
pub fn is_same_or_nested(child: &Path, parent: &Path) -> bool {
    normalize_pathbuf(child).starts_with(normalize_pathbuf(parent))
}

/// Find the first pair of roots where one equals or contains the other.
///
/// Returns indices `(i, j)` with `i < j`.
#[must_use]
pub fn find_overlap(roots: &[PathBuf]) -> Option<(usize, usize)> {
    for (i, a) in roots.iter().enumerate() {
        for (j, b) in roots.iter().enumerate().skip(i + 1) {
            if is_same_or_nested(a, b) || is_same_or_nested(b, a) {
                return Some((i, j));
            }
        }
    }
    None
}

/// Whether a file name is hidden by Unix convention (leading dot).
#[must_use]
pub fn is_hidden_name(name: &OsStr) -> bool {
    name.to_string_lossy().starts_with('.')
}
