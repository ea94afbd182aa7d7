//! Replace a file with a link to another copy.
//!
//! Every replacement is a small transaction:
//!
//! 1. rename the victim to `<name>.dupehound_tmp` in the same directory
//! 2. create the link (or shortcut) at the victim's place
//! 3. delete the renamed file
//!
//! If step 2 fails the renamed file is moved back. If step 3 fails the link
//! stays and the leftover is reported as a warning; no data is lost. A
//! `.dupehound_tmp` file found after a crash is the untouched original of
//! an interrupted transaction.

use std::ffi::OsString;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Suffix of the temporary name a victim carries during a transaction.
pub const TEMP_SUFFIX: &str = "dupehound_tmp";

/// Extension of shortcut files.
pub const SHORTCUT_EXTENSION: &str = "url";

/// Kind of link put in place of a victim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkKind {
    /// Symbolic link to the survivor's absolute path.
    Soft,
    /// Hard link to the survivor (same device only).
    Hard,
    /// `<name>.url` Internet Shortcut pointing at the survivor.
    Shortcut,
}

impl fmt::Display for LinkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Soft => "soft link",
            Self::Hard => "hard link",
            Self::Shortcut => "shortcut",
        })
    }
}

/// Errors raised by a link transaction.
#[derive(Debug, Error)]
pub enum LinkError {
    /// A file already occupies the temporary name.
    #[error("temporary file already exists: {0}")]
    TempExists(PathBuf),

    /// Renaming the victim out of the way failed; nothing was changed.
    #[error("failed to rename {from} to {to}: {source}")]
    Rename {
        /// Original path.
        from: PathBuf,
        /// Temporary path.
        to: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// Creating the link failed.
    #[error("failed to create {kind} {link} -> {target}: {source}{}", rollback_note(.restored))]
    Create {
        /// Link kind.
        kind: LinkKind,
        /// Where the link was to be created.
        link: PathBuf,
        /// The survivor.
        target: PathBuf,
        /// Whether the victim was moved back to its name.
        restored: bool,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// The link kind cannot be created on this platform.
    #[error("{0} is not supported on this platform")]
    Unsupported(LinkKind),
}

fn rollback_note(restored: &bool) -> &'static str {
    if *restored {
        ""
    } else {
        " (original left under its temporary name)"
    }
}

/// A completed replacement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkOutcome {
    /// Path of the new link or shortcut.
    pub created: PathBuf,
    /// Set when the temporary file could not be removed.
    pub warning: Option<String>,
}

/// Temporary name used for `victim` during a transaction.
#[must_use]
pub fn temp_path_for(victim: &Path) -> PathBuf {
    let mut name = victim
        .file_name()
        .map(OsString::from)
        .unwrap_or_default();
    name.push(".");
    name.push(TEMP_SUFFIX);
    victim.with_file_name(name)
}

/// Path of the shortcut that replaces `victim`.
#[must_use]
pub fn shortcut_path_for(victim: &Path) -> PathBuf {
    let mut name = victim
        .file_name()
        .map(OsString::from)
        .unwrap_or_default();
    name.push(".");
    name.push(SHORTCUT_EXTENSION);
    victim.with_file_name(name)
}

/// Replace `victim` with a link of `kind` pointing at `target`.
///
/// `target` should be absolute; soft links store it verbatim.
///
/// # Errors
///
/// - [`LinkError::TempExists`] or [`LinkError::Rename`]: nothing changed
/// - [`LinkError::Create`]: the link could not be made; `restored` tells
///   whether the victim is back under its name
/// - [`LinkError::Unsupported`]: nothing changed
pub fn replace_with_link(
    victim: &Path,
    target: &Path,
    kind: LinkKind,
) -> Result<LinkOutcome, LinkError> {
    if kind == LinkKind::Soft && !cfg!(any(unix, windows)) {
        return Err(LinkError::Unsupported(kind));
    }

    let temp = temp_path_for(victim);
    if fs::symlink_metadata(&temp).is_ok() {
        return Err(LinkError::TempExists(temp));
    }

    fs::rename(victim, &temp).map_err(|source| LinkError::Rename {
        from: victim.to_path_buf(),
        to: temp.clone(),
        source,
    })?;

    let created = match kind {
        LinkKind::Soft | LinkKind::Hard => victim.to_path_buf(),
        LinkKind::Shortcut => shortcut_path_for(victim),
    };

    if let Err(source) = create_link(&created, target, kind) {
        let restored = match fs::rename(&temp, victim) {
            Ok(()) => true,
            Err(e) => {
                log::error!(
                    "Rollback failed, original remains at {}: {}",
                    temp.display(),
                    e
                );
                false
            }
        };
        return Err(LinkError::Create {
            kind,
            link: created,
            target: target.to_path_buf(),
            restored,
            source,
        });
    }

    let warning = match fs::remove_file(&temp) {
        Ok(()) => None,
        Err(e) => {
            let message = format!("temporary file left behind: {}: {}", temp.display(), e);
            log::warn!("{}", message);
            Some(message)
        }
    };

    log::info!(
        "Replaced {} with {} to {}",
        victim.display(),
        kind,
        target.display()
    );
    Ok(LinkOutcome { created, warning })
}

fn create_link(link: &Path, target: &Path, kind: LinkKind) -> io::Result<()> {
    match kind {
        LinkKind::Hard => fs::hard_link(target, link),
        LinkKind::Soft => symlink(target, link),
        LinkKind::Shortcut => write_shortcut(link, target),
    }
}

#[cfg(unix)]
fn symlink(target: &Path, link: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(windows)]
fn symlink(target: &Path, link: &Path) -> io::Result<()> {
    std::os::windows::fs::symlink_file(target, link)
}

#[cfg(not(any(unix, windows)))]
fn symlink(_target: &Path, _link: &Path) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "symbolic links are not supported",
    ))
}

/// Write an Internet Shortcut file pointing at `target`.
///
/// Fails if `link` already exists.
pub fn write_shortcut(link: &Path, target: &Path) -> io::Result<()> {
    use std::io::Write;

    let mut file = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(link)?;
    write!(
        file,
        "[InternetShortcut]\r\nURL={}\r\n",
        file_url(target)
    )?;
    file.sync_all()
}

/// `file://` URL of an absolute path, percent-encoding everything outside
/// the unreserved set.
#[must_use]
pub fn file_url(path: &Path) -> String {
    let raw = path.to_string_lossy().replace('\\', "/");
    let mut url = String::from("file://");
    if !raw.starts_with('/') {
        url.push('/');
    }
    for byte in raw.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' | b'/' | b':' => {
                url.push(char::from(byte));
            }
            _ => url.push_str(&format!("%{byte:02X}")),
        }
    }
    url
}
