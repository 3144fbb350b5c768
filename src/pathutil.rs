//! Path and name utilities: well-known directory resolution, temp-name
//! generation, separator normalization, and UTF-8 path conversion.
//!
//! Names and paths stored in the index are always UTF-8
//! ([`camino::Utf8PathBuf`]); conversion from the platform-native encoding
//! happens at this boundary.

use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::Result;
use camino::{Utf8Path, Utf8PathBuf};

use crate::{anyhow_loc, bail_loc};

/// Platform path separator.
#[cfg(windows)]
pub const PATH_DELIMITER: char = '\\';
#[cfg(not(windows))]
pub const PATH_DELIMITER: char = '/';

/// Convert a platform path to UTF-8, failing with a descriptive error.
pub fn to_utf8(path: &Path) -> Result<Utf8PathBuf> {
    Utf8PathBuf::from_path_buf(path.to_path_buf())
        .map_err(|p| anyhow_loc!("path is not valid UTF-8: {}", p.display()))
}

fn apply_trailing_sep(mut s: String, trailing_sep: bool) -> String {
    if trailing_sep {
        if !s.ends_with(PATH_DELIMITER) {
            s.push(PATH_DELIMITER);
        }
    } else if s.len() > 1 && s.ends_with(PATH_DELIMITER) {
        s.pop();
    }
    s
}

/// The user's home directory.
pub fn home_path(trailing_sep: bool) -> Result<Utf8PathBuf> {
    let home = dirs::home_dir().ok_or_else(|| anyhow_loc!("user home directory is not defined"))?;
    let home = to_utf8(&home)?;
    if !home.is_dir() {
        bail_loc!("user home directory is not accessible: {home}");
    }
    Ok(apply_trailing_sep(home.into_string(), trailing_sep).into())
}

/// The platform temp directory.
pub fn temp_path(trailing_sep: bool) -> Result<Utf8PathBuf> {
    let tmp = to_utf8(&std::env::temp_dir())?;
    Ok(apply_trailing_sep(tmp.into_string(), trailing_sep).into())
}

/// The current working directory.
pub fn get_cwd(trailing_sep: bool) -> Result<Utf8PathBuf> {
    let cwd = std::env::current_dir()?;
    let cwd = to_utf8(&cwd)?;
    Ok(apply_trailing_sep(cwd.into_string(), trailing_sep).into())
}

/// Normalize separators to the platform convention and apply the trailing
/// separator policy. Purely textual; does not consult the filesystem.
pub fn path2rel(path: &str, trailing_sep: bool) -> String {
    if path.is_empty() {
        return String::new();
    }
    #[cfg(windows)]
    let fixed = path.replace('/', "\\");
    #[cfg(not(windows))]
    let fixed = path.replace('\\', "/");
    apply_trailing_sep(fixed, trailing_sep)
}

/// Recursive directory creation; an already-existing directory is not an
/// error.
pub fn mkdir(path: &Utf8Path) -> Result<()> {
    std::fs::create_dir_all(path)
        .map_err(|e| anyhow_loc!("failed to create directory {path}: {e}"))
}

/// Strip characters outside `[A-Za-z0-9._-]`.
pub fn sanitize_name(s: &str) -> String {
    s.chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        .collect()
}

const TEMP_NAME_MAX_TRIES: u32 = 10_000;

static TEMP_NAME_COUNTER: AtomicU32 = AtomicU32::new(0);

/// True when the process can read, write, and traverse `dir`. Existence
/// alone is not enough: a read-only mount or stripped permissions must be
/// rejected before the retry loop hands out a name.
#[cfg(unix)]
fn dir_is_usable(dir: &Utf8Path) -> bool {
    let Ok(c_path) = std::ffi::CString::new(dir.as_str()) else {
        return false;
    };
    let mode = libc::R_OK | libc::W_OK | libc::X_OK;
    unsafe { libc::access(c_path.as_ptr(), mode) == 0 }
}

#[cfg(not(unix))]
fn dir_is_usable(dir: &Utf8Path) -> bool {
    dir.is_dir() && !std::fs::metadata(dir).is_ok_and(|md| md.permissions().readonly())
}

/// Produce a path in `dir` (default: the temp directory) that does not
/// currently exist: `{dir}/{prefix}-{pid}-{counter}-{sec^addr:x}-{nsec^addr:x}`.
/// Fails after 10,000 collisions.
pub fn temp_name(dir: Option<&Utf8Path>, prefix: Option<&str>) -> Result<Utf8PathBuf> {
    let dir = match dir {
        Some(d) => d.to_owned(),
        None => temp_path(false)?,
    };
    let prefix = prefix.unwrap_or("temp");

    if !dir_is_usable(&dir) {
        bail_loc!("access denied to directory: {dir}");
    }

    let pid = std::process::id();
    // Stack address mixed in as cheap per-call entropy, as in the classic
    // mktemp recipes.
    let probe = 0u8;
    let addr = &probe as *const u8 as u64;

    for _ in 0..TEMP_NAME_MAX_TRIES {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        let m = (now.as_secs() ^ addr) as u32;
        let n = (u64::from(now.subsec_nanos()) ^ addr) as u32;
        let counter = TEMP_NAME_COUNTER.fetch_add(1, Ordering::Relaxed);

        let candidate = dir.join(format!("{prefix}-{pid}-{counter}-{m:x}-{n:x}"));
        if !candidate.as_std_path().exists() {
            return Ok(candidate);
        }
    }

    bail_loc!("temp_name retry limit ({TEMP_NAME_MAX_TRIES}) reached in {dir}")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn home_temp_cwd_resolve() {
        assert!(home_path(false).unwrap().is_dir());
        assert!(temp_path(false).unwrap().is_dir());
        assert!(get_cwd(false).unwrap().is_dir());
    }

    #[test]
    fn trailing_separator_policy() {
        let with = home_path(true).unwrap();
        let without = home_path(false).unwrap();
        assert!(with.as_str().ends_with(PATH_DELIMITER));
        assert!(!without.as_str().ends_with(PATH_DELIMITER));
        assert_eq!(with.as_str().trim_end_matches(PATH_DELIMITER), without.as_str());
    }

    #[test]
    fn path2rel_normalizes_separators() {
        #[cfg(not(windows))]
        {
            assert_eq!(path2rel("a\\b\\c", false), "a/b/c");
            assert_eq!(path2rel("a/b/", false), "a/b");
            assert_eq!(path2rel("a/b", true), "a/b/");
        }
        assert_eq!(path2rel("", true), "");
    }

    #[test]
    fn sanitize_strips_forbidden_characters() {
        assert_eq!(sanitize_name("Plain-name_1.0"), "Plain-name_1.0");
        assert_eq!(sanitize_name("/home/user/Музыка"), "homeuser");
        assert_eq!(sanitize_name("a b\tc"), "abc");
        assert_eq!(sanitize_name(""), "");
    }

    #[test]
    fn temp_names_are_fresh_and_distinct() {
        let dir = tempfile::tempdir().unwrap();
        let dir = crate::pathutil::to_utf8(dir.path()).unwrap();

        let a = temp_name(Some(&dir), Some("sn")).unwrap();
        let b = temp_name(Some(&dir), Some("sn")).unwrap();

        assert_ne!(a, b);
        assert!(!a.as_std_path().exists());
        assert!(a.file_name().unwrap().starts_with("sn-"));
        assert_eq!(a.parent().unwrap(), dir);
    }

    #[test]
    fn temp_name_rejects_missing_dir() {
        let missing = Utf8PathBuf::from("/definitely/not/a/real/dir");
        assert!(temp_name(Some(&missing), None).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn temp_name_rejects_unwritable_dir() {
        use std::fs;
        use std::os::unix::fs::PermissionsExt;

        // access(2) ignores permission bits for root.
        if unsafe { libc::geteuid() } == 0 {
            return;
        }

        let dir = tempfile::tempdir().unwrap();
        let root = to_utf8(dir.path()).unwrap();
        fs::set_permissions(&root, fs::Permissions::from_mode(0o500)).unwrap();

        assert!(temp_name(Some(&root), None).is_err());

        fs::set_permissions(&root, fs::Permissions::from_mode(0o700)).unwrap();
    }

    #[test]
    fn mkdir_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let base = to_utf8(dir.path()).unwrap();
        let nested = base.join("a/b/c");

        mkdir(&nested).unwrap();
        mkdir(&nested).unwrap();
        assert!(nested.is_dir());
    }
}
