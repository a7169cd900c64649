//! DCC filename and destination-path security checks (§4.10 "Security"),
//! applied before a single byte of an inbound transfer is accepted.

use std::path::{Path, PathBuf};

use crate::errors::DccSecurityError;

/// Maximum filename length, per §4.10.
pub const MAX_FILENAME_LEN: usize = 255;

/// Strip any path separators and reject control bytes, `NUL`, empty names,
/// `.`/`..`, and names over [`MAX_FILENAME_LEN`]. The CTCP `DCC SEND`
/// filename arrives quoted and already split from its other fields by the
/// caller; this only validates the bare name.
pub fn sanitize_filename(raw: &str) -> Result<String, DccSecurityError> {
    if raw.is_empty() || raw == "." || raw == ".." {
        return Err(DccSecurityError::BadFilename(raw.to_string()));
    }
    if raw.contains('/') || raw.contains('\\') {
        return Err(DccSecurityError::PathEscape);
    }
    if raw.chars().any(|c| c.is_control()) {
        return Err(DccSecurityError::BadFilename(raw.to_string()));
    }
    if raw.len() > MAX_FILENAME_LEN {
        return Err(DccSecurityError::BadFilename(raw.to_string()));
    }

    // Take only the final path component in case callers pass something
    // pre-joined; a bare filename with no separators already falls through.
    let name = Path::new(raw)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(raw)
        .to_string();
    Ok(name)
}

pub fn reject_blocked_extension(filename: &str, blocked_extensions: &[String]) -> Result<(), DccSecurityError> {
    let Some(ext) = Path::new(filename).extension().and_then(|e| e.to_str()) else {
        return Ok(());
    };
    let ext_lower = ext.to_ascii_lowercase();
    if blocked_extensions.iter().any(|b| b.trim_start_matches('.').eq_ignore_ascii_case(&ext_lower)) {
        return Err(DccSecurityError::BlockedExtension(ext_lower));
    }
    Ok(())
}

pub fn check_size(size: u64, max_file_size: u64) -> Result<(), DccSecurityError> {
    if max_file_size != 0 && size > max_file_size {
        return Err(DccSecurityError::OversizeFile { size, max: max_file_size });
    }
    Ok(())
}

/// Resolve the sanitized `filename` against `download_dir`, guaranteeing the
/// result is a prefix-containment descendant of `download_dir` (§8
/// invariant). Since `sanitize_filename` already rejects separators, this is
/// mostly a defense-in-depth re-check against a post-join escape.
pub fn resolve_destination(download_dir: &Path, filename: &str) -> Result<PathBuf, DccSecurityError> {
    let sanitized = sanitize_filename(filename)?;
    let joined = download_dir.join(&sanitized);
    let normalized_parent = joined.parent().unwrap_or(download_dir);
    if normalized_parent != download_dir {
        return Err(DccSecurityError::PathEscape);
    }
    Ok(joined)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_path_escape_filename() {
        assert_eq!(sanitize_filename("../etc/passwd"), Err(DccSecurityError::PathEscape));
    }

    #[test]
    fn rejects_control_bytes_and_nul() {
        assert!(sanitize_filename("evil\0name").is_err());
        assert!(sanitize_filename("evil\nname").is_err());
    }

    #[test]
    fn accepts_a_plain_filename() {
        assert_eq!(sanitize_filename("report.pdf").unwrap(), "report.pdf");
    }

    #[test]
    fn resolved_destination_stays_inside_download_dir() {
        let dir = Path::new("/home/user/downloads");
        let resolved = resolve_destination(dir, "photo.png").unwrap();
        assert_eq!(resolved, dir.join("photo.png"));
    }

    #[test]
    fn resolve_destination_rejects_escape_attempt() {
        let dir = Path::new("/home/user/downloads");
        assert_eq!(resolve_destination(dir, "../../etc/passwd"), Err(DccSecurityError::PathEscape));
    }

    #[test]
    fn blocked_extension_is_rejected_case_insensitively() {
        let blocked = vec!["exe".to_string(), "scr".to_string()];
        assert!(reject_blocked_extension("virus.EXE", &blocked).is_err());
        assert!(reject_blocked_extension("photo.png", &blocked).is_ok());
    }

    #[test]
    fn oversize_file_is_rejected() {
        assert!(check_size(10_000_000, 1_000_000).is_err());
        assert!(check_size(10, 1_000_000).is_ok());
        assert!(check_size(10_000_000, 0).is_ok());
    }
}
