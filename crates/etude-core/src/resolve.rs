use std::fs::{self, File};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::http::HttpStatus;

/// Read permission for "other" in a Unix mode.
const WORLD_READABLE: u32 = 0o004;

/// A document that passed every check and is open for reading.
#[derive(Debug)]
pub struct Document {
    pub path: PathBuf,
    pub file: File,
    pub len: u64,
}

impl Document {
    pub fn content_type(&self) -> String {
        mime_guess::from_path(&self.path)
            .first_or_octet_stream()
            .to_string()
    }
}

/// Resolve an origin-form target against `doc_root`.
///
/// Checks run in a fixed order: existence, world-read permission, then
/// directory-ness. A document that survives all three but cannot be opened
/// is an internal fault.
pub fn resolve(doc_root: &Path, target: &str) -> Result<Document, HttpStatus> {
    let path = target.split_once('?').map_or(target, |(p, _)| p);
    let relative = path.trim_start_matches('/');
    if relative.split('/').any(|segment| segment == "..") {
        return Err(HttpStatus::BadRequest);
    }
    let full = doc_root.join(relative);

    let meta = fs::metadata(&full).map_err(|_| HttpStatus::NotFound)?;
    if meta.permissions().mode() & WORLD_READABLE == 0 {
        return Err(HttpStatus::Forbidden);
    }
    if meta.is_dir() {
        return Err(HttpStatus::BadRequest);
    }

    let file = File::open(&full).map_err(|e| {
        debug!(path = %full.display(), error = %e, "open failed after checks");
        HttpStatus::InternalFault
    })?;

    Ok(Document {
        len: meta.len(),
        path: full,
        file,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::Permissions;

    fn root() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let index = dir.path().join("index.html");
        fs::write(&index, "<h1>hi</h1>").unwrap();
        fs::set_permissions(&index, Permissions::from_mode(0o644)).unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        dir
    }

    #[test]
    fn existing_file_resolves() {
        let dir = root();
        let doc = resolve(dir.path(), "/index.html?x=1").unwrap();
        assert_eq!(doc.len, 11);
        assert_eq!(doc.content_type(), "text/html");
    }

    #[test]
    fn missing_file_is_not_found() {
        let dir = root();
        assert_eq!(resolve(dir.path(), "/nope.html").unwrap_err(), HttpStatus::NotFound);
    }

    #[test]
    fn directory_is_bad_request() {
        let dir = root();
        fs::set_permissions(dir.path().join("sub"), Permissions::from_mode(0o755)).unwrap();
        assert_eq!(resolve(dir.path(), "/sub").unwrap_err(), HttpStatus::BadRequest);
    }

    #[test]
    fn unreadable_file_is_forbidden() {
        let dir = root();
        let secret = dir.path().join("secret.html");
        fs::write(&secret, "x").unwrap();
        fs::set_permissions(&secret, Permissions::from_mode(0o600)).unwrap();
        assert_eq!(resolve(dir.path(), "/secret.html").unwrap_err(), HttpStatus::Forbidden);
    }

    #[test]
    fn parent_segments_never_escape() {
        let dir = root();
        assert_eq!(resolve(dir.path(), "/sub/../../x").unwrap_err(), HttpStatus::BadRequest);
    }
}
