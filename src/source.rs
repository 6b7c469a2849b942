//! Source file loading.

use bytes::Bytes;
use std::path::{Path, PathBuf};

use crate::protocol::Request;

/// A source file read from disk, byte for byte.
#[derive(Debug, Clone)]
pub struct SourceFile {
    path: PathBuf,
    contents: Bytes,
}

impl SourceFile {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SourceError> {
        let path = path.as_ref().to_path_buf();
        let contents = match std::fs::read(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(SourceError::NotFound(path))
            }
            Err(e) => return Err(SourceError::Read(path, e)),
        };

        Ok(Self {
            path,
            contents: contents.into(),
        })
    }

    /// The path as given, which is what the `Filename` header carries.
    pub fn filename(&self) -> String {
        self.path.display().to_string()
    }

    pub fn contents(&self) -> &Bytes {
        &self.contents
    }

    pub fn into_request(self, origin: impl Into<String>) -> Request {
        let filename = self.filename();
        Request::new(self.contents, filename, origin)
    }
}

/// Source loading errors
#[derive(Debug)]
pub enum SourceError {
    NotFound(PathBuf),
    Read(PathBuf, std::io::Error),
}

impl std::fmt::Display for SourceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceError::NotFound(path) => write!(f, "File '{}' does not exist", path.display()),
            SourceError::Read(path, e) => {
                write!(f, "Failed to read file '{}': {}", path.display(), e)
            }
        }
    }
}

impl std::error::Error for SourceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SourceError::NotFound(_) => None,
            SourceError::Read(_, e) => Some(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_exact_bytes() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"# -*- coding: latin-1 -*-\nprint('\xe9')\r\n").unwrap();

        let source = SourceFile::load(file.path()).unwrap();
        assert_eq!(
            &source.contents()[..],
            b"# -*- coding: latin-1 -*-\nprint('\xe9')\r\n"
        );
        assert_eq!(source.filename(), file.path().display().to_string());

        let request = source.into_request("Test");
        assert_eq!(request.filename, file.path().display().to_string());
        assert_eq!(request.origin, "Test");
        assert_eq!(request.payload.len(), 38);
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.py");

        match SourceFile::load(&path) {
            Err(SourceError::NotFound(p)) => assert_eq!(p, path),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_unreadable_path_is_not_not_found() {
        // Reading a directory fails, but the path exists.
        let dir = tempfile::tempdir().unwrap();

        match SourceFile::load(dir.path()) {
            Err(SourceError::Read(p, _)) => assert_eq!(p, dir.path()),
            other => panic!("unexpected: {:?}", other),
        }
    }
}
