use std::io;
use std::path::{Component, Path, PathBuf};

use crate::error::HandlerError;
use crate::http::{Request, Response};
use crate::route::{Handler, Params};

const INDEX: &str = "index.html";
const MISSING: &str = "File not found";

/// Serves files from a directory, using the request path as the file name.
///
/// An empty path serves `index.html`. A missing file is not an error: the
/// body becomes `File not found`. Other read failures propagate and turn
/// into a `500`.
#[derive(Debug, Clone)]
pub struct StaticFiles {
    root: PathBuf,
}

impl StaticFiles {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// File a request path maps to, or `None` if it would leave the root.
    fn resolve(&self, path: &str) -> Option<PathBuf> {
        let relative = Path::new(if path.is_empty() { INDEX } else { path });
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if escapes {
            return None;
        }
        Some(self.root.join(relative))
    }
}

impl Handler for StaticFiles {
    fn handle(&self, request: &Request, response: &mut Response, _: Params) -> Result<(), HandlerError> {
        let Some(file) = self.resolve(request.path()) else {
            log::debug!("refusing to serve /{} outside {}", request.path(), self.root.display());
            response.write(MISSING);
            return Ok(());
        };

        match std::fs::read(&file) {
            Ok(content) => response.write_bytes(content),
            Err(e) if e.kind() == io::ErrorKind::NotFound => response.write(MISSING),
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn serve(files: &StaticFiles, line: &str) -> Result<Vec<u8>, HandlerError> {
        let request = Request::new(line, None);
        let mut response = Response::new();
        files.handle(&request, &mut response, vec![])?;
        Ok(response.into_body())
    }

    /// Tests that files are read relative to the root and that an empty path serves the index.
    #[test]
    fn test_serves_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("index.html"), "<h1>home</h1>").unwrap();
        fs::create_dir(dir.path().join("css")).unwrap();
        fs::write(dir.path().join("css/main.css"), "body {}").unwrap();

        let files = StaticFiles::new(dir.path());
        assert_eq!(serve(&files, "GET / HTTP/1.1\r\n").unwrap(), b"<h1>home</h1>");
        assert_eq!(serve(&files, "GET /css/main.css HTTP/1.1\r\n").unwrap(), b"body {}");
    }

    /// Tests that files which are not UTF-8 are served byte for byte.
    #[test]
    fn test_serves_binary_files() {
        let dir = tempfile::tempdir().unwrap();
        let png = [0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a, 0xff, 0x00];
        fs::write(dir.path().join("logo.png"), png).unwrap();

        let files = StaticFiles::new(dir.path());
        assert_eq!(serve(&files, "GET /logo.png HTTP/1.1\r\n").unwrap(), png);
    }

    /// Tests that a missing file writes the fixed message instead of failing.
    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let files = StaticFiles::new(dir.path());

        assert_eq!(serve(&files, "GET /nope.html HTTP/1.1\r\n").unwrap(), b"File not found");
    }

    /// Tests that parent components never leave the root.
    #[test]
    fn test_rejects_traversal() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("secret"), "hidden").unwrap();
        let public = dir.path().join("public");
        fs::create_dir(&public).unwrap();

        let files = StaticFiles::new(&public);
        assert_eq!(serve(&files, "GET /../secret HTTP/1.1\r\n").unwrap(), b"File not found");
    }

    /// Tests that read failures other than a missing file propagate.
    #[test]
    fn test_other_io_errors_propagate() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("folder")).unwrap();
        let files = StaticFiles::new(dir.path());

        // reading a directory fails, but not with NotFound
        let err = serve(&files, "GET /folder HTTP/1.1\r\n").unwrap_err();
        assert!(matches!(err, HandlerError::Io(_)));
    }
}
