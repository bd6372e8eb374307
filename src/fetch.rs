//! Mirror-aware file resolution
//!
//! A [`FileRequest`] names a file by its path relative to a list of mirrors.
//! [`FileResolver::resolve`] turns it into one trustworthy local file:
//! local mirrors are used in place, remote ones are downloaded into a cache
//! directory when stale, and the result is optionally checked against a
//! detached `.asc` signature. Mirrors are tried strictly in order.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tracing::{debug, warn};

use crate::download::Downloader;
use crate::error::{Result, TidepkgError};

/// Checks a file against a detached signature
pub trait SignatureVerifier {
    /// True only if `signature` is a valid signature of `file` by the
    /// trusted key. Errors of any kind yield `false`.
    fn verify(&self, file: &Path, signature: &Path) -> bool;
}

/// A file to resolve from a list of mirrors
#[derive(Debug, Clone)]
pub struct FileRequest {
    /// Base locations (local paths, `file://` or remote URLs), in order
    pub mirrors: Vec<String>,
    /// Path relative to each mirror; a leading `./` is ignored
    pub relpath: String,
    /// Where remote files are cached
    pub cache_dir: PathBuf,
    /// Cache file name, if it differs from the URL's last component
    pub local_name: Option<String>,
    /// Require a valid detached signature
    pub verify: bool,
    /// Re-download cached copies older than this; `None` never expires
    pub expiry: Option<Duration>,
}

impl FileRequest {
    /// Request `relpath` from `mirrors`, cached under `cache_dir`
    pub fn new(mirrors: &[String], relpath: &str, cache_dir: &Path) -> Self {
        Self {
            mirrors: mirrors.to_vec(),
            relpath: relpath.to_string(),
            cache_dir: cache_dir.to_path_buf(),
            local_name: None,
            verify: false,
            expiry: None,
        }
    }

    /// Require signature verification
    pub fn verified(mut self, verify: bool) -> Self {
        self.verify = verify;
        self
    }

    /// Set the cache expiry window
    pub fn expiring(mut self, expiry: Option<Duration>) -> Self {
        self.expiry = expiry;
        self
    }

    /// Store the cached copy under a different name
    pub fn named(mut self, name: &str) -> Self {
        self.local_name = Some(name.to_string());
        self
    }

    /// File name of the requested file
    pub fn file_name(&self) -> &str {
        self.local_name
            .as_deref()
            .unwrap_or_else(|| self.relpath.rsplit('/').next().unwrap_or(&self.relpath))
    }
}

/// Resolves [`FileRequest`]s with a downloader and an optional verifier
#[derive(Clone)]
pub struct FileResolver {
    downloader: Arc<dyn Downloader>,
    verifier: Option<Arc<dyn SignatureVerifier>>,
}

impl FileResolver {
    pub fn new(downloader: Arc<dyn Downloader>, verifier: Option<Arc<dyn SignatureVerifier>>) -> Self {
        Self { downloader, verifier }
    }

    /// True if signature verification is available
    pub fn can_verify(&self) -> bool {
        self.verifier.is_some()
    }

    /// Resolve a request to a local path.
    ///
    /// Verification is skipped when the resolver has no verifier. When an
    /// artifact fails verification, cached copies of it and its signature
    /// are deleted; files on a local mirror are never touched.
    pub fn resolve(&self, request: &FileRequest) -> Result<PathBuf> {
        let relpath = request.relpath.trim_start_matches("./");

        for mirror in &request.mirrors {
            let url = format!("{}/{}", mirror.trim_end_matches('/'), relpath);
            debug!("URL is {}", url);

            match self.resolve_from(request, &url) {
                Ok(path) => return Ok(path),
                Err(e) => warn!("{}: {}", url, e),
            }
        }

        Err(TidepkgError::ResolutionFailure(request.relpath.clone()))
    }

    fn resolve_from(&self, request: &FileRequest, url: &str) -> Result<PathBuf> {
        let (path, local, downloaded) = match local_path(url) {
            Some(path) => {
                if !path.exists() {
                    return Err(TidepkgError::ResolutionFailure(format!("{} not found", path.display())));
                }
                debug!("Local: {}", path.display());
                (path, true, false)
            }
            None => {
                fs::create_dir_all(&request.cache_dir)?;
                let path = request.cache_dir.join(request.file_name());

                if is_stale(&path, request.expiry) {
                    if let Err(e) = self.downloader.download(url, &path) {
                        let _ = fs::remove_file(&path);
                        return Err(e);
                    }
                    (path, false, true)
                } else {
                    debug!("In cache: {}", path.display());
                    (path, false, false)
                }
            }
        };

        let verifier = match (&self.verifier, request.verify) {
            (Some(verifier), true) => verifier,
            _ => return Ok(path),
        };

        let sig_path = signature_path(&path);
        if !local && (downloaded || is_stale(&sig_path, request.expiry)) {
            let sig_url = format!("{}.asc", url);
            if let Err(e) = self.downloader.download(&sig_url, &sig_path) {
                debug!("No signature at {}: {}", sig_url, e);
                let _ = fs::remove_file(&sig_path);
            }
        }

        let failure = if !sig_path.exists() {
            TidepkgError::SignatureMissing(request.relpath.clone())
        } else if !verifier.verify(&path, &sig_path) {
            TidepkgError::SignatureInvalid(request.relpath.clone())
        } else {
            debug!("Verified: {}", path.display());
            return Ok(path);
        };

        if !local {
            let _ = fs::remove_file(&path);
            let _ = fs::remove_file(&sig_path);
        }
        Err(failure)
    }
}

impl fmt::Debug for FileResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileResolver")
            .field("verifier", &self.verifier.is_some())
            .finish()
    }
}

/// A file that is resolved only when needed
#[derive(Debug, Clone)]
pub struct FileHandle {
    request: FileRequest,
    resolver: FileResolver,
}

impl FileHandle {
    pub fn new(request: FileRequest, resolver: FileResolver) -> Self {
        Self { request, resolver }
    }

    /// The underlying request
    pub fn request(&self) -> &FileRequest {
        &self.request
    }

    /// Resolve (and if needed download and verify) the file
    pub fn resolve(&self) -> Result<PathBuf> {
        self.resolver.resolve(&self.request)
    }
}

/// Filesystem path for local mirror URLs; `None` for remote ones
fn local_path(url: &str) -> Option<PathBuf> {
    if let Some(path) = url.strip_prefix("file://") {
        return Some(PathBuf::from(path));
    }
    if url.contains("://") {
        None
    } else {
        Some(PathBuf::from(url))
    }
}

/// Detached signature path for a file: the file name plus `.asc`
pub fn signature_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".asc");
    path.with_file_name(name)
}

fn is_stale(path: &Path, expiry: Option<Duration>) -> bool {
    let modified = match fs::metadata(path).and_then(|m| m.modified()) {
        Ok(modified) => modified,
        Err(_) => return true,
    };

    match expiry {
        Some(expiry) => modified + expiry < SystemTime::now(),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::HashMap;

    /// Serves fixed content per URL and records every request
    #[derive(Default)]
    struct MockDownloader {
        files: HashMap<String, Vec<u8>>,
        requests: RefCell<Vec<String>>,
    }

    impl MockDownloader {
        fn with(mut self, url: &str, content: &str) -> Self {
            self.files.insert(url.to_string(), content.as_bytes().to_vec());
            self
        }
    }

    impl Downloader for MockDownloader {
        fn download(&self, url: &str, dest: &Path) -> Result<()> {
            self.requests.borrow_mut().push(url.to_string());
            match self.files.get(url) {
                Some(content) => {
                    fs::write(dest, content)?;
                    Ok(())
                }
                None => {
                    fs::write(dest, b"partial")?;
                    Err(TidepkgError::Download(format!("HTTP 404 from {}", url)))
                }
            }
        }
    }

    /// Accepts a signature whose content is "good"
    struct MockVerifier;

    impl SignatureVerifier for MockVerifier {
        fn verify(&self, _file: &Path, signature: &Path) -> bool {
            fs::read_to_string(signature).map(|s| s == "good").unwrap_or(false)
        }
    }

    fn resolver(downloader: &Arc<MockDownloader>, verify: bool) -> FileResolver {
        let verifier: Option<Arc<dyn SignatureVerifier>> = if verify { Some(Arc::new(MockVerifier)) } else { None };
        FileResolver::new(downloader.clone(), verifier)
    }

    #[test]
    fn test_fresh_cache_is_not_downloaded_again() {
        let cache = tempfile::tempdir().unwrap();
        let downloader = Arc::new(MockDownloader::default().with("http://mirror/repo/PACKAGES.TXT", "list"));
        let resolver = resolver(&downloader, false);

        let request = FileRequest::new(&["http://mirror/repo/".to_string()], "./PACKAGES.TXT", cache.path())
            .expiring(Some(Duration::from_secs(3600)));

        let first = resolver.resolve(&request).unwrap();
        let second = resolver.resolve(&request).unwrap();

        assert_eq!(first, second);
        assert_eq!(first, cache.path().join("PACKAGES.TXT"));
        assert_eq!(downloader.requests.borrow().len(), 1);
    }

    #[test]
    fn test_expired_cache_is_downloaded_again() {
        let cache = tempfile::tempdir().unwrap();
        let downloader = Arc::new(MockDownloader::default().with("http://mirror/PACKAGES.TXT", "list"));
        let resolver = resolver(&downloader, false);

        let path = cache.path().join("PACKAGES.TXT");
        fs::write(&path, "old").unwrap();
        let old = SystemTime::now() - Duration::from_secs(7200);
        fs::File::options().write(true).open(&path).unwrap().set_modified(old).unwrap();

        let mirrors = vec!["http://mirror".to_string()];
        let never = FileRequest::new(&mirrors, "PACKAGES.TXT", cache.path());
        resolver.resolve(&never).unwrap();
        assert!(downloader.requests.borrow().is_empty());

        let hourly = never.clone().expiring(Some(Duration::from_secs(3600)));
        resolver.resolve(&hourly).unwrap();
        assert_eq!(downloader.requests.borrow().len(), 1);
        assert_eq!(fs::read_to_string(&path).unwrap(), "list");
    }

    #[test]
    fn test_falls_back_to_next_mirror() {
        let cache = tempfile::tempdir().unwrap();
        let downloader = Arc::new(MockDownloader::default().with("http://second/foo.txz", "pkg"));
        let resolver = resolver(&downloader, false);

        let mirrors = vec!["http://first".to_string(), "http://second".to_string()];
        let path = resolver
            .resolve(&FileRequest::new(&mirrors, "foo.txz", cache.path()))
            .unwrap();

        assert_eq!(fs::read_to_string(path).unwrap(), "pkg");
        assert_eq!(*downloader.requests.borrow(), vec!["http://first/foo.txz", "http://second/foo.txz"]);
    }

    #[test]
    fn test_all_mirrors_failing_is_a_resolution_failure() {
        let cache = tempfile::tempdir().unwrap();
        let downloader = Arc::new(MockDownloader::default());
        let resolver = resolver(&downloader, false);

        let mirrors = vec!["http://first".to_string(), cache.path().join("nowhere").display().to_string()];
        let result = resolver.resolve(&FileRequest::new(&mirrors, "foo.txz", cache.path()));

        assert!(matches!(result, Err(TidepkgError::ResolutionFailure(_))));
        // Partial download removed
        assert!(!cache.path().join("foo.txz").exists());
    }

    #[test]
    fn test_verified_download() {
        let cache = tempfile::tempdir().unwrap();
        let downloader = Arc::new(
            MockDownloader::default()
                .with("http://mirror/CHECKSUMS.md5", "sums")
                .with("http://mirror/CHECKSUMS.md5.asc", "good"),
        );
        let resolver = resolver(&downloader, true);

        let request = FileRequest::new(&["http://mirror".to_string()], "CHECKSUMS.md5", cache.path()).verified(true);
        let path = resolver.resolve(&request).unwrap();

        assert!(path.exists());
        assert!(signature_path(&path).exists());
    }

    #[test]
    fn test_failed_verification_removes_downloads() {
        let cache = tempfile::tempdir().unwrap();
        let downloader = Arc::new(
            MockDownloader::default()
                .with("http://mirror/CHECKSUMS.md5", "sums")
                .with("http://mirror/CHECKSUMS.md5.asc", "forged"),
        );
        let resolver = resolver(&downloader, true);

        let request = FileRequest::new(&["http://mirror".to_string()], "CHECKSUMS.md5", cache.path()).verified(true);
        let result = resolver.resolve(&request);

        assert!(matches!(result, Err(TidepkgError::ResolutionFailure(_))));
        assert!(!cache.path().join("CHECKSUMS.md5").exists());
        assert!(!cache.path().join("CHECKSUMS.md5.asc").exists());
    }

    #[test]
    fn test_missing_signature_fails() {
        let cache = tempfile::tempdir().unwrap();
        let downloader = Arc::new(MockDownloader::default().with("http://mirror/foo.txz", "pkg"));
        let resolver = resolver(&downloader, true);

        let request = FileRequest::new(&["http://mirror".to_string()], "foo.txz", cache.path()).verified(true);
        assert!(resolver.resolve(&request).is_err());
        assert!(!cache.path().join("foo.txz").exists());
    }

    #[test]
    fn test_expired_signature_is_downloaded_again() {
        let cache = tempfile::tempdir().unwrap();
        let downloader = Arc::new(
            MockDownloader::default()
                .with("http://mirror/CHECKSUMS.md5", "sums")
                .with("http://mirror/CHECKSUMS.md5.asc", "good"),
        );
        let resolver = resolver(&downloader, true);

        // Fresh artifact, signature left over from an older sync
        fs::write(cache.path().join("CHECKSUMS.md5"), "sums").unwrap();
        let sig = cache.path().join("CHECKSUMS.md5.asc");
        fs::write(&sig, "forged").unwrap();
        let old = SystemTime::now() - Duration::from_secs(7200);
        fs::File::options().write(true).open(&sig).unwrap().set_modified(old).unwrap();

        let request = FileRequest::new(&["http://mirror".to_string()], "CHECKSUMS.md5", cache.path())
            .verified(true)
            .expiring(Some(Duration::from_secs(3600)));
        let path = resolver.resolve(&request).unwrap();

        assert_eq!(*downloader.requests.borrow(), vec!["http://mirror/CHECKSUMS.md5.asc"]);
        assert_eq!(fs::read_to_string(signature_path(&path)).unwrap(), "good");
    }

    #[test]
    fn test_local_file_failing_verification_is_kept() {
        let mirror = tempfile::tempdir().unwrap();
        let cache = tempfile::tempdir().unwrap();
        fs::write(mirror.path().join("foo.txz"), "pkg").unwrap();
        fs::write(mirror.path().join("foo.txz.asc"), "forged").unwrap();

        let downloader = Arc::new(MockDownloader::default());
        let resolver = resolver(&downloader, true);

        let mirrors = vec![format!("file://{}", mirror.path().display())];
        let request = FileRequest::new(&mirrors, "foo.txz", cache.path()).verified(true);

        assert!(resolver.resolve(&request).is_err());
        assert!(mirror.path().join("foo.txz").exists());
        assert!(mirror.path().join("foo.txz.asc").exists());
        assert!(downloader.requests.borrow().is_empty());
    }

    #[test]
    fn test_local_mirror_is_used_in_place() {
        let mirror = tempfile::tempdir().unwrap();
        let cache = tempfile::tempdir().unwrap();
        fs::create_dir_all(mirror.path().join("a")).unwrap();
        fs::write(mirror.path().join("a/foo.txz"), "pkg").unwrap();

        let downloader = Arc::new(MockDownloader::default());
        let resolver = resolver(&downloader, false);

        let mirrors = vec![mirror.path().display().to_string()];
        let path = resolver
            .resolve(&FileRequest::new(&mirrors, "./a/foo.txz", cache.path()))
            .unwrap();

        assert_eq!(path, mirror.path().join("a/foo.txz"));
    }
}
