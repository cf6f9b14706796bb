//! The trace artifact as seen by the upload and stats stages.

use std::io;
use std::path::{Path, PathBuf};

/// Content type used when the file extension maps to nothing more specific.
pub const DEFAULT_CONTENT_TYPE: &str = "binary/octet-stream";

/// A finished trace file, read-only from here on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceArtifact {
    pub cycle: u64,
    pub local_path: PathBuf,
    /// Exact size in bytes at inspection time; drives the transfer strategy.
    pub size: u64,
    /// `<hostname>/<basename>`
    pub remote_key: String,
    pub content_type: String,
}

impl TraceArtifact {
    /// Stats the file at `path` and derives its remote key and content type.
    pub async fn inspect(cycle: u64, path: &Path, hostname: &str) -> io::Result<Self> {
        let metadata = tokio::fs::metadata(path).await?;
        if !metadata.is_file() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} is not a regular file", path.display()),
            ));
        }
        Ok(Self {
            cycle,
            local_path: path.to_path_buf(),
            size: metadata.len(),
            remote_key: remote_key(hostname, path),
            content_type: content_type_for(path),
        })
    }
}

/// Remote object key for a local trace file.
pub fn remote_key(hostname: &str, path: &Path) -> String {
    let basename = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    format!("{}/{}", hostname, basename)
}

pub fn content_type_for(path: &Path) -> String {
    mime_guess::from_path(path)
        .first_raw()
        .unwrap_or(DEFAULT_CONTENT_TYPE)
        .to_string()
}

/// Name of this host, as used in remote keys.
pub fn local_hostname() -> io::Result<String> {
    let mut buf = [0u8; 256];
    let rc = unsafe { libc::gethostname(buf.as_mut_ptr().cast::<libc::c_char>(), buf.len()) };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    let len = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    let name = String::from_utf8_lossy(&buf[..len]).into_owned();
    if name.is_empty() {
        return Err(io::Error::new(io::ErrorKind::NotFound, "empty hostname"));
    }
    Ok(name)
}
