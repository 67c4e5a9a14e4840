use anyhow::Result;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Image types accepted for profile pictures.
pub const ALLOWED_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif"];

/// URL prefix the upload directory is served under.
pub const PUBLIC_PREFIX: &str = "/static/uploads";

/// Local directory holding uploaded profile pictures.
///
/// Writes are synchronous; callers run them on a blocking thread, inside the
/// same transaction that records the user.
pub struct Uploads {
    dir: PathBuf,
}

impl Uploads {
    pub fn new(dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&dir)?;
        info!("Upload directory: {}", dir.display());
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write `bytes` as `filename` and return the public path to record.
    pub fn save(&self, filename: &str, bytes: &[u8]) -> Result<String> {
        std::fs::write(self.dir.join(filename), bytes)?;
        Ok(format!("{}/{}", PUBLIC_PREFIX, filename))
    }

    pub fn remove(&self, filename: &str) {
        match std::fs::remove_file(self.dir.join(filename)) {
            Ok(()) => info!("Removed upload {}", filename),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove upload {}: {}", filename, e),
        }
    }
}

/// Lowercased extension of `original_name` if it is on the allow-list.
pub fn allowed_extension(original_name: &str) -> Option<String> {
    let ext = Path::new(original_name).extension()?.to_str()?.to_ascii_lowercase();
    ALLOWED_EXTENSIONS.contains(&ext.as_str()).then_some(ext)
}

/// `<username>-<id>.<ext>`, with anything outside `[A-Za-z0-9_-]` in the
/// username replaced by `_`. The id keeps names unique after replacement.
pub fn profile_filename(username: &str, user_id: i64, ext: &str) -> String {
    let safe: String = username
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    format!("{}-{}.{}", safe, user_id, ext)
}
