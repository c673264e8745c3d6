use std::{
  io::ErrorKind,
  path::{Path, PathBuf},
  sync::atomic::{AtomicU64, Ordering},
};

use tracing::{debug, warn};

use crate::Result;

static SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Directory that holds the artifacts of in-flight requests.
#[derive(Debug, Clone)]
pub struct ArtifactDir {
  root: PathBuf,
}

impl ArtifactDir {
  pub fn create(root: impl Into<PathBuf>) -> Result<Self> {
    let root = root.into();
    std::fs::create_dir_all(&root)?;
    Ok(Self { root })
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  /// Reserve a fresh `video_<token>.<container>` path. Nothing is written.
  pub fn allocate(&self, container: &str) -> Artifact {
    let stem = format!("video_{}", unique_token());
    let filename = format!("{stem}.{container}");
    Artifact {
      path: self.root.join(&filename),
      filename,
      stem,
    }
  }
}

// millisecond clock, process-wide sequence and a random salt, so that neither
// concurrent requests nor several processes sharing a temp dir collide.
fn unique_token() -> String {
  let millis = chrono::Utc::now().timestamp_millis();
  let seq = SEQUENCE.fetch_add(1, Ordering::Relaxed);
  let salt: u32 = rand::random();
  format!("{millis}-{seq}-{salt:08x}")
}

/// A temporary media file owned by exactly one request.
///
/// Dropping the artifact deletes the file together with any partial files
/// the extraction tool left next to it (`<name>.part`, `<stem>.f137.mp4`).
/// Since the guard cannot be cloned, the deletion happens exactly once,
/// whichever way the request ends.
#[derive(Debug)]
pub struct Artifact {
  path: PathBuf,
  filename: String,
  stem: String,
}

impl Artifact {
  pub fn path(&self) -> &Path {
    &self.path
  }

  /// Download name presented to the caller.
  pub fn filename(&self) -> &str {
    &self.filename
  }

  fn remove(&self) {
    match std::fs::remove_file(&self.path) {
      Ok(()) => debug!("deleted artifact {}", self.path.display()),
      Err(e) if e.kind() == ErrorKind::NotFound => {}
      Err(e) => warn!("failed to delete {}: {}", self.path.display(), e),
    }

    self.sweep_partials();
  }

  fn sweep_partials(&self) {
    let Some(dir) = self.path.parent() else {
      return;
    };
    let Ok(entries) = std::fs::read_dir(dir) else {
      return;
    };

    let prefix = format!("{}.", self.stem);
    for entry in entries.flatten() {
      if !entry.file_name().to_string_lossy().starts_with(&prefix) {
        continue;
      }

      let path = entry.path();
      match std::fs::remove_file(&path) {
        Ok(()) => debug!("deleted partial file {}", path.display()),
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => warn!("failed to delete {}: {}", path.display(), e),
      }
    }
  }
}

impl Drop for Artifact {
  fn drop(&mut self) {
    self.remove();
  }
}
