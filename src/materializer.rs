use std::{path::Path, sync::Arc};

use tracing::{info, warn};

use crate::artifact::{Artifact, ArtifactDir};
use crate::invoker::Invoker;
use crate::{Error, Result};

// containers yt-dlp can remux a merged download into without re-encoding
const MERGE_CONTAINERS: [&str; 4] = ["mp4", "mkv", "webm", "mov"];

/// Produces a local file for one format of a remote media URL.
pub struct Materializer {
  invoker: Arc<dyn Invoker>,
  artifacts: ArtifactDir,
}

impl Materializer {
  pub fn new(invoker: Arc<dyn Invoker>, artifacts: ArtifactDir) -> Self {
    Self { invoker, artifacts }
  }

  pub async fn materialize(
    &self,
    url: &str,
    format_id: &str,
    container: &str,
  ) -> Result<Artifact> {
    // from here on, any early return drops the guard and removes whatever
    // the tool managed to write
    let artifact = self.artifacts.allocate(container);
    let args = download_args(url, format_id, container, artifact.path());

    info!("materializing {} ({}) as {}", url, format_id, artifact.filename());
    if let Err(e) = self.invoker.invoke(&args).await {
      warn!("error materializing {}: {}", url, e);
      return Err(Error::Materialization(Box::new(e)));
    }

    let produced = tokio::fs::metadata(artifact.path())
      .await
      .map(|meta| meta.is_file())
      .unwrap_or(false);
    if !produced {
      warn!(
        "tool exited successfully without producing {}",
        artifact.filename()
      );
      return Err(Error::Materialization(Box::new(Error::ArtifactMissing {
        path: artifact.path().to_owned(),
      })));
    }

    Ok(artifact)
  }
}

// the selected format is always merged with the best audio track, so that
// video-only DASH formats still come with sound
fn download_args(
  url: &str,
  format_id: &str,
  container: &str,
  path: &Path,
) -> Vec<String> {
  let mut args = vec![
    "-f".to_string(),
    format!("{format_id}+bestaudio/best"),
    "--no-playlist".to_string(),
    "--no-progress".to_string(),
    "--no-mtime".to_string(),
  ];

  if MERGE_CONTAINERS.contains(&container) {
    args.push("--merge-output-format".to_string());
    args.push(container.to_string());
  }

  args.extend([
    "-o".to_string(),
    path.to_string_lossy().into_owned(),
    "--".to_string(),
    url.to_string(),
  ]);
  args
}
