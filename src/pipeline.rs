use std::sync::Arc;

use axum::response::Response;
use tracing::info;

use crate::artifact::ArtifactDir;
use crate::delivery::deliver;
use crate::invoker::Invoker;
use crate::materializer::Materializer;
use crate::metadata::{normalize, MediaDescriptor};
use crate::{Error, Result};

const MAX_CONTAINER_LEN: usize = 8;

/// A download request whose fields were checked before anything is spawned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
  pub url: String,
  pub format_id: String,
  pub container: String,
}

impl FetchRequest {
  pub fn new(url: &str, format_id: &str, container: &str) -> Result<Self> {
    let (url, format_id, container) =
      (url.trim(), format_id.trim(), container.trim());
    if url.is_empty() || format_id.is_empty() || container.is_empty() {
      return Err(Error::Validation("Missing parameters"));
    }

    // the container ends up in a file name
    let valid_container = container.len() <= MAX_CONTAINER_LEN
      && container.chars().all(|c| c.is_ascii_alphanumeric());
    if !valid_container {
      return Err(Error::Validation("Unsupported container format"));
    }

    Ok(Self {
      url: url.to_string(),
      format_id: format_id.to_string(),
      container: container.to_ascii_lowercase(),
    })
  }
}

/// The two operations exposed to the HTTP layer.
pub struct Pipeline {
  invoker: Arc<dyn Invoker>,
  materializer: Materializer,
}

impl Pipeline {
  pub fn new(invoker: Arc<dyn Invoker>, artifacts: ArtifactDir) -> Self {
    let materializer = Materializer::new(invoker.clone(), artifacts);
    Self {
      invoker,
      materializer,
    }
  }

  pub async fn describe(&self, url: &str) -> Result<MediaDescriptor> {
    let url = url.trim();
    if url.is_empty() {
      return Err(Error::Validation("No URL provided"));
    }

    info!("describing {}", url);
    let args = describe_args(url);
    let raw = self
      .invoker
      .invoke(&args)
      .await
      .map_err(Error::extraction_failed)?;

    normalize(&raw).map_err(Error::extraction_failed)
  }

  pub async fn fetch(
    &self,
    url: &str,
    format_id: &str,
    container: &str,
  ) -> Result<Response> {
    let request = FetchRequest::new(url, format_id, container)?;

    info!(
      "fetching {} ({}.{})",
      request.url, request.format_id, request.container
    );
    let artifact = self
      .materializer
      .materialize(&request.url, &request.format_id, &request.container)
      .await?;

    deliver(artifact, &request.container).await
  }
}

fn describe_args(url: &str) -> Vec<String> {
  ["--dump-json", "--no-playlist", "--", url]
    .into_iter()
    .map(String::from)
    .collect()
}

#[cfg(test)]
mod test {
  use axum::body::HttpBody;
  use http::{header, StatusCode};
  use serde_json::json;

  use super::*;
  use crate::invoker::mock::{output_path, ScriptedInvoker};
  use crate::metadata::MediaKind;

  const URL: &str = "https://example.com/video";

  fn pipeline(invoker: Arc<ScriptedInvoker>) -> (Pipeline, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let artifacts = ArtifactDir::create(dir.path()).unwrap();
    (Pipeline::new(invoker, artifacts), dir)
  }

  fn is_empty(dir: &tempfile::TempDir) -> bool {
    std::fs::read_dir(dir.path()).unwrap().next().is_none()
  }

  fn demo_json() -> String {
    json!({
      "title": "Demo",
      "formats": [
        {"format_id": "137", "ext": "mp4", "vcodec": "avc1", "acodec": "none", "height": 1080, "fps": 30},
        {"format_id": "140", "ext": "m4a", "vcodec": "none", "acodec": "mp4a.40.2"}
      ]
    })
    .to_string()
  }

  #[test]
  fn test_fetch_request_validation() {
    let request = FetchRequest::new(" https://a.b/c ", "137", "MP4").unwrap();
    assert_eq!(request.url, "https://a.b/c");
    assert_eq!(request.container, "mp4");

    for (url, format_id, container) in [
      ("", "137", "mp4"),
      (URL, "", "mp4"),
      (URL, "137", ""),
      (URL, "  ", "mp4"),
      (URL, "137", "../../etc/passwd"),
      (URL, "137", "m p4"),
      (URL, "137", "verylongext"),
    ] {
      let result = FetchRequest::new(url, format_id, container);
      assert!(
        matches!(result, Err(Error::Validation(_))),
        "{url:?} {format_id:?} {container:?}"
      );
    }
  }

  #[tokio::test]
  async fn test_describe() {
    let invoker = Arc::new(ScriptedInvoker::replying(&demo_json()));
    let (pipeline, _dir) = pipeline(invoker.clone());

    let descriptor = pipeline.describe(URL).await.unwrap();

    assert_eq!(descriptor.title, "Demo");
    let formats: Vec<_> = descriptor
      .formats
      .iter()
      .map(|f| (f.id.as_str(), f.label.as_str(), f.kind))
      .collect();
    assert_eq!(
      formats,
      [
        ("137", "1080p • 30fps", MediaKind::Video),
        ("140", "Audio Only", MediaKind::Audio)
      ]
    );
    assert_eq!(
      invoker.calls(),
      [["--dump-json", "--no-playlist", "--", URL]]
    );
  }

  #[tokio::test]
  async fn test_describe_is_idempotent() {
    let invoker = Arc::new(ScriptedInvoker::replying(&demo_json()));
    let (pipeline, _dir) = pipeline(invoker.clone());

    let first = pipeline.describe(URL).await.unwrap();
    let second = pipeline.describe(URL).await.unwrap();

    assert_eq!(first, second);
    // one subprocess per call, no retries
    assert_eq!(invoker.calls().len(), 2);
  }

  #[tokio::test]
  async fn test_describe_block_page() {
    let html = format!("<html><body>{}</body></html>", "blocked ".repeat(100));
    let invoker = Arc::new(ScriptedInvoker::replying(&html));
    let (pipeline, _dir) = pipeline(invoker);

    let err = pipeline.describe(URL).await.unwrap_err();

    assert!(matches!(err, Error::ExtractionFailed { .. }));
    assert!(err.status().is_server_error());
    let raw = err.raw().unwrap();
    assert!(raw.chars().count() <= 200);
    assert!(raw.starts_with("<html><body>blocked"));
  }

  #[tokio::test]
  async fn test_describe_tool_failure() {
    let invoker = Arc::new(ScriptedInvoker::new(|_| {
      Err(Error::ToolExecution {
        exit_code: Some(1),
        stderr: "ERROR: Video unavailable".to_string(),
      })
    }));
    let (pipeline, _dir) = pipeline(invoker);

    let err = pipeline.describe(URL).await.unwrap_err();

    assert!(matches!(err, Error::ExtractionFailed { raw: None, .. }));
    assert_eq!(
      err.public_message(),
      "Extraction failed: ERROR: Video unavailable"
    );
  }

  #[tokio::test]
  async fn test_describe_requires_url() {
    let invoker = Arc::new(ScriptedInvoker::replying("{}"));
    let (pipeline, _dir) = pipeline(invoker.clone());

    let err = pipeline.describe("  ").await.unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
    assert!(invoker.calls().is_empty());
  }

  #[tokio::test]
  async fn test_fetch_validation_spawns_nothing() {
    let invoker = Arc::new(ScriptedInvoker::replying(""));
    let (pipeline, dir) = pipeline(invoker.clone());

    let err = pipeline.fetch(URL, "", "mp4").await.unwrap_err();

    assert!(matches!(err, Error::Validation(_)));
    assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    assert!(invoker.calls().is_empty());
    assert!(is_empty(&dir));
  }

  #[tokio::test]
  async fn test_fetch_streams_and_cleans_up() {
    let invoker = Arc::new(ScriptedInvoker::new(|args| {
      std::fs::write(output_path(args).unwrap(), b"ID3 audio bytes")?;
      Ok(String::new())
    }));
    let (pipeline, dir) = pipeline(invoker.clone());

    let response = pipeline.fetch(URL, "140", "mp3").await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "audio/mpeg");
    let disposition = response.headers()[header::CONTENT_DISPOSITION]
      .to_str()
      .unwrap()
      .to_string();
    assert!(disposition.starts_with("attachment; filename=\"video_"));
    assert!(disposition.ends_with(".mp3\""));

    let calls = invoker.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0][..2], ["-f", "140+bestaudio/best"]);

    let mut body = response.into_body();
    let mut received = Vec::new();
    while let Some(chunk) = body.data().await {
      received.extend_from_slice(&chunk.unwrap());
    }
    assert_eq!(received, b"ID3 audio bytes");
    assert!(is_empty(&dir));
  }

  #[tokio::test]
  async fn test_fetch_tool_failure() {
    let invoker = Arc::new(ScriptedInvoker::new(|_| {
      Err(Error::ToolExecution {
        exit_code: Some(1),
        stderr: "Unsupported URL".to_string(),
      })
    }));
    let (pipeline, dir) = pipeline(invoker);

    let err = pipeline.fetch(URL, "137", "mp4").await.unwrap_err();

    assert!(matches!(err, Error::Materialization(_)));
    assert!(err.public_message().contains("Unsupported URL"));
    assert!(err.status().is_server_error());
    assert!(is_empty(&dir));
  }

  #[tokio::test]
  async fn test_fetch_cancelled_during_materialization() {
    let invoker = Arc::new(ScriptedInvoker::new(|args| {
      std::fs::write(output_path(args).unwrap(), b"partial")?;
      Ok(String::new())
    }));
    let (pipeline, dir) = pipeline(invoker);

    // polling once runs the (synchronous) mock and then the future is dropped
    // before it can hand the artifact to delivery
    let fut = pipeline.fetch(URL, "137", "mp4");
    let _ = futures::poll!(Box::pin(fut));

    assert!(is_empty(&dir));
  }
}
