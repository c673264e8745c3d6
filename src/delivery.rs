use std::{
  io,
  pin::Pin,
  task::{Context, Poll},
};

use axum::{
  body::{boxed, StreamBody},
  response::Response,
};
use bytes::Bytes;
use futures::Stream;
use http::{header, StatusCode};
use tokio::fs::File;
use tokio_util::io::ReaderStream;
use tracing::{debug, error, info};

use crate::artifact::Artifact;
use crate::Result;

pub fn content_type(container: &str) -> &'static str {
  if container.eq_ignore_ascii_case("mp3") {
    "audio/mpeg"
  } else {
    "video/mp4"
  }
}

/// Stream the artifact to the caller, deleting it once the body is done.
///
/// Failures while opening the file happen before any header is sent and are
/// returned as errors. Once the response is handed out, a read failure can
/// only abort the body; it is logged here.
pub async fn deliver(artifact: Artifact, container: &str) -> Result<Response> {
  let file = File::open(artifact.path()).await?;
  let len = file.metadata().await?.len();

  let disposition = format!("attachment; filename=\"{}\"", artifact.filename());
  let stream = ArtifactStream::new(ReaderStream::new(file), artifact);

  let response = http::Response::builder()
    .status(StatusCode::OK)
    .header(header::CONTENT_TYPE, content_type(container))
    .header(header::CONTENT_DISPOSITION, disposition)
    .header(header::CONTENT_LENGTH, len)
    .body(boxed(StreamBody::new(stream)))?;

  Ok(response)
}

/// Byte stream that owns the artifact it reads from.
///
/// The artifact is released on the first terminal event: end of file, a read
/// error, or the stream being dropped early because the caller went away.
pub struct ArtifactStream<S> {
  // declared before `artifact` so the file handle is closed first
  inner: Option<S>,
  artifact: Option<Artifact>,
  polled: bool,
  sent: u64,
}

impl<S> ArtifactStream<S> {
  pub fn new(inner: S, artifact: Artifact) -> Self {
    Self {
      inner: Some(inner),
      artifact: Some(artifact),
      polled: false,
      sent: 0,
    }
  }

  fn finish(&mut self) {
    self.inner = None;
    self.artifact = None;
  }
}

impl<S> Stream for ArtifactStream<S>
where
  S: Stream<Item = io::Result<Bytes>> + Unpin,
{
  type Item = io::Result<Bytes>;

  fn poll_next(
    mut self: Pin<&mut Self>,
    cx: &mut Context<'_>,
  ) -> Poll<Option<Self::Item>> {
    let this = &mut *self;
    this.polled = true;
    let Some(inner) = this.inner.as_mut() else {
      return Poll::Ready(None);
    };

    match Pin::new(inner).poll_next(cx) {
      Poll::Ready(Some(Ok(bytes))) => {
        this.sent += bytes.len() as u64;
        Poll::Ready(Some(Ok(bytes)))
      }
      Poll::Ready(Some(Err(err))) => {
        // headers are already out, all we can do is cut the body short
        error!("artifact stream failed after {} bytes: {}", this.sent, err);
        this.finish();
        Poll::Ready(Some(Err(err)))
      }
      Poll::Ready(None) => {
        debug!("artifact stream completed, {} bytes sent", this.sent);
        this.finish();
        Poll::Ready(None)
      }
      Poll::Pending => Poll::Pending,
    }
  }
}

impl<S> Drop for ArtifactStream<S> {
  fn drop(&mut self) {
    let Some(artifact) = &self.artifact else {
      return;
    };

    if self.polled {
      info!(
        "caller went away after {} bytes, discarding {}",
        self.sent,
        artifact.filename()
      );
    } else {
      debug!("body never streamed, discarding {}", artifact.filename());
    }
  }
}
