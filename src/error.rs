use std::{path::PathBuf, time::Duration};

use axum::{
  response::{IntoResponse, Response},
  Json,
};
use http::StatusCode;
use serde::Serialize;
use tracing::error;

use crate::util::summarize_stderr;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
  #[error("failed to start {program}: {source}")]
  ToolSpawn {
    program: String,
    #[source]
    source: std::io::Error,
  },

  #[error(
    "extraction tool exited with {}: {}",
    describe_exit(.exit_code),
    summarize_stderr(.stderr)
  )]
  ToolExecution {
    exit_code: Option<i32>,
    stderr: String,
  },

  #[error("extraction tool timed out after {0:?}")]
  ToolTimeout(Duration),

  #[error("extraction tool returned malformed output: {snippet:?}")]
  MalformedOutput { snippet: String },

  #[error(
    "extraction tool reported success but {} is missing",
    .path.display()
  )]
  ArtifactMissing { path: PathBuf },

  #[error("materialization failed: {0}")]
  Materialization(#[source] Box<Error>),

  #[error("{0}")]
  Validation(&'static str),

  #[error("{message}")]
  ExtractionFailed {
    message: String,
    raw: Option<String>,
  },

  #[error(transparent)]
  IO(#[from] std::io::Error),

  #[error(transparent)]
  Http(#[from] http::Error),
}

fn describe_exit(code: &Option<i32>) -> String {
  match code {
    Some(code) => format!("code {code}"),
    None => "a signal".to_string(),
  }
}

#[derive(Serialize)]
struct ErrorBody {
  error: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  raw: Option<String>,
}

impl Error {
  /// Wraps any pipeline failure of `describe` into the caller-facing shape.
  pub fn extraction_failed(err: Error) -> Self {
    match err {
      err @ (Error::Validation(_) | Error::ExtractionFailed { .. }) => err,
      err => Error::ExtractionFailed {
        message: err.public_message(),
        raw: err.raw().map(str::to_owned),
      },
    }
  }

  /// Message that is safe to show to the caller. Never contains paths or
  /// unbounded tool output.
  pub fn public_message(&self) -> String {
    match self {
      Error::ToolSpawn { .. } => "Extraction tool is unavailable".to_string(),
      Error::ToolExecution { exit_code, stderr } => {
        let summary = summarize_stderr(stderr);
        if summary.is_empty() {
          format!("Extraction failed with {}", describe_exit(exit_code))
        } else {
          format!("Extraction failed: {summary}")
        }
      }
      Error::ToolTimeout(_) => "Extraction tool timed out".to_string(),
      Error::MalformedOutput { .. } => {
        "Extraction tool did not return valid JSON".to_string()
      }
      Error::ArtifactMissing { .. } => {
        "Download failed, file not found.".to_string()
      }
      Error::Materialization(cause) => cause.public_message(),
      Error::Validation(message) => message.to_string(),
      Error::ExtractionFailed { message, .. } => message.clone(),
      Error::IO(_) | Error::Http(_) => "Something went wrong!".to_string(),
    }
  }

  /// Bounded snippet of unparseable tool output, if any.
  pub fn raw(&self) -> Option<&str> {
    match self {
      Error::MalformedOutput { snippet } => Some(snippet),
      Error::ExtractionFailed { raw, .. } => raw.as_deref(),
      Error::Materialization(cause) => cause.raw(),
      _ => None,
    }
  }

  pub fn status(&self) -> StatusCode {
    match self {
      Error::Validation(_) => StatusCode::BAD_REQUEST,
      _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
  }
}

impl IntoResponse for Error {
  fn into_response(self) -> Response {
    let status = self.status();
    if status.is_server_error() {
      error!(error = %self, "request failed");
    }

    let body = ErrorBody {
      error: self.public_message(),
      raw: self.raw().map(str::to_owned),
    };
    (status, Json(body)).into_response()
  }
}
