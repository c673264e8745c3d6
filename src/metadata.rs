use serde::{de::DeserializeOwned, Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::util::{snippet, SNIPPET_CHARS};
use crate::{Error, Result};

const UNTITLED: &str = "Untitled";
const AUDIO_ONLY: &str = "Audio Only";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MediaDescriptor {
  pub title: String,
  pub thumbnail: Option<String>,
  // seconds
  pub duration: Option<f64>,
  pub formats: Vec<FormatOption>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
  Video,
  Audio,
}

/// One selectable encoding, as offered to the caller.
///
/// `id` is the opaque yt-dlp format identifier and is passed back verbatim
/// when fetching.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FormatOption {
  pub id: String,
  #[serde(rename = "display")]
  pub label: String,
  pub kind: MediaKind,
  #[serde(rename = "type")]
  pub container_type: String,
  pub codec: String,
  #[serde(rename = "filesize", skip_serializing_if = "Option::is_none")]
  pub approximate_size_bytes: Option<u64>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub height: Option<u32>,
  #[serde(rename = "fps", skip_serializing_if = "Option::is_none")]
  pub frame_rate: Option<f64>,
}

// The subset of `yt-dlp --dump-json` we rely on. Every field decodes
// leniently: a value of an unexpected type is treated as absent.
#[derive(Deserialize)]
struct YtdlpOutput {
  #[serde(default, deserialize_with = "lenient")]
  title: Option<String>,
  #[serde(default, deserialize_with = "lenient")]
  thumbnail: Option<String>,
  #[serde(default, deserialize_with = "lenient")]
  duration: Option<f64>,
  #[serde(default, deserialize_with = "lenient_seq")]
  formats: Vec<Format>,
}

#[derive(Deserialize)]
struct Format {
  #[serde(default, deserialize_with = "lenient")]
  format_id: Option<String>,
  #[serde(default, deserialize_with = "lenient")]
  format_note: Option<String>,
  #[serde(default, deserialize_with = "lenient")]
  ext: Option<String>,
  #[serde(default, deserialize_with = "lenient")]
  vcodec: Option<String>,
  #[serde(default, deserialize_with = "lenient")]
  acodec: Option<String>,
  #[serde(default, deserialize_with = "lenient")]
  height: Option<f64>,
  #[serde(default, deserialize_with = "lenient")]
  fps: Option<f64>,
  #[serde(default, deserialize_with = "lenient")]
  filesize: Option<f64>,
  #[serde(default, deserialize_with = "lenient")]
  filesize_approx: Option<f64>,
}

fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
  D: Deserializer<'de>,
  T: DeserializeOwned,
{
  let value = Value::deserialize(deserializer)?;
  Ok(serde_json::from_value(value).ok())
}

fn lenient_seq<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
  D: Deserializer<'de>,
  T: DeserializeOwned,
{
  let items = match Value::deserialize(deserializer)? {
    Value::Array(items) => items,
    _ => return Ok(Vec::new()),
  };

  Ok(
    items
      .into_iter()
      .filter_map(|item| serde_json::from_value(item).ok())
      .collect(),
  )
}

fn non_empty(s: &Option<String>) -> Option<&str> {
  s.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

fn positive(n: Option<f64>) -> Option<f64> {
  n.filter(|n| n.is_finite() && *n > 0.0)
}

impl Format {
  fn height(&self) -> Option<u32> {
    positive(self.height)
      .filter(|h| *h >= 1.0)
      .map(|h| h as u32)
  }

  fn size(&self) -> Option<u64> {
    positive(self.filesize)
      .or(positive(self.filesize_approx))
      .map(|size| size as u64)
  }

  fn vcodec(&self) -> Option<&str> {
    non_empty(&self.vcodec)
  }

  fn video_option(&self) -> Option<FormatOption> {
    // an absent vcodec is unknown, not "none"
    if self.vcodec() == Some("none") {
      return None;
    }

    let id = non_empty(&self.format_id)?;
    let ext = non_empty(&self.ext)?;
    let height = self.height()?;
    let fps = positive(self.fps);

    let mut label = match non_empty(&self.format_note) {
      Some(note) => note.to_string(),
      None => format!("{height}p"),
    };
    if let Some(fps) = fps {
      label.push_str(&format!(" • {fps}fps"));
    }

    Some(FormatOption {
      id: id.to_string(),
      label,
      kind: MediaKind::Video,
      container_type: format!("video/{ext}"),
      codec: self.vcodec().unwrap_or("unknown").to_string(),
      approximate_size_bytes: self.size(),
      height: Some(height),
      frame_rate: fps,
    })
  }

  fn audio_option(&self) -> Option<FormatOption> {
    if self.vcodec() != Some("none") {
      return None;
    }

    let acodec = non_empty(&self.acodec).filter(|codec| *codec != "none")?;
    let id = non_empty(&self.format_id)?;
    let ext = non_empty(&self.ext).unwrap_or("unknown");

    Some(FormatOption {
      id: id.to_string(),
      label: AUDIO_ONLY.to_string(),
      kind: MediaKind::Audio,
      container_type: format!("audio/{ext}"),
      codec: acodec.to_string(),
      approximate_size_bytes: self.size(),
      height: None,
      frame_rate: None,
    })
  }
}

impl From<YtdlpOutput> for MediaDescriptor {
  fn from(output: YtdlpOutput) -> Self {
    let mut formats: Vec<_> = output
      .formats
      .iter()
      .filter_map(Format::video_option)
      .collect();

    if let Some(audio) = output.formats.iter().find_map(Format::audio_option) {
      formats.push(audio);
    }

    Self {
      title: non_empty(&output.title).unwrap_or(UNTITLED).to_string(),
      thumbnail: non_empty(&output.thumbnail).map(str::to_string),
      duration: positive(output.duration),
      formats,
    }
  }
}

/// Parse the output of `yt-dlp --dump-json` into a [`MediaDescriptor`].
///
/// Only the first JSON document is considered, which covers tools that print
/// one document per playlist entry. Anything that is not a JSON object (an
/// HTML block page, an empty string) is reported as
/// [`Error::MalformedOutput`] together with a bounded snippet of the input.
pub fn normalize(raw: &str) -> Result<MediaDescriptor> {
  let malformed = || Error::MalformedOutput {
    snippet: snippet(raw, SNIPPET_CHARS),
  };

  let document = serde_json::Deserializer::from_str(raw)
    .into_iter::<Value>()
    .next()
    .and_then(|document| document.ok())
    .filter(Value::is_object)
    .ok_or_else(malformed)?;

  let output: YtdlpOutput =
    serde_json::from_value(document).map_err(|_| malformed())?;

  Ok(output.into())
}
