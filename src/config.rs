use std::{
  net::{IpAddr, SocketAddr},
  path::PathBuf,
  str::FromStr,
  time::Duration,
};

use anyhow::Context;
use tracing::warn;

const DEFAULT_BIND_ADDR: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 5002;
const DEFAULT_YTDLP: &str = "yt-dlp";
const DEFAULT_YTDLP_CONCURRENCY: usize = 2;
// subdirectory of the host temp dir, holding nothing but our artifacts
const DEFAULT_ARTIFACT_SUBDIR: &str = "media-fetch";

/// Service settings, read once from the environment at startup.
#[derive(Debug, Clone)]
pub struct Config {
  pub bind_addr: SocketAddr,
  pub ytdlp_path: PathBuf,
  // upper bound of yt-dlp processes running at the same time
  pub ytdlp_concurrency: usize,
  pub ytdlp_proxy: Option<String>,
  pub ytdlp_timeout: Option<Duration>,
  pub artifact_dir: PathBuf,
}

impl Config {
  pub fn from_env() -> anyhow::Result<Self> {
    Self::from_lookup(|key| std::env::var(key).ok())
  }

  fn from_lookup(
    lookup: impl Fn(&str) -> Option<String>,
  ) -> anyhow::Result<Self> {
    let var = |key: &str| {
      lookup(key)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
    };

    let ip: IpAddr = var("BIND_ADDR")
      .as_deref()
      .unwrap_or(DEFAULT_BIND_ADDR)
      .parse()
      .context("BIND_ADDR is not a valid IP address")?;
    let port = parse_or("PORT", var("PORT"), DEFAULT_PORT);

    let ytdlp_concurrency = parse_or(
      "YTDLP_CONCURRENCY",
      var("YTDLP_CONCURRENCY"),
      DEFAULT_YTDLP_CONCURRENCY,
    )
    .max(1);

    let ytdlp_timeout =
      match parse_or("YTDLP_TIMEOUT_SECS", var("YTDLP_TIMEOUT_SECS"), 0u64) {
        0 => None,
        secs => Some(Duration::from_secs(secs)),
      };

    Ok(Self {
      bind_addr: SocketAddr::new(ip, port),
      ytdlp_path: var("YTDLP_PATH")
        .unwrap_or_else(|| DEFAULT_YTDLP.to_string())
        .into(),
      ytdlp_concurrency,
      ytdlp_proxy: var("YTDLP_PROXY"),
      ytdlp_timeout,
      artifact_dir: var("ARTIFACT_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(default_artifact_dir),
    })
  }
}

fn default_artifact_dir() -> PathBuf {
  std::env::temp_dir().join(DEFAULT_ARTIFACT_SUBDIR)
}

fn parse_or<T: FromStr>(key: &str, value: Option<String>, default: T) -> T {
  let Some(value) = value else {
    return default;
  };

  value.parse().unwrap_or_else(|_| {
    warn!("ignoring invalid {key}={value:?}, using the default");
    default
  })
}
