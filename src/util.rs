use std::sync::LazyLock;

use itertools::Itertools;
use regex::Regex;

/// Upper bound for any piece of tool output echoed back to a caller.
pub const SNIPPET_CHARS: usize = 200;

// used to remove cred info from proxy urls before printing
static AUTH_REGEX: LazyLock<Regex> =
  LazyLock::new(|| Regex::new(r"//[^/\s:@]+(:[^/\s@]*)?@").unwrap());

// absolute filesystem paths, unix or windows style. Only matches at the start
// of a token so the `//host` part of urls is kept.
static PATH_REGEX: LazyLock<Regex> = LazyLock::new(|| {
  Regex::new(r#"(^|[\s'"(\[=])(?:/|[A-Za-z]:\\)[^\s'"()\[\]]*"#).unwrap()
});

/// First `max_chars` characters of the trimmed input.
pub fn snippet(s: &str, max_chars: usize) -> String {
  s.trim().chars().take(max_chars).collect()
}

pub fn redact_credentials(s: &str) -> String {
  AUTH_REGEX.replace_all(s, "//<REDACTED>@").into_owned()
}

pub fn redact_paths(s: &str) -> String {
  PATH_REGEX.replace_all(s, "${1}<path>").into_owned()
}

// yt-dlp prefixes its fatal diagnostics with "ERROR:". When it didn't, the
// last line it printed is the best description we have. The result is shown
// to callers, so file names under the artifact dir are masked too.
pub fn summarize_stderr(stderr: &str) -> String {
  let errors = stderr
    .lines()
    .map(str::trim)
    .filter(|line| line.starts_with("ERROR:"))
    .join(" ");

  let summary = if errors.is_empty() {
    stderr
      .lines()
      .map(str::trim)
      .filter(|line| !line.is_empty())
      .last()
      .unwrap_or_default()
      .to_string()
  } else {
    errors
  };

  snippet(&redact_paths(&redact_credentials(&summary)), SNIPPET_CHARS)
}
