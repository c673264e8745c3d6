use std::{path::PathBuf, process::Stdio, sync::Arc, time::Duration};

use async_trait::async_trait;
use tokio::{
  process::{Child, Command},
  sync::Semaphore,
};
use tracing::{debug, warn};

use crate::config::Config;
use crate::util::redact_credentials;
use crate::{Error, Result};

use super::Invoker;

// run the yt-dlp executable directly, no shell in between.
pub struct Ytdlp {
  program: PathBuf,
  proxy: Option<String>,
  timeout: Option<Duration>,
  // ensure only a limited set of ytdlp processes at a time
  permits: Arc<Semaphore>,
}

impl Ytdlp {
  pub fn new(program: impl Into<PathBuf>) -> Self {
    Self {
      program: program.into(),
      proxy: None,
      timeout: None,
      permits: Arc::new(Semaphore::new(1)),
    }
  }

  pub fn from_config(config: &Config) -> Self {
    Self::new(&config.ytdlp_path)
      .with_proxy(config.ytdlp_proxy.clone())
      .with_timeout(config.ytdlp_timeout)
      .with_concurrency(config.ytdlp_concurrency)
  }

  pub fn with_proxy(self, proxy: Option<String>) -> Self {
    Self { proxy, ..self }
  }

  pub fn with_timeout(self, timeout: Option<Duration>) -> Self {
    Self { timeout, ..self }
  }

  pub fn with_concurrency(self, concurrency: usize) -> Self {
    Self {
      permits: Arc::new(Semaphore::new(concurrency.max(1))),
      ..self
    }
  }

  fn command(&self, args: &[String]) -> Command {
    let mut std_cmd = std::process::Command::new(&self.program);

    // options go first: callers end their argv with `-- <url>`
    if let Some(proxy) = &self.proxy {
      std_cmd.arg("--proxy").arg(proxy);
    }

    std_cmd
      .args(args)
      .stdin(Stdio::null())
      .stdout(Stdio::piped())
      .stderr(Stdio::piped());

    // own process group, so helpers the tool starts (the ffmpeg merger) can
    // be killed together with it
    #[cfg(unix)]
    {
      use std::os::unix::process::CommandExt;
      std_cmd.process_group(0);
    }

    let mut cmd = Command::from(std_cmd);
    // a dropped request must not leave the process running
    cmd.kill_on_drop(true);
    cmd
  }
}

// Kills the whole process group of a spawned tool when dropped, unless the
// tool was waited for to completion.
struct ProcessGroup {
  pgid: Option<u32>,
}

impl ProcessGroup {
  fn of(child: &Child) -> Self {
    Self { pgid: child.id() }
  }

  // the leader has been reaped; its id may be reused from now on
  fn release(mut self) {
    self.pgid = None;
  }
}

impl Drop for ProcessGroup {
  fn drop(&mut self) {
    let Some(pgid) = self.pgid.take() else {
      return;
    };

    #[cfg(unix)]
    {
      // SAFETY: kill(2) takes no pointers
      let rc = unsafe { libc::kill(-(pgid as libc::pid_t), libc::SIGKILL) };
      if rc == 0 {
        debug!(pgid, "killed extraction tool process group");
      }
    }
    #[cfg(not(unix))]
    let _ = pgid;
  }
}

#[async_trait]
impl Invoker for Ytdlp {
  async fn invoke(&self, args: &[String]) -> Result<String> {
    let mut cmd = self.command(args);

    let _permit = self
      .permits
      .acquire()
      .await
      .map_err(|_| std::io::Error::other("ytdlp semaphore closed"))?;

    debug!(
      program = %self.program.display(),
      args = %redact_credentials(&args.join(" ")),
      "spawning extraction tool"
    );

    let child = cmd.spawn().map_err(|source| Error::ToolSpawn {
      program: self.program.display().to_string(),
      source,
    })?;
    // an early return or a dropped future from here on takes the group down
    let group = ProcessGroup::of(&child);

    let output = match self.timeout {
      Some(limit) => {
        tokio::time::timeout(limit, child.wait_with_output())
          .await
          .map_err(|_| Error::ToolTimeout(limit))??
      }
      None => child.wait_with_output().await?,
    };
    group.release();

    if !output.status.success() {
      let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
      warn!(
        code = ?output.status.code(),
        stderr = %redact_credentials(stderr.trim()),
        "extraction tool failed"
      );
      return Err(Error::ToolExecution {
        exit_code: output.status.code(),
        stderr,
      });
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
  }
}
