mod ytdlp;

use async_trait::async_trait;

use crate::Result;

pub use ytdlp::Ytdlp;

/// Runs the extraction tool once with a literal argument vector.
///
/// Implementations return the captured standard output on a zero exit status
/// and never retry.
#[async_trait]
pub trait Invoker: Send + Sync {
  async fn invoke(&self, args: &[String]) -> Result<String>;
}

#[cfg(test)]
pub mod mock {
  use std::sync::Mutex;

  use async_trait::async_trait;

  use crate::Result;

  use super::Invoker;

  type Script = Box<dyn Fn(&[String]) -> Result<String> + Send + Sync>;

  /// Test double that answers every invocation through a closure and
  /// remembers the argument vectors it was called with.
  pub struct ScriptedInvoker {
    script: Script,
    calls: Mutex<Vec<Vec<String>>>,
  }

  impl ScriptedInvoker {
    pub fn new(
      script: impl Fn(&[String]) -> Result<String> + Send + Sync + 'static,
    ) -> Self {
      Self {
        script: Box::new(script),
        calls: Mutex::new(Vec::new()),
      }
    }

    pub fn replying(stdout: &str) -> Self {
      let stdout = stdout.to_string();
      Self::new(move |_| Ok(stdout.clone()))
    }

    pub fn calls(&self) -> Vec<Vec<String>> {
      self.calls.lock().unwrap().clone()
    }
  }

  #[async_trait]
  impl Invoker for ScriptedInvoker {
    async fn invoke(&self, args: &[String]) -> Result<String> {
      self.calls.lock().unwrap().push(args.to_vec());
      (self.script)(args)
    }
  }

  /// Value following `-o` in a download invocation.
  pub fn output_path(args: &[String]) -> Option<&str> {
    args
      .iter()
      .position(|arg| arg == "-o")
      .and_then(|i| args.get(i + 1))
      .map(String::as_str)
  }
}
