use std::sync::Arc;

use tracing::info;

mod api;
mod artifact;
mod config;
mod delivery;
mod error;
mod invoker;
mod logging;
mod materializer;
mod metadata;
mod pipeline;
mod util;

pub use error::{Error, Result};

use crate::{
  api::AppState, artifact::ArtifactDir, config::Config, invoker::Ytdlp,
  pipeline::Pipeline,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  logging::init();

  let config = Config::from_env()?;
  let artifacts = ArtifactDir::create(&config.artifact_dir)?;
  info!("storing artifacts in {}", artifacts.root().display());

  let ytdlp = Ytdlp::from_config(&config);
  let pipeline = Pipeline::new(Arc::new(ytdlp), artifacts);
  let app = api::router(AppState::new(pipeline));

  info!("Listening on {}", config.bind_addr);

  axum::Server::try_bind(&config.bind_addr)?
    .serve(app.into_make_service())
    .with_graceful_shutdown(shutdown_signal())
    .await?;

  info!("server stopped");
  Ok(())
}

async fn shutdown_signal() {
  let ctrl_c = async {
    if let Err(e) = tokio::signal::ctrl_c().await {
      tracing::error!("failed to listen for ctrl-c: {}", e);
      std::future::pending::<()>().await;
    }
  };

  #[cfg(unix)]
  let terminate = async {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
      Ok(mut sigterm) => {
        sigterm.recv().await;
      }
      Err(e) => {
        tracing::error!("failed to listen for SIGTERM: {}", e);
        std::future::pending::<()>().await;
      }
    }
  };

  #[cfg(not(unix))]
  let terminate = std::future::pending::<()>();

  tokio::select! {
    _ = ctrl_c => {},
    _ = terminate => {},
  }

  info!("shutting down");
}
