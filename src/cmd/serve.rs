//! Build server command: `appforge serve`.

use anyhow::Result;
use appforge::config::AppForgeConfig;

pub async fn cmd_serve(config: &AppForgeConfig, open: bool) -> Result<()> {
    // Spawn browser open before starting the server (which blocks)
    if open && !config.server.dev_mode {
        let url = format!("http://{}:{}/health", config.server.host, config.server.port);
        tokio::spawn(async move {
            tokio::time::sleep(tokio::time::Duration::from_millis(500)).await;
            if let Err(e) = open::that(&url) {
                tracing::warn!(error = %e, "Failed to open browser");
            }
        });
    }

    appforge::pipeline::start_server(config).await
}
