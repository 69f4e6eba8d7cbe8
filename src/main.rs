use tokio::io::AsyncWriteExt;

use warden::{Config, Handler, HttpServer, Request, Response, StatusCode, async_trait};

/// Answers every request with a short plain-text greeting.
struct Hello;

#[async_trait]
impl Handler for Hello {
    async fn process(&self, request: &mut Request, response: &mut Response<'_>) -> anyhow::Result<()> {
        let body = format!("Hello from Warden\n{} {}\n", request.method(), request.path());
        let length = body.len().to_string();
        response
            .write_head(
                StatusCode::Ok,
                &[("Content-Type", "text/plain"), ("Content-Length", &length), ("Connection", "close")],
            )
            .await?;
        response.write_all(body.as_bytes()).await?;
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .init();

    let cfg = Config::load()?;

    let mut server = HttpServer::with_config(cfg);
    server.register("/", Hello);
    server.start().await?;

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received");
    server.stop().await;

    Ok(())
}
