//! One poll cycle: connect, ask for `status` and `stats`, disconnect.

use std::time::Duration;

use log::{debug, error};

use crate::{
    client::Client,
    error::ExporterError,
    games::{Game, Report},
    metrics,
};

/// The server to poll and how to talk to it.
#[derive(Debug, Clone)]
pub struct Target {
    pub host: String,
    pub port: u16,
    pub password: String,
    pub game: Game,
    pub timeout: Duration,
}

impl Target {
    /// `host:port`, the value of the `server` label.
    pub fn server(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Runs one poll cycle. The connection is never reused, every poll opens
/// its own.
pub async fn poll(target: &Target) -> Result<Report, ExporterError> {
    let client = Client::connect(&target.host, target.port, &target.password, target.timeout).await?;

    let replies = async {
        let status = client.command("status").await?;
        let stats = client.command("stats").await?;
        Ok::<_, ExporterError>((status, stats))
    }
    .await;
    client.disconnect().await;

    let (status, stats) = replies?;
    debug!(
        "{} answered status ({} bytes) and stats ({} bytes)",
        target.server(),
        status.len(),
        stats.len()
    );
    Ok(Report::parse(target.game, &status, &stats)?)
}

/// Polls `target` and renders the result. Failures are logged and reported
/// as a document that only says the server is unavailable.
pub async fn scrape(target: &Target) -> String {
    let server = target.server();
    let rendered = match poll(target).await {
        Ok(report) => metrics::render(&server, &report).map_err(ExporterError::from),
        Err(err) => Err(err),
    };

    match rendered {
        Ok(text) => text,
        Err(err) => {
            error!("error while fetching metrics from {}: {}", server, err);
            metrics::render_unavailable(&server, target.game).unwrap_or_else(|err| {
                error!("cannot render unavailable metrics: {}", err);
                String::new()
            })
        }
    }
}
