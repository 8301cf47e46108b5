use std::future::Future;
use std::time::Duration;
use anyhow::Result;
use log::{info, warn};
use reqwest::Client;
use crate::config::PipelineConfig;

const REFRESH_TIMEOUT: Duration = Duration::from_secs(5);

/// Library refresh collaborator. Fire-and-forget: failures are logged, never returned.
pub trait LibraryNotifier {
    fn refresh(&self) -> impl Future<Output = ()>;
}

/// Triggers a section refresh on a Plex server for each configured section
pub struct PlexNotifier {
    client: Client,
    /// (section id, refresh URL); the URL carries the token and is never logged
    targets: Vec<(u32, String)>,
}

impl PlexNotifier {
    pub fn new(targets: Vec<(u32, String)>) -> Result<Self> {
        let client = Client::builder().timeout(REFRESH_TIMEOUT).build()?;
        Ok(Self { client, targets })
    }

    pub fn from_config(cfg: &PipelineConfig) -> Result<Self> {
        let targets = cfg
            .plex
            .sections
            .iter()
            .copied()
            .zip(cfg.plex_refresh_urls())
            .collect();
        Self::new(targets)
    }

    pub fn sections(&self) -> impl Iterator<Item = u32> + '_ {
        self.targets.iter().map(|(section, _)| *section)
    }
}

impl LibraryNotifier for PlexNotifier {
    async fn refresh(&self) {
        for (section, url) in &self.targets {
            match self.client.get(url).send().await {
                Ok(response) if response.status().is_success() => {
                    info!("Plex library section {} refresh requested", section);
                }
                Ok(response) => {
                    warn!("Plex refresh for section {} returned {}", section, response.status());
                }
                Err(e) => {
                    warn!("Plex refresh for section {} failed: {}", section, e.without_url());
                }
            }
        }
    }
}
