use std::sync::Arc;

use anyhow::Context;

use govsync_infra::SyncConfig;
use govsync_infra::jobs::SyncJobs;
use govsync_infra::store::{InMemorySyncStore, PostgresSyncStore};
use govsync_infra::upstream::{HttpLedgerApi, HttpLedgerApiConfig, LedgerApi};

/// Shared state handed to every handler.
pub struct AppServices {
    pub jobs: Arc<SyncJobs>,
}

impl AppServices {
    pub fn new(jobs: Arc<SyncJobs>) -> Self {
        Self { jobs }
    }
}

/// Wire the store and upstream selected by `config`.
///
/// Without `DATABASE_URL` everything runs on the in-memory store, which is
/// neither shared between instances nor durable.
pub async fn build_services(config: &SyncConfig) -> anyhow::Result<AppServices> {
    let api: Arc<dyn LedgerApi> = Arc::new(
        HttpLedgerApi::new(HttpLedgerApiConfig {
            base_url: config.upstream_url.clone(),
            bearer_token: config.upstream_token.clone(),
            timeout: config.upstream_timeout,
        })
        .context("upstream client")?,
    );

    let jobs = match config.database_url.as_deref() {
        Some(url) => {
            let store = PostgresSyncStore::connect(url)
                .await
                .context("connect to DATABASE_URL")?;
            tracing::info!("using postgres sync store");
            SyncJobs::new(Arc::new(store), api, config)
        }
        None => {
            tracing::warn!("DATABASE_URL not set; using in-memory store (single instance, not durable)");
            SyncJobs::new(Arc::new(InMemorySyncStore::new()), api, config)
        }
    };

    Ok(AppServices::new(Arc::new(jobs)))
}
