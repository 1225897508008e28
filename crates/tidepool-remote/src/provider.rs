//! RestBackend - IRemoteBackend implementation for the REST client
//!
//! Adapts [`RestClient`] to the remote port of `tidepool-core`, converting
//! [`RemoteError`](crate::RemoteError) into the shared `SyncError` taxonomy.

use tracing::instrument;

use tidepool_core::domain::{SyncError, SyncableRecord};
use tidepool_core::ports::IRemoteBackend;

use crate::client::RestClient;

/// Remote backend implementation that delegates to the REST client
pub struct RestBackend {
    client: RestClient,
}

impl RestBackend {
    /// Creates a new backend wrapping the given client
    pub fn new(client: RestClient) -> Self {
        Self { client }
    }

    /// Returns the wrapped client
    pub fn client(&self) -> &RestClient {
        &self.client
    }
}

#[async_trait::async_trait]
impl IRemoteBackend for RestBackend {
    #[instrument(skip(self))]
    async fn fetch_all(&self, table: &str) -> Result<Vec<SyncableRecord>, SyncError> {
        Ok(self.client.fetch_all(table).await?)
    }

    #[instrument(skip(self, records), fields(records = records.len()))]
    async fn upsert_batch(
        &self,
        table: &str,
        records: &[SyncableRecord],
        conflict_key: &str,
    ) -> Result<(), SyncError> {
        Ok(self.client.upsert(table, records, conflict_key).await?)
    }

    async fn health_check(&self) -> bool {
        self.client.health_check().await
    }

    async fn list_tables(&self) -> Result<Vec<String>, SyncError> {
        Ok(self.client.list_tables().await?)
    }

    async fn count_rows(&self, table: &str) -> Result<u64, SyncError> {
        Ok(self.client.count_rows(table).await?)
    }
}
