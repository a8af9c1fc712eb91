use crate::RelayMetric;
use parking_lot::Mutex;
use rusqlite::Connection;
use std::sync::Arc;

/// Durable destination of relay records. The schema is owned externally;
/// the gateway only bulk-inserts.
#[async_trait::async_trait]
pub trait MetricsSink: Send + Sync {
    async fn write_batch(&self, batch: Vec<RelayMetric>) -> anyhow::Result<()>;
}

const CREATE_TABLE: &str = "CREATE TABLE IF NOT EXISTS relay (
    request_id TEXT NOT NULL,
    application_id TEXT NOT NULL,
    app_public_key TEXT NOT NULL,
    blockchain TEXT NOT NULL,
    service_node TEXT,
    relay_start INTEGER NOT NULL,
    elapsed_ms INTEGER NOT NULL,
    result INTEGER NOT NULL,
    bytes INTEGER NOT NULL,
    delivered INTEGER NOT NULL,
    fallback INTEGER NOT NULL,
    method TEXT NOT NULL,
    error TEXT
)";

const INSERT_RELAY: &str = "INSERT INTO relay (
    request_id, application_id, app_public_key, blockchain, service_node,
    relay_start, elapsed_ms, result, bytes, delivered, fallback, method, error
) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)";

/// Relational sink writing the wide `relay` table. Writes run on the
/// blocking pool; the flush loop is the only caller.
pub struct SqliteSink {
    connection: Arc<Mutex<Connection>>,
}

impl SqliteSink {
    pub fn open(path: &str) -> anyhow::Result<SqliteSink> {
        let connection = Connection::open(path)?;
        connection.execute(CREATE_TABLE, [])?;
        Ok(SqliteSink { connection: Arc::new(Mutex::new(connection)) })
    }
}

#[async_trait::async_trait]
impl MetricsSink for SqliteSink {
    async fn write_batch(&self, batch: Vec<RelayMetric>) -> anyhow::Result<()> {
        let connection = self.connection.clone();
        tokio::task::spawn_blocking(move || -> anyhow::Result<()> {
            let mut connection = connection.lock();
            let tx = connection.transaction()?;
            {
                let mut statement = tx.prepare_cached(INSERT_RELAY)?;
                for record in &batch {
                    statement.execute(rusqlite::params![
                        record.request_id,
                        record.application_id,
                        record.app_public_key,
                        record.blockchain,
                        record.service_node,
                        record.relay_start.unix_timestamp(),
                        record.elapsed.whole_milliseconds() as i64,
                        record.result,
                        record.bytes as i64,
                        record.delivered,
                        record.fallback,
                        record.method,
                        record.error,
                    ])?;
                }
            }
            tx.commit()?;
            Ok(())
        })
        .await?
    }
}

pub mod testonly {
    use super::MetricsSink;
    use crate::RelayMetric;
    use parking_lot::Mutex;

    /// Sink keeping every record in memory for assertions.
    #[derive(Default)]
    pub struct CapturingSink {
        records: Mutex<Vec<RelayMetric>>,
    }

    impl CapturingSink {
        pub fn records(&self) -> Vec<RelayMetric> {
            self.records.lock().clone()
        }

        pub fn records_with_method(&self, method: &str) -> usize {
            self.records.lock().iter().filter(|record| record.method == method).count()
        }
    }

    #[async_trait::async_trait]
    impl MetricsSink for CapturingSink {
        async fn write_batch(&self, batch: Vec<RelayMetric>) -> anyhow::Result<()> {
            self.records.lock().extend(batch);
            Ok(())
        }
    }
}
