//! Lakehouse Sink Connector implementation
//!
//! Consumes the message stream in arrival order, buffers records per stream
//! and flushes them through staged bulk loads. Checkpoints are written to
//! the output only once every record they cover has been loaded.

use crate::batch_file::{write_batch, BatchCompression};
use crate::clock::{Clock, SystemClock};
use crate::config::{LakehouseSinkConfig, ValidationFailure};
use crate::dialect::{columns_of, SparkIcebergDialect, SqlDialect, TableRef};
use crate::engine::{HttpSqlEngine, StatementExecutor};
use crate::error::{SinkError, SinkResult};
use crate::message::Message;
use crate::staging::{ObjectStoreStaging, StagingTransport};
use crate::state::CheckpointTracker;
use crate::stream::{Admitted, Batch, Rejection, StreamId, StreamOptions, StreamState};
use crate::table_sync::TableSynchronizer;
use futures::StreamExt;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{debug, error, info, warn};

/// Collaborators shared by the per-stream flush pipelines of one pass
struct FlushContext {
    synchronizer: Arc<TableSynchronizer>,
    staging: Arc<dyn StagingTransport>,
    compression: BatchCompression,
    temp_dir: Option<PathBuf>,
    hard_delete: bool,
}

/// Lakehouse Sink Connector
///
/// Owns every stream buffer; the synchronizer and staging transport only see
/// detached batches.
pub struct LakehouseSinkConnector {
    /// Connector configuration
    config: LakehouseSinkConfig,

    /// Stream states (stream name -> schema and buffer)
    streams: HashMap<String, StreamState>,

    /// Target schemas already ensured in this process
    ensured_schemas: HashSet<String>,

    checkpoint: CheckpointTracker,

    context: FlushContext,

    clock: Arc<dyn Clock>,

    /// Time of the last flush pass (for the wait-limit trigger)
    last_flush_time: Instant,

    flush_passes: usize,

    /// Destination of emitted state payloads
    output: Box<dyn Write + Send>,
}

impl LakehouseSinkConnector {
    pub fn new(
        config: LakehouseSinkConfig,
        executor: Arc<dyn StatementExecutor>,
        staging: Arc<dyn StagingTransport>,
        dialect: Arc<dyn SqlDialect>,
        clock: Arc<dyn Clock>,
        output: Box<dyn Write + Send>,
    ) -> Self {
        let synchronizer = Arc::new(TableSynchronizer::new(executor, dialect, clock.clone()));
        let context = FlushContext {
            synchronizer,
            staging,
            compression: if config.no_compression {
                BatchCompression::None
            } else {
                BatchCompression::Gzip
            },
            temp_dir: config.temp_dir.clone(),
            hard_delete: config.hard_delete,
        };

        Self {
            last_flush_time: clock.now(),
            config,
            streams: HashMap::new(),
            ensured_schemas: HashSet::new(),
            checkpoint: CheckpointTracker::new(),
            context,
            clock,
            flush_passes: 0,
            output,
        }
    }

    /// Connect to the configured lakehouse endpoint and staging area; state goes to stdout
    pub async fn from_config(config: LakehouseSinkConfig) -> SinkResult<Self> {
        let executor = Arc::new(HttpSqlEngine::new(&config.engine)?);
        let staging = Arc::new(ObjectStoreStaging::from_config(&config.staging).await?);
        let dialect = Arc::new(SparkIcebergDialect::new(config.engine.catalog.clone()));

        info!(
            "Lakehouse endpoint: {} (lakehouse: {}, catalog: {})",
            config.engine.host, config.engine.lakehouse, config.engine.catalog
        );

        Ok(Self::new(
            config,
            executor,
            staging,
            dialect,
            Arc::new(SystemClock),
            Box::new(std::io::stdout()),
        ))
    }

    /// Number of flush passes so far; one pass is one checkpoint-advance step
    pub fn flush_passes(&self) -> usize {
        self.flush_passes
    }

    /// Process every line of `input`, then drain
    pub async fn run<R>(&mut self, input: R) -> SinkResult<()>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut lines = input.lines();
        while let Some(line) = lines.next_line().await? {
            self.process_line(&line).await?;
        }
        self.finish().await
    }

    /// Parse and process one input line; blank lines are skipped
    pub async fn process_line(&mut self, line: &str) -> SinkResult<()> {
        if line.trim().is_empty() {
            return Ok(());
        }
        let message = Message::parse(line)?;
        self.process(message).await
    }

    pub async fn process(&mut self, message: Message) -> SinkResult<()> {
        let trigger_stream = match message {
            Message::Schema {
                stream,
                schema,
                key_properties,
                ..
            } => {
                self.on_schema(&stream, &schema, key_properties.unwrap_or_default())
                    .await?;
                None
            }
            Message::Record {
                stream,
                record,
                time_extracted,
                ..
            } => {
                self.on_record(&stream, &record, time_extracted)?;
                Some(stream)
            }
            Message::State { value } => {
                let buffered = self.non_empty_streams();
                self.checkpoint
                    .on_state(value, buffered.iter().map(String::as_str));
                None
            }
            Message::ActivateVersion { stream, version } => {
                debug!(
                    "ACTIVATE_VERSION {} for stream {} ignored",
                    version, stream
                );
                None
            }
        };

        self.check_and_flush(trigger_stream.as_deref()).await
    }

    async fn on_schema(
        &mut self,
        stream: &str,
        schema: &Value,
        key_properties: Vec<String>,
    ) -> SinkResult<()> {
        if self.config.primary_key_required && key_properties.is_empty() {
            return Err(SinkError::invalid_message(format!(
                "Primary key is set to mandatory but not defined in the SCHEMA message of stream '{}'",
                stream
            )));
        }

        let keys_changed = self
            .streams
            .get(stream)
            .map_or(false, |s| !s.is_empty() && s.key_properties() != key_properties.as_slice());
        if keys_changed {
            info!(
                "Key properties of stream {} changed, flushing buffered records first",
                stream
            );
            let targets = if self.config.flush_all_streams {
                self.non_empty_streams()
            } else {
                vec![stream.to_string()]
            };
            self.flush_pass(targets).await?;
        }

        if let Some(state) = self.streams.get_mut(stream) {
            return state.adopt_schema(schema, key_properties);
        }

        let id = StreamId::parse(stream);
        let target_schema = self
            .config
            .target_schema_for(stream, id.schema.as_deref())?;
        let table = TableRef::new(target_schema, &id.table);
        debug!("Stream {} maps to table {:?}", stream, table);

        let options = StreamOptions {
            max_level: self.config.data_flattening_max_level,
            metadata_columns: self.config.metadata_columns_enabled(),
            validate_records: self.config.validate_records,
        };
        let state = StreamState::new(stream, table, schema, key_properties, options)?;
        self.streams.insert(stream.to_string(), state);
        Ok(())
    }

    fn on_record(
        &mut self,
        stream: &str,
        record: &Value,
        time_extracted: Option<chrono::DateTime<chrono::Utc>>,
    ) -> SinkResult<()> {
        let batched_at = self.clock.wall();
        let validate = self.config.validate_records;
        let validation_failure = self.config.validation_failure;

        let state = self.streams.get_mut(stream).ok_or_else(|| {
            SinkError::invalid_message(format!(
                "A record for stream {} was encountered before a corresponding schema",
                stream
            ))
        })?;

        let admitted = match state.buffer_record(record, time_extracted, batched_at, validate) {
            Ok(admitted) => admitted,
            Err(Rejection::MissingKey {
                key_properties,
                available,
            }) => {
                return Err(SinkError::PrimaryKeyNotFound {
                    stream: stream.to_string(),
                    key_properties,
                    available,
                })
            }
            Err(Rejection::Invalid(reason)) => match validation_failure {
                ValidationFailure::Fail => {
                    return Err(SinkError::RecordValidation {
                        stream: stream.to_string(),
                        reason,
                    })
                }
                ValidationFailure::Warn => {
                    warn!(
                        "Record of stream {} does not pass schema validation, loading it anyway: {}",
                        stream, reason
                    );
                    state
                        .buffer_record(record, time_extracted, batched_at, false)
                        .map_err(|rejection| match rejection {
                            Rejection::MissingKey {
                                key_properties,
                                available,
                            } => SinkError::PrimaryKeyNotFound {
                                stream: stream.to_string(),
                                key_properties,
                                available,
                            },
                            Rejection::Invalid(reason) => SinkError::RecordValidation {
                                stream: stream.to_string(),
                                reason,
                            },
                        })?
                }
            },
        };

        if admitted == Admitted::Replaced {
            debug!("Replaced buffered record with the same key in stream {}", stream);
        }
        Ok(())
    }

    fn non_empty_streams(&self) -> Vec<String> {
        let mut streams: Vec<String> = self
            .streams
            .iter()
            .filter(|(_, s)| !s.is_empty())
            .map(|(name, _)| name.clone())
            .collect();
        streams.sort();
        streams
    }

    /// Evaluate the size and wait-limit triggers after an event
    async fn check_and_flush(&mut self, trigger_stream: Option<&str>) -> SinkResult<()> {
        let size_reached = match (trigger_stream, self.config.batch_size_rows) {
            (Some(stream), Some(batch_size)) => self
                .streams
                .get(stream)
                .map_or(false, |s| s.len() >= batch_size),
            _ => false,
        };

        let wait_elapsed = match self.config.batch_wait_limit() {
            Some(limit) => {
                let since_flush = self.clock.now().duration_since(self.last_flush_time);
                since_flush >= limit && self.streams.values().any(|s| !s.is_empty())
            }
            None => false,
        };

        if !size_reached && !wait_elapsed {
            return Ok(());
        }

        let targets = match trigger_stream {
            Some(stream) if !self.config.flush_all_streams => {
                debug!(
                    "Flush triggered by stream {} (size: {}, wait limit: {})",
                    stream, size_reached, wait_elapsed
                );
                vec![stream.to_string()]
            }
            _ => self.non_empty_streams(),
        };
        self.flush_pass(targets).await
    }

    /// Flush every remaining stream and emit the final checkpoint
    pub async fn finish(&mut self) -> SinkResult<()> {
        let remaining = self.non_empty_streams();
        if !remaining.is_empty() {
            info!("End of input, flushing {} remaining stream(s)", remaining.len());
            self.flush_pass(remaining).await?;
        }

        self.checkpoint.on_full_flush();
        self.checkpoint.emit(&mut self.output)?;
        Ok(())
    }

    /// Flush `streams` as one checkpoint-advance step
    async fn flush_pass(&mut self, streams: Vec<String>) -> SinkResult<()> {
        let mut batches: Vec<Batch> = Vec::with_capacity(streams.len());
        for name in &streams {
            if let Some(state) = self.streams.get_mut(name) {
                if !state.is_empty() {
                    batches.push(state.take_batch());
                }
            }
        }
        if batches.is_empty() {
            return Ok(());
        }

        for batch in &batches {
            if self.ensured_schemas.insert(batch.table.schema.clone()) {
                self.context
                    .synchronizer
                    .ensure_target_schema(&batch.table.schema)
                    .await?;
            }
        }

        let flushed: Vec<String> = batches.iter().map(|b| b.stream.clone()).collect();
        let parallelism = self.config.effective_parallelism(batches.len());
        let context = &self.context;

        let results: Vec<SinkResult<usize>> = futures::stream::iter(
            batches
                .into_iter()
                .map(|batch| flush_batch(context, batch)),
        )
        .buffer_unordered(parallelism)
        .collect()
        .await;

        let mut rows = 0;
        for result in results {
            match result {
                Ok(loaded) => rows += loaded,
                Err(e) => {
                    error!("Flush failed: {}", e);
                    return Err(e);
                }
            }
        }

        self.flush_passes += 1;
        self.last_flush_time = self.clock.now();

        if self.streams.values().all(StreamState::is_empty) {
            self.checkpoint.on_full_flush();
        } else {
            self.checkpoint
                .on_partial_flush(flushed.iter().map(String::as_str));
        }
        self.checkpoint.emit(&mut self.output)?;

        info!(
            "Flush pass {} loaded {} rows from {} stream(s): {}",
            self.flush_passes,
            rows,
            flushed.len(),
            flushed.join(", ")
        );
        Ok(())
    }
}

/// write -> upload -> remove local file -> evolve table -> load -> hard delete -> delete staged
async fn flush_batch(context: &FlushContext, batch: Batch) -> SinkResult<usize> {
    let rows = batch.records.len();
    let batch_file = write_batch(
        &batch.records,
        &batch.flat_schema,
        context.compression,
        context.temp_dir.as_deref(),
    )?;
    debug!(
        "Wrote {} rows of stream {} to {} ({} bytes)",
        batch_file.rows(),
        batch.stream,
        batch_file.path().display(),
        batch_file.size_bytes()
    );

    let staged = context.staging.upload(batch_file.path(), &batch.stream).await?;
    drop(batch_file);

    let synchronizer = &context.synchronizer;
    let columns = columns_of(&batch.flat_schema);
    let layout = synchronizer.ensure_schema(&batch.table, &columns).await?;

    info!(
        "Loading {} rows into '{}'",
        rows,
        synchronizer.dialect().qualified_table(&batch.table)
    );
    synchronizer
        .load(
            &batch.table,
            &staged,
            &columns,
            &batch.key_properties,
            &layout.destination_only,
        )
        .await?;

    if context.hard_delete {
        debug!(
            "Batch of stream {} carries {} delete-marked rows",
            batch.stream,
            batch.delete_marked()
        );
        synchronizer.delete_marked(&batch.table).await?;
    }

    if let Err(e) = context.staging.delete(&staged).await {
        warn!("Failed to delete {} from staging: {}", staged.key, e);
    }

    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::manual::ManualClock;
    use crate::config::test_config;
    use crate::engine::Row;
    use crate::staging::StagedObject;
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use serde_json::json;
    use std::path::Path;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingExecutor {
        statements: Mutex<Vec<String>>,
    }

    impl RecordingExecutor {
        fn statements(&self) -> Vec<String> {
            self.statements.lock().unwrap().clone()
        }

        fn count(&self, prefix: &str) -> usize {
            self.statements()
                .iter()
                .filter(|s| s.starts_with(prefix))
                .count()
        }
    }

    #[async_trait]
    impl StatementExecutor for RecordingExecutor {
        async fn execute(&self, sql: &str) -> SinkResult<Vec<Row>> {
            self.statements.lock().unwrap().push(sql.to_string());
            Ok(Vec::new())
        }
    }

    #[derive(Default)]
    struct MemoryStaging {
        uploads: Mutex<Vec<(String, String)>>,
        deleted: Mutex<Vec<String>>,
        fail_delete: bool,
    }

    #[async_trait]
    impl StagingTransport for MemoryStaging {
        async fn upload(&self, file: &Path, stream: &str) -> SinkResult<StagedObject> {
            let contents = std::fs::read_to_string(file)?;
            let mut uploads = self.uploads.lock().unwrap();
            let key = format!("{}_{}.csv", stream, uploads.len());
            uploads.push((key.clone(), contents));
            Ok(StagedObject {
                location: format!("mem://{}", key),
                key,
            })
        }

        async fn delete(&self, object: &StagedObject) -> SinkResult<()> {
            if self.fail_delete {
                return Err(SinkError::staging("bucket unavailable"));
            }
            self.deleted.lock().unwrap().push(object.key.clone());
            Ok(())
        }
    }

    #[derive(Clone, Default)]
    struct SharedOutput(Arc<Mutex<Vec<u8>>>);

    impl SharedOutput {
        fn lines(&self) -> Vec<Value> {
            String::from_utf8_lossy(&self.0.lock().unwrap())
                .lines()
                .map(|l| serde_json::from_str(l).unwrap())
                .collect()
        }
    }

    impl Write for SharedOutput {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    struct Harness {
        connector: LakehouseSinkConnector,
        executor: Arc<RecordingExecutor>,
        staging: Arc<MemoryStaging>,
        clock: Arc<ManualClock>,
        output: SharedOutput,
    }

    fn harness_with(config: LakehouseSinkConfig, staging: MemoryStaging) -> Harness {
        let executor = Arc::new(RecordingExecutor::default());
        let staging = Arc::new(staging);
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        ));
        let output = SharedOutput::default();
        let connector = LakehouseSinkConnector::new(
            config,
            executor.clone(),
            staging.clone(),
            Arc::new(SparkIcebergDialect::new("spark_catalog")),
            clock.clone(),
            Box::new(output.clone()),
        );
        Harness {
            connector,
            executor,
            staging,
            clock,
            output,
        }
    }

    fn harness(config: LakehouseSinkConfig) -> Harness {
        let mut config = config;
        config.no_compression = true;
        harness_with(config, MemoryStaging::default())
    }

    fn schema_line(stream: &str, keys: &[&str]) -> String {
        json!({
            "type": "SCHEMA",
            "stream": stream,
            "schema": {"properties": {"id": {"type": ["integer"]}, "name": {"type": ["null", "string"]}}},
            "key_properties": keys
        })
        .to_string()
    }

    fn record_line(stream: &str, record: Value) -> String {
        json!({"type": "RECORD", "stream": stream, "record": record}).to_string()
    }

    fn state_line(bookmarks: Value) -> String {
        json!({"type": "STATE", "value": {"bookmarks": bookmarks}}).to_string()
    }

    #[tokio::test]
    async fn test_record_before_schema_is_fatal() {
        let mut h = harness(test_config());
        let err = h
            .connector
            .process_line(&record_line("orders", json!({"id": 1})))
            .await
            .unwrap_err();
        assert!(matches!(err, SinkError::InvalidMessage(_)));
    }

    #[tokio::test]
    async fn test_primary_key_required() {
        let mut h = harness(test_config());
        let err = h
            .connector
            .process_line(&schema_line("orders", &[]))
            .await
            .unwrap_err();
        assert!(matches!(err, SinkError::InvalidMessage(_)));

        let mut config = test_config();
        config.primary_key_required = false;
        let mut h = harness(config);
        h.connector
            .process_line(&schema_line("orders", &[]))
            .await
            .unwrap();
        for _ in 0..2 {
            h.connector
                .process_line(&record_line("orders", json!({"id": 1})))
                .await
                .unwrap();
        }
        h.connector.finish().await.unwrap();

        // Append-only load keeps both records
        assert_eq!(h.staging.uploads.lock().unwrap()[0].1, "1,\n1,\n");
        assert_eq!(h.executor.count("INSERT INTO"), 1);
        assert_eq!(h.executor.count("MERGE INTO"), 0);
    }

    #[tokio::test]
    async fn test_flush_pipeline_statement_order() {
        let mut config = test_config();
        config.hard_delete = true;
        let mut h = harness(config);

        h.connector
            .process_line(&schema_line("public-orders", &["id"]))
            .await
            .unwrap();
        h.connector
            .process_line(&record_line("public-orders", json!({"id": 1, "name": "a"})))
            .await
            .unwrap();
        h.connector.finish().await.unwrap();

        let statements = h.executor.statements();
        let kinds: Vec<&str> = statements
            .iter()
            .map(|s| s.split_whitespace().next().unwrap_or(""))
            .collect();
        assert_eq!(
            kinds,
            vec!["SHOW", "CREATE", "SHOW", "CREATE", "CREATE", "MERGE", "DROP", "DELETE"]
        );
        assert_eq!(statements[0], "SHOW SCHEMAS LIKE 'ANALYTICS'");
        assert!(statements[3].starts_with("CREATE TABLE IF NOT EXISTS spark_catalog.analytics.`ORDERS`"));
        assert!(statements[3].contains("`_SDC_DELETED_AT` timestamp"));
        assert_eq!(h.staging.deleted.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_target_schema_ensured_once() {
        let mut config = test_config();
        config.batch_size_rows = Some(1);
        let mut h = harness(config);

        h.connector
            .process_line(&schema_line("orders", &["id"]))
            .await
            .unwrap();
        for id in 0..3 {
            h.connector
                .process_line(&record_line("orders", json!({"id": id})))
                .await
                .unwrap();
        }
        assert_eq!(h.connector.flush_passes(), 3);
        assert_eq!(h.executor.count("SHOW SCHEMAS"), 1);
    }

    #[tokio::test]
    async fn test_key_change_forces_flush() {
        let mut h = harness(test_config());
        h.connector
            .process_line(&schema_line("orders", &["id"]))
            .await
            .unwrap();
        h.connector
            .process_line(&record_line("orders", json!({"id": 1, "name": "a"})))
            .await
            .unwrap();
        assert_eq!(h.connector.flush_passes(), 0);

        // Same keys: no flush
        h.connector
            .process_line(&schema_line("orders", &["id"]))
            .await
            .unwrap();
        assert_eq!(h.connector.flush_passes(), 0);

        h.connector
            .process_line(&schema_line("orders", &["name"]))
            .await
            .unwrap();
        assert_eq!(h.connector.flush_passes(), 1);
        assert_eq!(h.executor.count("MERGE INTO"), 1);
    }

    #[tokio::test]
    async fn test_partial_flush_advances_only_flushed_bookmarks() {
        let mut config = test_config();
        config.batch_size_rows = Some(2);
        let mut h = harness(config);

        for stream in ["a", "b"] {
            h.connector
                .process_line(&schema_line(stream, &["id"]))
                .await
                .unwrap();
        }
        h.connector
            .process_line(&state_line(json!({"a": 0, "b": 0})))
            .await
            .unwrap();
        h.connector
            .process_line(&record_line("b", json!({"id": 1})))
            .await
            .unwrap();
        h.connector
            .process_line(&record_line("a", json!({"id": 1})))
            .await
            .unwrap();
        h.connector
            .process_line(&state_line(json!({"a": 1, "b": 1})))
            .await
            .unwrap();
        h.connector
            .process_line(&record_line("a", json!({"id": 2})))
            .await
            .unwrap();

        // Stream a reached the batch size; b still holds a record
        assert_eq!(h.connector.flush_passes(), 1);
        assert_eq!(h.output.lines(), vec![json!({"bookmarks": {"a": 1, "b": 0}})]);

        h.connector.finish().await.unwrap();
        assert_eq!(
            h.output.lines(),
            vec![
                json!({"bookmarks": {"a": 1, "b": 0}}),
                json!({"bookmarks": {"a": 1, "b": 1}})
            ]
        );
    }

    #[tokio::test]
    async fn test_wait_limit_flushes_all_streams_on_state() {
        let mut config = test_config();
        config.batch_wait_limit_seconds = Some(5.0);
        let mut h = harness(config);

        for stream in ["a", "b"] {
            h.connector
                .process_line(&schema_line(stream, &["id"]))
                .await
                .unwrap();
        }
        h.connector
            .process_line(&record_line("a", json!({"id": 1})))
            .await
            .unwrap();
        h.connector
            .process_line(&record_line("b", json!({"id": 1})))
            .await
            .unwrap();
        assert_eq!(h.connector.flush_passes(), 0);

        h.clock.advance(Duration::from_secs(6));
        h.connector
            .process_line(&state_line(json!({"a": 1, "b": 1})))
            .await
            .unwrap();
        assert_eq!(h.connector.flush_passes(), 1);
        assert_eq!(h.staging.uploads.lock().unwrap().len(), 2);
        assert_eq!(h.output.lines(), vec![json!({"bookmarks": {"a": 1, "b": 1}})]);
    }

    #[tokio::test]
    async fn test_validation_failure_modes() {
        let mut config = test_config();
        config.validate_records = true;
        let mut h = harness(config.clone());
        h.connector
            .process_line(&schema_line("orders", &["id"]))
            .await
            .unwrap();
        let err = h
            .connector
            .process_line(&record_line("orders", json!({"id": 1, "name": 5})))
            .await
            .unwrap_err();
        assert!(matches!(err, SinkError::RecordValidation { .. }));

        config.validation_failure = ValidationFailure::Warn;
        let mut h = harness(config);
        h.connector
            .process_line(&schema_line("orders", &["id"]))
            .await
            .unwrap();
        h.connector
            .process_line(&record_line("orders", json!({"id": 1, "name": 5})))
            .await
            .unwrap();
        h.connector.finish().await.unwrap();
        assert_eq!(h.staging.uploads.lock().unwrap()[0].1, "1,5\n");
    }

    #[tokio::test]
    async fn test_schema_outside_draft7_loads_without_validation() {
        let decimal_schema = json!({
            "type": "SCHEMA",
            "stream": "t",
            "schema": {"properties": {"id": {"type": ["integer"]}, "amt": {"type": ["null", "decimal"]}}},
            "key_properties": ["id"]
        })
        .to_string();

        let mut h = harness(test_config());
        h.connector.process_line(&decimal_schema).await.unwrap();
        h.connector
            .process_line(&record_line("t", json!({"id": 1, "amt": "2.50"})))
            .await
            .unwrap();
        h.connector.finish().await.unwrap();
        assert_eq!(h.staging.uploads.lock().unwrap()[0].1, "1,\"2.50\"\n");

        let mut config = test_config();
        config.validate_records = true;
        let mut h = harness(config);
        let err = h.connector.process_line(&decimal_schema).await.unwrap_err();
        assert!(matches!(err, SinkError::InvalidMessage(_)));
    }

    #[tokio::test]
    async fn test_staging_cleanup_failure_is_not_fatal() {
        let mut config = test_config();
        config.no_compression = true;
        let mut h = harness_with(
            config,
            MemoryStaging {
                fail_delete: true,
                ..MemoryStaging::default()
            },
        );
        h.connector
            .process_line(&schema_line("orders", &["id"]))
            .await
            .unwrap();
        h.connector
            .process_line(&record_line("orders", json!({"id": 1})))
            .await
            .unwrap();
        h.connector
            .process_line(&state_line(json!({"orders": 1})))
            .await
            .unwrap();
        h.connector.finish().await.unwrap();
        assert_eq!(h.output.lines(), vec![json!({"bookmarks": {"orders": 1}})]);
    }

    #[tokio::test]
    async fn test_run_reads_lines_until_eof() {
        let mut h = harness(test_config());
        let input = [
            schema_line("orders", &["id"]),
            String::new(),
            record_line("orders", json!({"id": 7})),
            state_line(json!({"orders": 7})),
        ]
        .join("\n");

        h.connector
            .run(tokio::io::BufReader::new(input.as_bytes()))
            .await
            .unwrap();
        assert_eq!(h.connector.flush_passes(), 1);
        assert_eq!(h.output.lines(), vec![json!({"bookmarks": {"orders": 7}})]);
    }
}
