//! Lakehouse Sink
//!
//! Reads schema, record and state messages (one JSON object per line),
//! buffers records per stream and loads them into Iceberg tables of a
//! Spark SQL lakehouse through batch files staged on object storage.
//!
//! # Features
//!
//! - **Staged Bulk Loads**: CSV batches (optionally gzip) on S3 or a local directory
//! - **Upserts**: MERGE on key properties, append-only INSERT for keyless streams
//! - **Schema Evolution**: new columns are added, type changes version the old column
//! - **Flattening**: nested objects projected into `parent__child` columns up to a depth
//! - **Safe Checkpoints**: state is written to stdout only after its records are loaded
//! - **Hard Deletes**: optional removal of rows flagged by `_sdc_deleted_at`
//!
//! # Example Configuration
//!
//! ```toml
//! default_target_schema = "analytics"
//! batch_size_rows = 100000
//! batch_wait_limit_seconds = 60.0
//! flush_all_streams = false
//! hard_delete = false
//! data_flattening_max_level = 1
//!
//! [schema_mapping.crm]
//! target_schema = "crm_raw"
//!
//! [engine]
//! host = "https://sql.lakehouse.example.com"
//! lakehouse = "main"
//! user = "loader"
//! # password from LAKEHOUSE_PASSWORD
//!
//! [staging]
//! storage_backend = "s3"
//! s3_bucket = "lakehouse-staging"
//! s3_region = "us-east-1"
//! s3_key_prefix = "singer/"
//! ```

pub mod batch_file;
pub mod clock;
pub mod column_type;
pub mod config;
pub mod connector;
pub mod dialect;
pub mod engine;
pub mod error;
pub mod flatten;
pub mod message;
pub mod record;
pub mod staging;
pub mod state;
pub mod stream;
pub mod table_sync;

pub use config::LakehouseSinkConfig;
pub use connector::LakehouseSinkConnector;
pub use error::{SinkError, SinkResult};
