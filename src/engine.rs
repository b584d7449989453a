//! Lakehouse SQL endpoint
//!
//! The table synchronizer only needs to run one statement at a time and read
//! back its rows as JSON objects. `HttpSqlEngine` does that over the
//! lakehouse's HTTP statement API.

use crate::config::EngineConfig;
use crate::error::{SinkError, SinkResult};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;
use url::Url;

/// One result row, keyed by column name
pub type Row = Map<String, Value>;

/// Executes SQL statements on the destination engine
#[async_trait]
pub trait StatementExecutor: Send + Sync {
    async fn execute(&self, sql: &str) -> SinkResult<Vec<Row>>;
}

#[derive(Debug, Serialize)]
struct StatementRequest<'a> {
    statement: &'a str,
    lakehouse: &'a str,
}

#[derive(Debug, Deserialize)]
struct StatementColumn {
    name: String,
}

#[derive(Debug, Default, Deserialize)]
struct StatementResponse {
    #[serde(default)]
    columns: Vec<StatementColumn>,
    #[serde(default)]
    rows: Vec<Vec<Value>>,
}

impl StatementResponse {
    fn into_rows(self) -> Vec<Row> {
        let names: Vec<String> = self.columns.into_iter().map(|c| c.name).collect();
        self.rows
            .into_iter()
            .map(|values| names.iter().cloned().zip(values).collect())
            .collect()
    }
}

/// Client for the lakehouse statement endpoint
pub struct HttpSqlEngine {
    client: Client,
    endpoint: Url,
    lakehouse: String,
    user: String,
    password: String,
}

impl HttpSqlEngine {
    pub fn new(config: &EngineConfig) -> SinkResult<Self> {
        let endpoint = statement_endpoint(&config.host)?;

        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| SinkError::config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint,
            lakehouse: config.lakehouse.clone(),
            user: config.user.clone(),
            password: config.password.clone(),
        })
    }
}

/// `<host>/api/v1/statements`
fn statement_endpoint(host: &str) -> SinkResult<Url> {
    let base = Url::parse(&format!("{}/", host.trim_end_matches('/')))
        .map_err(|e| SinkError::config(format!("Invalid engine host '{}': {}", host, e)))?;
    base.join("api/v1/statements")
        .map_err(|e| SinkError::config(format!("Invalid engine host '{}': {}", host, e)))
}

#[async_trait]
impl StatementExecutor for HttpSqlEngine {
    async fn execute(&self, sql: &str) -> SinkResult<Vec<Row>> {
        debug!("Running query: {}", sql);

        let response = self
            .client
            .post(self.endpoint.clone())
            .basic_auth(&self.user, Some(&self.password))
            .json(&StatementRequest {
                statement: sql,
                lakehouse: &self.lakehouse,
            })
            .send()
            .await
            .map_err(|e| {
                let reason = if e.is_timeout() {
                    "timed out"
                } else {
                    "could not be sent"
                };
                SinkError::statement_with_source(format!("Statement {}: {}", reason, sql), e)
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SinkError::statement(format!(
                "Statement rejected ({}): {} - {}",
                status, sql, body
            )));
        }

        let body = response.text().await.map_err(|e| {
            SinkError::statement_with_source(format!("Failed to read response of: {}", sql), e)
        })?;
        parse_response(&body)
    }
}

fn parse_response(body: &str) -> SinkResult<Vec<Row>> {
    if body.trim().is_empty() {
        return Ok(Vec::new());
    }
    let response: StatementResponse = serde_json::from_str(body)
        .map_err(|e| SinkError::statement_with_source("Unexpected statement response", e))?;
    Ok(response.into_rows())
}
