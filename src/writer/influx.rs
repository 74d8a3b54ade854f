use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info};

use super::{line_protocol, Writer};
use crate::config::SinkDsn;
use crate::error::SinkError;
use crate::record::Record;

/// Per-request timeout; retries are handled by the sink workers.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Longest error body kept in a `Rejected` error.
const MAX_ERROR_BODY: usize = 512;

/// Writes line protocol to an InfluxDB 1.x `/write` endpoint.
///
/// `reqwest::Client` pools connections internally, so one writer serves
/// every sink worker.
pub struct InfluxWriter {
    client: reqwest::Client,
    write_url: String,
    dsn: SinkDsn,
}

impl InfluxWriter {
    pub fn new(dsn: SinkDsn) -> Result<Self, SinkError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| SinkError::Init(e.to_string()))?;
        let write_url = format!("{}/write", dsn.address);

        info!(
            url = %write_url,
            database = %dsn.database,
            precision = dsn.precision.as_str(),
            "influxdb writer ready"
        );

        Ok(Self {
            client,
            write_url,
            dsn,
        })
    }
}

#[async_trait]
impl Writer for InfluxWriter {
    async fn write(&self, batch: &[Record]) -> Result<(), SinkError> {
        if batch.is_empty() {
            return Ok(());
        }

        let body = line_protocol(batch, self.dsn.precision);
        let response = self
            .client
            .post(&self.write_url)
            .query(&[
                ("db", self.dsn.database.as_str()),
                ("precision", self.dsn.precision.as_str()),
                ("u", self.dsn.username.as_str()),
                ("p", self.dsn.password.as_str()),
            ])
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let mut body = response.text().await.unwrap_or_default();
            if body.len() > MAX_ERROR_BODY {
                let cut = (0..=MAX_ERROR_BODY)
                    .rev()
                    .find(|&i| body.is_char_boundary(i))
                    .unwrap_or(0);
                body.truncate(cut);
            }
            return Err(SinkError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        debug!(records = batch.len(), "batch written to influxdb");
        Ok(())
    }
}
