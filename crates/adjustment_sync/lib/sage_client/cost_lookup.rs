use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::SageConfig;

use super::error::{map_reqwest_error, strip_bom, RemoteError, RemoteErrorKind};

const SERVICE: &str = "Sage";

/// One commodity resource in a Sage SData feed. Only `cost` is used; the other fields are
/// required so a response with an unexpected shape is rejected.
#[allow(dead_code)]
#[derive(Debug, Deserialize)]
struct SageStockResource {
    #[serde(rename = "$url")]
    url: String,
    #[serde(rename = "$uuid")]
    uuid: String,
    #[serde(rename = "$httpStatus")]
    http_status: String,
    #[serde(rename = "$descriptor")]
    descriptor: String,
    cost: f64,
}

#[allow(dead_code)]
#[derive(Debug, Deserialize)]
struct SageStockResponse {
    #[serde(rename = "$descriptor")]
    descriptor: String,
    #[serde(rename = "$url")]
    url: String,
    #[serde(rename = "$totalResults")]
    total_results: i64,
    #[serde(rename = "$startIndex")]
    start_index: i64,
    #[serde(rename = "$itemsPerPage")]
    items_per_page: i64,
    #[serde(rename = "$resources")]
    resources: Vec<SageStockResource>,
}

/// Reads an item's cost price from the Sage commodities feed.
pub struct SageCostClient {
    client: reqwest::Client,
    stock_uri: String,
    user: String,
    password: String,
}

impl SageCostClient {
    pub fn new(config: &SageConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .build()?;

        Ok(Self {
            client,
            stock_uri: config.stock_uri.clone(),
            user: config.user.clone(),
            password: config.password.clone(),
        })
    }

    /// Returns the cost of the first commodity whose reference equals `stock_code`.
    ///
    /// `Ok(None)` means Sage answered but knows no such item.
    pub async fn lookup_cost(&self, stock_code: &str) -> Result<Option<f64>, RemoteError> {
        let filter = format!("reference eq '{}'", stock_code.replace('\'', "''"));
        debug!(event = "sage_cost_lookup_started", stock_code, "calling Sage");

        let response = self
            .client
            .get(&self.stock_uri)
            .basic_auth(&self.user, Some(&self.password))
            .query(&[("select", "cost"), ("format", "json"), ("where", filter.as_str())])
            .send()
            .await
            .map_err(|err| log_failure(map_reqwest_error(SERVICE, err)))?;

        let status = response.status();
        debug!(
            event = "sage_cost_lookup_status",
            status = status.as_u16(),
            "Sage returned a status"
        );
        if !status.is_success() {
            return Err(log_failure(RemoteError::new(
                RemoteErrorKind::Status(status.as_u16()),
                format!(
                    "Sage returned an error status of: ({}) {}",
                    status.as_u16(),
                    status.canonical_reason().unwrap_or("unknown")
                ),
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|err| log_failure(map_reqwest_error(SERVICE, err)))?;
        parse_cost_response(&body).map_err(log_failure)
    }
}

/// Validates a Sage commodities response and extracts the first cost, if any.
pub(crate) fn parse_cost_response(body: &str) -> Result<Option<f64>, RemoteError> {
    let value: serde_json::Value = serde_json::from_str(strip_bom(body)).map_err(|err| {
        RemoteError::new(
            RemoteErrorKind::InvalidBody,
            format!("Sage did not return a valid json response: {err}"),
        )
    })?;

    let response: SageStockResponse = serde_json::from_value(value).map_err(|err| {
        RemoteError::new(
            RemoteErrorKind::Schema,
            format!("Validation of Sage response failed: {err}"),
        )
    })?;

    Ok(response.resources.first().map(|resource| resource.cost))
}

fn log_failure(err: RemoteError) -> RemoteError {
    warn!(
        event = "sage_cost_lookup_failed",
        kind = ?err.kind,
        error = %err,
        "cost lookup against Sage failed"
    );
    err
}
