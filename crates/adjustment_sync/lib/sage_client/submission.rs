use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::adjustment_store::AdjustmentKind;
use crate::config::HyperSageConfig;

use super::error::{map_reqwest_error, strip_bom, RemoteError, RemoteErrorKind};
use super::{SubmissionOutcome, SubmissionRequest};

const SERVICE: &str = "HyperSage";

/// Appended to transport failures of outbound adjustments: HyperSage may already have moved the
/// stock before its ledger call failed.
pub const DESYNC_WARNING: &str = ". The product quantity on Sage may be incorrect";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AdjustmentPayload<'a> {
    stock_code: &'a str,
    quantity: f64,
    #[serde(rename = "type")]
    movement_type: u8,
    date: String,
    reference: &'a str,
    details: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    cost_price: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct HyperSageResponse {
    success: bool,
    code: i64,
    #[allow(dead_code)]
    response: bool,
    #[serde(default)]
    message: Option<String>,
}

/// Posts stock adjustments to HyperSage, the HTTP front of the Sage ledger.
pub struct HyperSageClient {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    reference_label: String,
}

impl HyperSageClient {
    pub fn new(config: &HyperSageConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .build()?;

        Ok(Self {
            client,
            endpoint: config.adjustments_endpoint(),
            api_key: config.api_key.clone(),
            reference_label: config.reference_label.clone(),
        })
    }

    pub async fn submit(
        &self,
        request: &SubmissionRequest,
    ) -> Result<SubmissionOutcome, RemoteError> {
        let payload = build_payload(request, &self.reference_label)?;
        self.send(request, &payload)
            .await
            .map_err(|err| flag_outbound_desync(request, err))
    }

    async fn send(
        &self,
        request: &SubmissionRequest,
        payload: &AdjustmentPayload<'_>,
    ) -> Result<SubmissionOutcome, RemoteError> {
        info!(
            event = "hypersage_submit_started",
            endpoint = %self.endpoint,
            stock_code = %request.stock_code,
            "calling HyperSage endpoint"
        );

        let response = self
            .client
            .post(&self.endpoint)
            .header("AuthToken", &self.api_key)
            .json(payload)
            .send()
            .await
            .map_err(|err| map_reqwest_error(SERVICE, err))?;

        let status = response.status();
        if !status.is_success() {
            let direction = match request.kind {
                AdjustmentKind::In => "in",
                AdjustmentKind::Out => "out",
            };
            return Err(RemoteError::new(
                RemoteErrorKind::Status(status.as_u16()),
                format!(
                    "Cannot add an adjustment {direction} to Sage, error status is {}",
                    status.as_u16()
                ),
            ));
        }

        let body = response
            .text()
            .await
            .map_err(|err| map_reqwest_error(SERVICE, err))?;
        let outcome = interpret_response(&body)?;

        if outcome == SubmissionOutcome::Applied {
            info!(
                event = "hypersage_adjustment_added",
                stock_code = %request.stock_code,
                movement_type = request.kind.wire_code(),
                quantity = payload.quantity,
                "added adjustment"
            );
        }
        Ok(outcome)
    }
}

/// Marks a failed outbound submission whose request may have reached HyperSage.
fn flag_outbound_desync(request: &SubmissionRequest, err: RemoteError) -> RemoteError {
    if request.kind != AdjustmentKind::Out || !err.may_have_reached_upstream() {
        return err;
    }
    let err = err.with_suffix(DESYNC_WARNING);
    warn!(
        event = "hypersage_outbound_desync_risk",
        stock_code = %request.stock_code,
        error = %err,
        "outbound adjustment failed after reaching HyperSage"
    );
    err
}

fn build_payload<'a>(
    request: &'a SubmissionRequest,
    reference_label: &'a str,
) -> Result<AdjustmentPayload<'a>, RemoteError> {
    let quantity = request.quantity.to_f64().ok_or_else(|| {
        RemoteError::new(
            RemoteErrorKind::InvalidRequest,
            format!("quantity {} cannot be sent to HyperSage", request.quantity),
        )
    })?;

    Ok(AdjustmentPayload {
        stock_code: &request.stock_code,
        quantity,
        movement_type: request.kind.wire_code(),
        date: request.date.format("%d/%m/%Y").to_string(),
        reference: reference_label,
        details: request.reference_code.trim(),
        cost_price: request.cost,
    })
}

/// Classifies a 2xx HyperSage body as applied or rejected.
pub(crate) fn interpret_response(body: &str) -> Result<SubmissionOutcome, RemoteError> {
    let value: serde_json::Value = serde_json::from_str(strip_bom(body)).map_err(|err| {
        RemoteError::new(
            RemoteErrorKind::InvalidBody,
            format!("HyperSage did not return a valid json response: {err}"),
        )
    })?;

    let response: HyperSageResponse = serde_json::from_value(value).map_err(|err| {
        RemoteError::new(
            RemoteErrorKind::Schema,
            format!("Validation of Sage response failed: {err}"),
        )
    })?;

    if response.success {
        return Ok(SubmissionOutcome::Applied);
    }

    Ok(SubmissionOutcome::Rejected {
        message: format!(
            "error {} from HyperSage, message: {}",
            response.code,
            response.message.as_deref().unwrap_or("none")
        ),
    })
}
