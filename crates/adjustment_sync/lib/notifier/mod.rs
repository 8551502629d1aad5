//! Alert delivery for sustained sync failure.

use std::sync::Arc;

use futures::future::BoxFuture;
use serde::Serialize;
use thiserror::Error;
use tracing::info;

use crate::config::AlertConfig;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("email transport request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("email transport rejected the message with status {status}: {body}")]
    Rejected { status: u16, body: String },
}

/// Sink for the "too many consecutive failures" alert.
pub trait Notifier: Send + Sync {
    fn notify<'a>(
        &'a self,
        stock_code: &'a str,
        error: &'a str,
    ) -> BoxFuture<'a, Result<(), NotifyError>>;
}

impl<T> Notifier for Arc<T>
where
    T: Notifier + ?Sized,
{
    fn notify<'a>(
        &'a self,
        stock_code: &'a str,
        error: &'a str,
    ) -> BoxFuture<'a, Result<(), NotifyError>> {
        (**self).notify(stock_code, error)
    }
}

/// Renders the alert email body.
pub fn render_alert(stock_code: &str, max_errors: u32, error: &str) -> String {
    format!(
        r#"
        <html>
          <body>
            <br>
            <p><b>Error threshold exceeded while adding an adjustment to Sage</b><br>
            <br>
               While updating the following product: {stock_code}, {max_errors} consecutive errors have occurred<br>
               <br>
               The last error received from Sage was:<br><br>
                <i>{error}</i>
            </p>
          </body>
        </html>
        "#,
        stock_code = escape_html(stock_code),
        error = escape_html(error),
    )
}

fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            other => escaped.push(other),
        }
    }
    escaped
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct PostmarkEmail<'a> {
    from: &'a str,
    to: &'a str,
    subject: &'a str,
    html_body: String,
}

/// Sends alerts through Postmark's HTTP email API.
pub struct PostmarkNotifier {
    client: reqwest::Client,
    endpoint: String,
    config: AlertConfig,
    max_errors: u32,
}

impl PostmarkNotifier {
    pub fn new(config: AlertConfig, max_errors: u32) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(config.timeout).build()?;

        Ok(Self {
            client,
            endpoint: format!("{}/email", config.postmark_uri.trim_end_matches('/')),
            config,
            max_errors,
        })
    }

    pub async fn send_alert(&self, stock_code: &str, error: &str) -> Result<(), NotifyError> {
        let email = PostmarkEmail {
            from: &self.config.sender,
            to: &self.config.receiver,
            subject: &self.config.subject,
            html_body: render_alert(stock_code, self.max_errors, error),
        };

        let response = self
            .client
            .post(&self.endpoint)
            .header("Accept", "application/json")
            .header("X-Postmark-Server-Token", &self.config.postmark_token)
            .json(&email)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NotifyError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        info!(
            event = "alert_email_sent",
            stock_code,
            receiver = %self.config.receiver,
            "sent failure alert email"
        );
        Ok(())
    }
}

impl Notifier for PostmarkNotifier {
    fn notify<'a>(
        &'a self,
        stock_code: &'a str,
        error: &'a str,
    ) -> BoxFuture<'a, Result<(), NotifyError>> {
        Box::pin(self.send_alert(stock_code, error))
    }
}
