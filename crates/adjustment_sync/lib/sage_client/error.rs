use std::error::Error as StdError;

use thiserror::Error;

/// Transport-level failure classes for both remote systems.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteErrorKind {
    Timeout,
    Connect,
    Status(u16),
    InvalidBody,
    Schema,
    Transport,
    /// The request could not be built, so nothing was sent.
    InvalidRequest,
}

/// A failed call to Sage or HyperSage.
///
/// The message is what ends up in logs, the outcome of the cycle and the alert email, so it is
/// written for an operator rather than for code.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct RemoteError {
    pub kind: RemoteErrorKind,
    pub message: String,
}

impl RemoteError {
    pub fn new(kind: RemoteErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// False only when the request provably never reached the remote system.
    pub fn may_have_reached_upstream(&self) -> bool {
        !matches!(
            self.kind,
            RemoteErrorKind::Connect | RemoteErrorKind::InvalidRequest
        )
    }

    pub(crate) fn with_suffix(mut self, suffix: &str) -> Self {
        self.message.push_str(suffix);
        self
    }
}

/// Maps a reqwest failure into a [`RemoteError`] for the named service.
pub(crate) fn map_reqwest_error(service: &str, err: reqwest::Error) -> RemoteError {
    if let Some(status) = err.status() {
        return RemoteError::new(
            RemoteErrorKind::Status(status.as_u16()),
            format!("{service} returned an error status of: {status}"),
        );
    }

    if err.is_connect() {
        let message = if err.is_timeout() {
            format!("Timed out connecting to {service}")
        } else {
            format!("Error connecting to {service}: {}", render_error_chain(&err))
        };
        return RemoteError::new(RemoteErrorKind::Connect, message);
    }

    if err.is_timeout() {
        return RemoteError::new(
            RemoteErrorKind::Timeout,
            format!("Timed out communicating with {service}"),
        );
    }

    if err.is_decode() || err.is_body() {
        return RemoteError::new(
            RemoteErrorKind::InvalidBody,
            format!("{service} response could not be read: {err}"),
        );
    }

    RemoteError::new(
        RemoteErrorKind::Transport,
        format!("Error communicating with {service}: {}", render_error_chain(&err)),
    )
}

fn render_error_chain(error: &reqwest::Error) -> String {
    let mut parts = vec![error.to_string()];
    let mut source = error.source();
    while let Some(next) = source {
        parts.push(next.to_string());
        source = next.source();
    }
    parts.join(" | caused_by: ")
}

/// Strips the UTF-8 byte order mark some Sage endpoints prepend to JSON bodies.
pub(crate) fn strip_bom(body: &str) -> &str {
    body.strip_prefix('\u{feff}').unwrap_or(body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_failures_never_reached_upstream() {
        let connect = RemoteError::new(RemoteErrorKind::Connect, "Timed out connecting to HyperSage");
        assert!(!connect.may_have_reached_upstream());
        let unsent = RemoteError::new(RemoteErrorKind::InvalidRequest, "quantity NaN");
        assert!(!unsent.may_have_reached_upstream());

        for kind in [
            RemoteErrorKind::Timeout,
            RemoteErrorKind::Status(500),
            RemoteErrorKind::InvalidBody,
            RemoteErrorKind::Schema,
            RemoteErrorKind::Transport,
        ] {
            assert!(RemoteError::new(kind, "x").may_have_reached_upstream());
        }
    }

    #[test]
    fn bom_is_stripped_once() {
        assert_eq!(strip_bom("\u{feff}{\"a\":1}"), "{\"a\":1}");
        assert_eq!(strip_bom("{\"a\":1}"), "{\"a\":1}");
    }
}
