//! The functional workload battery.
//!
//! A fixed, ordered set of HTTP checks approximating "the service still
//! works": an unauthenticated read, a form-encoded write, and a typed JSON
//! write. The battery short-circuits on the first failure. It is a
//! black-box approximation, not exhaustive coverage: the minimization
//! result is only as trustworthy as this battery's coverage of the
//! service's syscall-sensitive code paths.

use std::time::Duration;

use thiserror::Error;

/// Body text written by the write checks.
const PROBE_TEXT: &str = "sctrim-probe";

/// A failed workload check.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum VerifyError {
    /// A check returned a status outside the success range.
    #[error("check '{check}' returned status {status}")]
    Status {
        /// Which check failed.
        check: &'static str,
        /// The returned status code.
        status: u16,
    },

    /// A check failed at the transport level (connection refused, timeout).
    #[error("check '{check}' transport failure: {detail}")]
    Transport {
        /// Which check failed.
        check: &'static str,
        /// Transport error text.
        detail: String,
    },
}

/// The service workload as the minimization loop sees it.
pub trait WorkloadVerifier {
    /// Run the full battery against the running instance.
    ///
    /// # Errors
    ///
    /// Returns the first failing check. Per-trial, non-fatal: the
    /// controller converts it to a functional-failure outcome.
    fn verify(&self) -> Result<(), VerifyError>;
}

/// Production verifier: blocking HTTP against the service's base URL.
#[derive(Debug, Clone)]
pub struct HttpVerifier {
    client: reqwest::blocking::Client,
    base_url: String,
}

impl HttpVerifier {
    /// A verifier for `base_url` with the given per-request ceiling.
    ///
    /// # Errors
    ///
    /// Returns the underlying client construction error; fatal, since no
    /// trial can be judged without a working client.
    pub fn new(base_url: &str, request_timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::blocking::Client::builder()
            .timeout(request_timeout)
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn complete(
        check: &'static str,
        result: Result<reqwest::blocking::Response, reqwest::Error>,
    ) -> Result<(), VerifyError> {
        let response = result.map_err(|e| VerifyError::Transport {
            check,
            detail: e.to_string(),
        })?;
        let status = response.status();
        if status.is_success() {
            tracing::debug!(check, status = status.as_u16(), "check passed");
            Ok(())
        } else {
            Err(VerifyError::Status {
                check,
                status: status.as_u16(),
            })
        }
    }
}

impl WorkloadVerifier for HttpVerifier {
    fn verify(&self) -> Result<(), VerifyError> {
        Self::complete("read", self.client.get(self.endpoint("/")).send())?;
        Self::complete(
            "form-write",
            self.client
                .post(self.endpoint("/write"))
                .form(&[("content", PROBE_TEXT)])
                .send(),
        )?;
        Self::complete(
            "api-write",
            self.client
                .post(self.endpoint("/api/write"))
                .json(&serde_json::json!({ "text": PROBE_TEXT }))
                .send(),
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_joins_without_duplicate_slash() {
        let v = HttpVerifier::new("http://localhost:5000/", Duration::from_secs(1))
            .expect("client");
        assert_eq!(v.endpoint("/write"), "http://localhost:5000/write");
    }

    #[test]
    fn status_error_names_the_check() {
        let err = VerifyError::Status {
            check: "form-write",
            status: 500,
        };
        assert_eq!(err.to_string(), "check 'form-write' returned status 500");
    }

    #[test]
    fn battery_short_circuits_on_refused_connection() {
        // Port 1 is never listening; the first check must fail at the
        // transport level without reaching later checks.
        let v = HttpVerifier::new("http://127.0.0.1:1", Duration::from_millis(200))
            .expect("client");
        let err = v.verify().expect_err("must fail");
        assert!(matches!(err, VerifyError::Transport { check: "read", .. }));
    }
}
