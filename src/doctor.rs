//! Diagnostic box for unreachable upstreams.
//!
//! Fired on `Register`'s connectivity probe failure (§4.2 step 5): logged, never fatal.
//! Grounded on [`crate::backend`]'s multi-field `tracing::warn!` diagnostic logging style,
//! here assembled into a short human-readable report rather than structured fields, since
//! the report is meant to be read directly by whoever configured the service.

use std::fmt;

use crate::Error;

/// What went wrong probing an upstream address, classified for an actionable suggestion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Diagnosis {
    /// DNS resolution failed.
    DnsFailure,
    /// SSRF policy refused to dial the resolved address.
    SsrfBlocked,
    /// TCP connection was refused by the remote host.
    ConnectionRefused,
    /// TLS handshake did not complete.
    TlsHandshakeFailure,
    /// Connection attempt exceeded the configured timeout.
    Timeout,
    /// Some other failure, carrying the raw message.
    Other,
}

impl fmt::Display for Diagnosis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::DnsFailure => "DNS resolution failed",
            Self::SsrfBlocked => "blocked by SSRF policy",
            Self::ConnectionRefused => "connection refused",
            Self::TlsHandshakeFailure => "TLS handshake failed",
            Self::Timeout => "connection timed out",
            Self::Other => "connection failed",
        };
        f.write_str(s)
    }
}

impl Diagnosis {
    /// One actionable suggestion line for this diagnosis.
    #[must_use]
    pub fn suggestion(self) -> &'static str {
        match self {
            Self::DnsFailure => "verify the hostname resolves from this host (try `dig <host>`)",
            Self::SsrfBlocked => {
                "the target resolves to a loopback/private/link-local address; set \
                 MCPANY_ALLOW_PRIVATE_NETWORK_RESOURCES or MCPANY_ALLOW_LOOPBACK_RESOURCES \
                 if this is intentional"
            }
            Self::ConnectionRefused => "verify the upstream service is running and listening on the configured port",
            Self::TlsHandshakeFailure => "verify the server certificate chain and that tls_config matches the upstream's TLS version",
            Self::Timeout => "check network reachability and whether resilience.timeout is too low for this upstream",
            Self::Other => "check the upstream's logs for more detail",
        }
    }

    fn classify(connect_err: &Error) -> Self {
        match connect_err {
            Error::SsrfBlocked => Self::SsrfBlocked,
            Error::ConnectFailed => Self::ConnectionRefused,
            Error::BackendTimeout(_) => Self::Timeout,
            _ => Self::Other,
        }
    }
}

/// Human-readable diagnostic box for one failed connectivity probe.
#[derive(Debug, Clone)]
pub struct DoctorReport {
    /// Address that was probed.
    pub address: String,
    /// Classified diagnosis.
    pub diagnosis: Diagnosis,
    /// Full rendered report, ready to log or print.
    pub report: String,
}

/// Builds [`DoctorReport`]s from a failed connectivity probe.
pub struct Doctor;

impl Doctor {
    /// Diagnose a failed probe of `address`.
    ///
    /// `ssrf_result` is the result of the SSRF policy check (if it ran before the dial
    /// attempt); `connect_result` is the outcome of the dial itself. SSRF blocks take
    /// precedence since they short-circuit before a network call is ever attempted.
    #[must_use]
    pub fn diagnose(
        address: &str,
        ssrf_result: &Result<(), Error>,
        connect_result: &Result<(), Error>,
    ) -> DoctorReport {
        let diagnosis = if let Err(e) = ssrf_result {
            Diagnosis::classify(e)
        } else if let Err(e) = connect_result {
            Diagnosis::classify(e)
        } else {
            Diagnosis::Other
        };

        let report = format!(
            "┌─ upstream unreachable ─────────────────────────\n\
             │ address:   {address}\n\
             │ diagnosis: {diagnosis}\n\
             │ suggest:   {}\n\
             └────────────────────────────────────────────────",
            diagnosis.suggestion()
        );

        DoctorReport {
            address: address.to_string(),
            diagnosis,
            report,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ssrf_block_takes_precedence_over_connect_error() {
        let report = Doctor::diagnose(
            "http://127.0.0.1:8080",
            &Err(Error::SsrfBlocked),
            &Err(Error::ConnectFailed),
        );
        assert_eq!(report.diagnosis, Diagnosis::SsrfBlocked);
        assert!(report.report.contains("blocked by SSRF policy"));
    }

    #[test]
    fn connection_refused_classified_when_ssrf_passed() {
        let report = Doctor::diagnose("http://api.example.com", &Ok(()), &Err(Error::ConnectFailed));
        assert_eq!(report.diagnosis, Diagnosis::ConnectionRefused);
        assert!(report.report.contains("address:   http://api.example.com"));
    }

    #[test]
    fn report_includes_suggestion_line() {
        let report = Doctor::diagnose("http://x", &Ok(()), &Err(Error::SsrfBlocked));
        assert!(report.report.contains("suggest:"));
    }
}
