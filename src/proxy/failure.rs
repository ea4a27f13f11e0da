//! Failure taxonomy for probe verdicts
//!
//! The same closed set drives both the Failed verdicts stored in the run
//! state and the error histogram printed by the reporter.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Maximum length of the token kept for unrecognized messages
const UNKNOWN_TOKEN_LEN: usize = 24;

/// Why a candidate was marked Failed
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum FailureKind {
    Timeout,
    ConnectionRefused,
    ConnectionReset,
    TlsError,
    SocketDisconnected,
    DnsLookupFailed,
    /// The relay answered with the caller's own address
    SelfResolution,
    InvalidResponseFormat,
    ProxyError,
    InternalProbeError,
    /// Truncated first token of an unrecognized message
    Unknown(String),
}

/// Ordered message patterns; the first match wins.
static PATTERNS: Lazy<Vec<(Regex, FailureKind)>> = Lazy::new(|| {
    [
        (r"timed? ?out|timeout|deadline", FailureKind::Timeout),
        (
            r"connection refused|couldn't connect|econnrefused",
            FailureKind::ConnectionRefused,
        ),
        (
            r"connection reset|reset by peer|econnreset",
            FailureKind::ConnectionReset,
        ),
        (r"ssl|tls|certificate|handshake", FailureKind::TlsError),
        (
            r"empty reply|socket disconnected|connection closed|unexpected eof|recv failure|broken pipe",
            FailureKind::SocketDisconnected,
        ),
        (
            r"could not resolve|resolve host|dns error|failed to lookup|name or service not known",
            FailureKind::DnsLookupFailed,
        ),
        (
            r"proxy|socks|tunnel|received http code",
            FailureKind::ProxyError,
        ),
    ]
    .into_iter()
    .map(|(pattern, kind)| {
        let re = Regex::new(&format!("(?i){pattern}")).expect("Invalid failure pattern");
        (re, kind)
    })
    .collect()
});

impl FailureKind {
    /// Classify a raw error message from a probing backend
    pub fn classify(message: &str) -> Self {
        PATTERNS
            .iter()
            .find(|(re, _)| re.is_match(message))
            .map(|(_, kind)| kind.clone())
            .unwrap_or_else(|| FailureKind::Unknown(first_token(message)))
    }

    /// Stable label used in logs, files and the histogram
    pub fn label(&self) -> String {
        match self {
            FailureKind::Timeout => "Timeout".into(),
            FailureKind::ConnectionRefused => "ConnectionRefused".into(),
            FailureKind::ConnectionReset => "ConnectionReset".into(),
            FailureKind::TlsError => "TLSError".into(),
            FailureKind::SocketDisconnected => "SocketDisconnected".into(),
            FailureKind::DnsLookupFailed => "DNSLookupFailed".into(),
            FailureKind::SelfResolution => "SelfResolution".into(),
            FailureKind::InvalidResponseFormat => "InvalidResponseFormat".into(),
            FailureKind::ProxyError => "ProxyError".into(),
            FailureKind::InternalProbeError => "InternalProbeError".into(),
            FailureKind::Unknown(token) => format!("Unknown({token})"),
        }
    }
}

fn first_token(message: &str) -> String {
    match message.split_whitespace().next() {
        Some(token) => token.chars().take(UNKNOWN_TOKEN_LEN).collect(),
        None => "empty".to_string(),
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

impl From<FailureKind> for String {
    fn from(kind: FailureKind) -> Self {
        kind.label()
    }
}

impl From<String> for FailureKind {
    fn from(label: String) -> Self {
        match label.as_str() {
            "Timeout" => FailureKind::Timeout,
            "ConnectionRefused" => FailureKind::ConnectionRefused,
            "ConnectionReset" => FailureKind::ConnectionReset,
            "TLSError" => FailureKind::TlsError,
            "SocketDisconnected" => FailureKind::SocketDisconnected,
            "DNSLookupFailed" => FailureKind::DnsLookupFailed,
            "SelfResolution" => FailureKind::SelfResolution,
            "InvalidResponseFormat" => FailureKind::InvalidResponseFormat,
            "ProxyError" => FailureKind::ProxyError,
            "InternalProbeError" => FailureKind::InternalProbeError,
            other => {
                let token = other
                    .strip_prefix("Unknown(")
                    .and_then(|rest| rest.strip_suffix(')'))
                    .unwrap_or(other);
                FailureKind::Unknown(token.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_curl_messages() {
        assert_eq!(
            FailureKind::classify("curl: (28) Operation timed out after 10001 milliseconds"),
            FailureKind::Timeout
        );
        assert_eq!(
            FailureKind::classify("curl: (7) Failed to connect to 1.2.3.4 port 80: Connection refused"),
            FailureKind::ConnectionRefused
        );
        assert_eq!(
            FailureKind::classify("curl: (56) Recv failure: Connection reset by peer"),
            FailureKind::ConnectionReset
        );
        assert_eq!(
            FailureKind::classify("curl: (35) OpenSSL SSL_connect: SSL_ERROR_SYSCALL"),
            FailureKind::TlsError
        );
        assert_eq!(
            FailureKind::classify("curl: (52) Empty reply from server"),
            FailureKind::SocketDisconnected
        );
        assert_eq!(
            FailureKind::classify("curl: (5) Could not resolve proxy: bad.host"),
            FailureKind::DnsLookupFailed
        );
        assert_eq!(
            FailureKind::classify("curl: (97) SOCKS4 connection to 1.1.1.1 not successful"),
            FailureKind::ProxyError
        );
    }

    #[test]
    fn test_classify_unknown_uses_first_token() {
        assert_eq!(
            FailureKind::classify("weird-failure-with-a-very-long-name happened"),
            FailureKind::Unknown("weird-failure-with-a-ver".to_string())
        );
        assert_eq!(
            FailureKind::classify("   "),
            FailureKind::Unknown("empty".to_string())
        );
    }

    #[test]
    fn test_label_round_trip() {
        let kinds = [
            FailureKind::TlsError,
            FailureKind::DnsLookupFailed,
            FailureKind::SelfResolution,
            FailureKind::Unknown("curl:".to_string()),
        ];
        for kind in kinds {
            assert_eq!(FailureKind::from(kind.label()), kind);
        }
        assert_eq!(FailureKind::TlsError.to_string(), "TLSError");
    }
}
