//! Proxy parser module for turning raw feed lines into candidates
//!
//! Parsing happens in two stages:
//! 1. [`ProxyParser::convert_source_line`] strips a raw line down to a bare
//!    `host:port` token according to the shape of its source.
//! 2. [`ProxyParser::normalize`] resolves the protocol and validates the
//!    token into a [`Proxy`].
//!
//! Lines rejected by stage 2 can be explained with [`ProxyParser::diagnose`].

use crate::proxy::models::{Proxy, ProxyType};
use crate::Result;
use once_cell::sync::Lazy;
use regex::Regex;
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Explicit `protocol://` prefix, case-insensitive
static PROTOCOL_PREFIX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(socks5|socks4|https|http)://(.*)$").expect("Invalid protocol regex")
});

/// Bare `host:port` with a 2-5 digit port
static HOST_PORT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([A-Za-z0-9._-]+):(\d{2,5})$").expect("Invalid host:port regex")
});

static HOST_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9._-]+$").expect("Invalid host regex"));

/// Column names that mark a header row in delimited feeds
const HEADER_NAMES: &[&str] = &[
    "ip",
    "host",
    "address",
    "ip_address",
    "proxy",
    "port",
    "dest_ip",
    "dest_port",
    "protocol",
];

/// Comment markers recognized at the start of a line
const COMMENT_MARKERS: &[&str] = &["#", "//", ";"];

/// Shape of a source feed, chosen from its URL
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    /// One proxy per line, optionally followed by whitespace-separated noise
    PlainList,
    /// Comma-delimited rows with host and port in the first two columns
    Delimited,
}

impl SourceFormat {
    /// Pick the format from the source URL's file extension
    pub fn detect(source_url: &str) -> Self {
        let path = source_url
            .split(['?', '#'])
            .next()
            .unwrap_or(source_url)
            .to_ascii_lowercase();
        if path.ends_with(".csv") {
            SourceFormat::Delimited
        } else {
            SourceFormat::PlainList
        }
    }
}

/// Result of stage 1 for a single raw line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineOutcome {
    /// Blank line, comment or header row
    Skip,
    /// Structurally broken line
    Invalid { reason: String, raw: String },
    /// Bare or protocol-prefixed `host:port` token
    Token(String),
}

/// Why a token could not be normalized
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("no protocol prefix and no protocol hint")]
    MissingProtocol,
    #[error("missing ':' port separator")]
    MissingPortSeparator,
    #[error("non-numeric port '{0}'")]
    NonNumericPort(String),
    #[error("port '{0}' out of range")]
    PortOutOfRange(String),
    #[error("empty host")]
    EmptyHost,
    #[error("illegal characters in host '{0}'")]
    IllegalHostCharacters(String),
    #[error("unrecognized proxy format")]
    Unrecognized,
}

/// A rejected line kept for operator-facing reporting
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineDiagnostic {
    pub line_number: usize,
    pub raw: String,
    pub reason: String,
}

/// Everything parsed out of one source
#[derive(Debug, Clone, Default)]
pub struct ParsedSource {
    pub proxies: Vec<Proxy>,
    pub skipped: usize,
    pub diagnostics: Vec<LineDiagnostic>,
}

/// Proxy parser for parsing proxies from strings and files
pub struct ProxyParser;

impl ProxyParser {
    /// Stage 1: reduce a raw line to a token, or skip/reject it
    pub fn convert_source_line(line: &str, format: SourceFormat) -> LineOutcome {
        let trimmed = line.trim();
        if trimmed.is_empty() || COMMENT_MARKERS.iter().any(|m| trimmed.starts_with(m)) {
            return LineOutcome::Skip;
        }

        match format {
            SourceFormat::PlainList => {
                let token = trimmed.split_whitespace().next().unwrap_or(trimmed);
                LineOutcome::Token(token.to_string())
            }
            SourceFormat::Delimited => Self::convert_delimited_row(trimmed),
        }
    }

    fn convert_delimited_row(row: &str) -> LineOutcome {
        let fields: Vec<&str> = row
            .split(',')
            .map(|f| f.trim().trim_matches('"').trim())
            .collect();

        // a header row names its port column
        if fields
            .get(1)
            .is_some_and(|f| HEADER_NAMES.contains(&f.to_ascii_lowercase().as_str()))
        {
            return LineOutcome::Skip;
        }

        if fields.len() < 2 {
            return LineOutcome::Invalid {
                reason: format!("expected at least 2 columns, found {}", fields.len()),
                raw: row.to_string(),
            };
        }

        let (host, port) = (fields[0], fields[1]);
        if port.is_empty() || !port.chars().all(|c| c.is_ascii_digit()) {
            return LineOutcome::Invalid {
                reason: format!("non-numeric port column '{}'", port),
                raw: row.to_string(),
            };
        }

        LineOutcome::Token(format!("{}:{}", host, port))
    }

    /// Stage 2: resolve the protocol and validate `host:port`
    ///
    /// An explicit prefix wins over the hint. Returns `None` for any shape
    /// other than `[protocol://]host:port[/]`.
    pub fn normalize(token: &str, hint: Option<ProxyType>, source: &str) -> Option<Proxy> {
        let (proxy_type, rest) = Self::split_protocol(token.trim(), hint);
        let proxy_type = proxy_type?;
        let rest = rest.trim_end_matches('/');

        let caps = HOST_PORT.captures(rest)?;
        let port: u16 = caps[2].parse().ok()?;
        if port == 0 {
            return None;
        }

        Some(Proxy::new(caps[1].to_string(), port, proxy_type).with_source(source))
    }

    fn split_protocol(token: &str, hint: Option<ProxyType>) -> (Option<ProxyType>, &str) {
        match PROTOCOL_PREFIX.captures(token) {
            Some(caps) => {
                let proxy_type = caps[1].parse::<ProxyType>().ok();
                let rest = caps.get(2).map_or("", |m| m.as_str());
                (proxy_type, rest)
            }
            None => (hint, token),
        }
    }

    /// Explain why [`ProxyParser::normalize`] rejected a token.
    ///
    /// Labels only; it never changes what gets accepted.
    pub fn diagnose(token: &str, hint: Option<ProxyType>) -> Rejection {
        let (proxy_type, rest) = Self::split_protocol(token.trim(), hint);
        if proxy_type.is_none() {
            return Rejection::MissingProtocol;
        }
        let rest = rest.trim_end_matches('/');

        let Some((host, port)) = rest.rsplit_once(':') else {
            return Rejection::MissingPortSeparator;
        };
        if host.is_empty() {
            return Rejection::EmptyHost;
        }
        if !HOST_CHARS.is_match(host) {
            return Rejection::IllegalHostCharacters(host.to_string());
        }
        if port.is_empty() || !port.chars().all(|c| c.is_ascii_digit()) {
            return Rejection::NonNumericPort(port.to_string());
        }
        match port.parse::<u32>() {
            Ok(p) if (1..=65535).contains(&p) && (2..=5).contains(&port.len()) => {
                Rejection::Unrecognized
            }
            _ => Rejection::PortOutOfRange(port.to_string()),
        }
    }

    /// Parse a whole source body, collecting diagnostics for bad lines
    pub fn parse_source(content: &str, hint: Option<ProxyType>, source_url: &str) -> ParsedSource {
        let format = SourceFormat::detect(source_url);
        let mut parsed = ParsedSource::default();

        for (index, line) in content.lines().enumerate() {
            let line_number = index + 1;
            match Self::convert_source_line(line, format) {
                LineOutcome::Skip => parsed.skipped += 1,
                LineOutcome::Invalid { reason, raw } => {
                    parsed.diagnostics.push(LineDiagnostic {
                        line_number,
                        raw,
                        reason,
                    });
                }
                LineOutcome::Token(token) => match Self::normalize(&token, hint, source_url) {
                    Some(proxy) => parsed.proxies.push(proxy),
                    None => parsed.diagnostics.push(LineDiagnostic {
                        line_number,
                        raw: line.trim().to_string(),
                        reason: Self::diagnose(&token, hint).to_string(),
                    }),
                },
            }
        }

        parsed
    }

    /// Parse proxies from a local file
    pub fn parse_file<P: AsRef<Path>>(path: P, hint: Option<ProxyType>) -> Result<ParsedSource> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        Ok(Self::parse_source(&content, hint, &path.to_string_lossy()))
    }

    /// Save proxies to a file in HOST:PORT format
    pub fn save_to_file<P: AsRef<Path>>(proxies: &[Proxy], path: P) -> Result<()> {
        let content: String = proxies
            .iter()
            .map(|p| p.to_simple_string())
            .collect::<Vec<_>>()
            .join("\n");

        fs::write(path, content)?;
        Ok(())
    }
}
