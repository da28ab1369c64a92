use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PcapError {
    #[error("failed to open capture file {path}: {source}")]
    OpenFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to read packet: {0}")]
    ReadFailed(String),
    #[error("failed to write packet: {0}")]
    WriteFailed(String),
    #[error("unrecognized capture container format")]
    UnrecognizedFormat,
    #[error("unsupported link type: {0}")]
    UnsupportedLinkType(u16),
}

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("packet too short: need {needed} bytes, have {available}")]
    PacketTooShort { needed: usize, available: usize },
    #[error("invalid field value: {0}")]
    InvalidFormat(String),
}

#[derive(Debug, Error)]
pub enum DissectorError {
    #[error("TLS dissector unavailable: {0}")]
    Unavailable(String),
    #[error("TLS dissector timed out")]
    Timeout,
    #[error("TLS dissector output could not be parsed: {0}")]
    OutputMalformed(String),
}

#[derive(Debug, Error)]
pub enum MaskError {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error("keep-rule-set invariant violated: {0}")]
    RuleInvariantViolation(String),
}

#[derive(Debug, Error)]
pub enum AnonymizeError {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Top-level error for any stage or the executor itself.
#[derive(Debug, Error)]
pub enum StageError {
    #[error(transparent)]
    Pcap(#[from] PcapError),
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Dissector(#[from] DissectorError),
    #[error(transparent)]
    Mask(#[from] MaskError),
    #[error(transparent)]
    Anonymize(#[from] AnonymizeError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("stage cancelled")]
    Cancelled,
}

impl StageError {
    /// Maps an error to the `ErrorKind` reported on the `Event::Error` stream.
    pub fn kind(&self) -> ErrorKind {
        match self {
            StageError::Pcap(PcapError::UnsupportedLinkType(_)) => ErrorKind::UnsupportedLinkType,
            StageError::Parse(_) => ErrorKind::ParseFailed,
            StageError::Dissector(DissectorError::Unavailable(_)) => ErrorKind::DissectorUnavailable,
            StageError::Dissector(DissectorError::Timeout) => ErrorKind::DissectorTimeout,
            StageError::Dissector(DissectorError::OutputMalformed(_)) => ErrorKind::DissectorOutputMalformed,
            StageError::Mask(MaskError::RuleInvariantViolation(_)) => ErrorKind::RuleInvariantViolation,
            StageError::Io(_) | StageError::Pcap(_) | StageError::Anonymize(AnonymizeError::Io(_)) => {
                ErrorKind::IoError
            }
            StageError::Cancelled => ErrorKind::Cancelled,
            StageError::Anonymize(_) | StageError::Mask(_) => ErrorKind::ParseFailed,
        }
    }
}

/// Error classification surfaced on `Event::Error`. Kept separate from
/// `StageError` so the event stream doesn't leak `thiserror` source chains to
/// callers that only want to log a one-line message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    UnsupportedLinkType,
    ParseFailed,
    DissectorUnavailable,
    DissectorTimeout,
    DissectorOutputMalformed,
    RuleInvariantViolation,
    IoError,
    Cancelled,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::UnsupportedLinkType => "unsupported_link_type",
            ErrorKind::ParseFailed => "parse_failed",
            ErrorKind::DissectorUnavailable => "dissector_unavailable",
            ErrorKind::DissectorTimeout => "dissector_timeout",
            ErrorKind::DissectorOutputMalformed => "dissector_output_malformed",
            ErrorKind::RuleInvariantViolation => "rule_invariant_violation",
            ErrorKind::IoError => "io_error",
            ErrorKind::Cancelled => "cancelled",
        }
    }
}
