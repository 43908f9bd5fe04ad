//! Transient vs. permanent failure classification.
//!
//! Classification is a substring match on the lower-cased error text. It
//! cannot see typed transport errors, so a permanent error whose message
//! happens to mention a timeout will be retried.

/// Whether a failed batch is worth retrying after a session reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Transport-level trouble; the batch is retried in a later pass.
    Transient,
    /// The backend rejected the work; every item of the batch is failed.
    Permanent,
}

const TRANSIENT_MARKERS: &[&str] = &[
    "timed out",
    "timeout",
    "connection aborted",
    "connection reset",
    "broken pipe",
    "connection refused",
    "remote end closed",
    "read timed out",
    "remotedisconnected",
];

/// Classify a failure from its message text.
pub fn classify(message: &str) -> ErrorKind {
    let lowered = message.to_lowercase();
    if TRANSIENT_MARKERS.iter().any(|m| lowered.contains(m)) {
        ErrorKind::Transient
    } else {
        ErrorKind::Permanent
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_messages() {
        assert_eq!(classify("Read timed out. (read timeout=30)"), ErrorKind::Transient);
        assert_eq!(
            classify("('Connection aborted.', RemoteDisconnected('Remote end closed connection'))"),
            ErrorKind::Transient
        );
        assert_eq!(classify("[Errno 104] Connection reset by peer"), ErrorKind::Transient);
        assert_eq!(classify("BROKEN PIPE"), ErrorKind::Transient);
        assert_eq!(
            classify("error sending request: tcp connect error: Connection refused (os error 111)"),
            ErrorKind::Transient
        );
        assert_eq!(classify("gateway timeout"), ErrorKind::Transient);
    }

    #[test]
    fn test_permanent_messages() {
        assert_eq!(classify("HTTP 400: invalid id"), ErrorKind::Permanent);
        assert_eq!(classify("401 Unauthorized"), ErrorKind::Permanent);
        assert_eq!(classify(""), ErrorKind::Permanent);
        assert_eq!(classify("connection error"), ErrorKind::Permanent);
    }
}
