//! Decode errors shared by the info and record codecs.

/// Maximum number of response bytes echoed into a [`ParseError`].
///
/// Responses can be large (a full `replicas` listing for a busy cluster);
/// the echo exists for diagnostics, not for replay.
const RESPONSE_ECHO_CAP: usize = 512;

/// A malformed info or record response.
///
/// Carries the offending response (possibly truncated) so the failure can be
/// diagnosed from logs without a packet capture.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{reason}; response={response:?}")]
pub struct ParseError {
    /// What the decoder expected and did not find.
    pub reason: String,
    /// Lossy UTF-8 echo of the response, truncated to a diagnostic cap.
    pub response: String,
}

impl ParseError {
    /// Creates a parse error echoing (a truncated view of) the response.
    #[must_use]
    pub fn new(reason: impl Into<String>, response: &[u8]) -> Self {
        let end = response.len().min(RESPONSE_ECHO_CAP);
        Self {
            reason: reason.into(),
            response: String::from_utf8_lossy(&response[..end]).into_owned(),
        }
    }
}
