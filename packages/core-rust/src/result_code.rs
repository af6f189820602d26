//! Server result codes and their connection-keeping classification.
//!
//! Positive codes are produced by the server in the record message header;
//! negative codes are generated client-side and never appear on the wire.

/// Operation completed successfully.
pub const OK: i32 = 0;
/// Unknown server failure.
pub const SERVER_ERROR: i32 = 1;
/// Record does not exist.
pub const KEY_NOT_FOUND: i32 = 2;
/// Generation did not match the generation policy.
pub const GENERATION_ERROR: i32 = 3;
/// Malformed request parameter.
pub const PARAMETER_ERROR: i32 = 4;
/// Record already exists under a create-only policy.
pub const KEY_EXISTS: i32 = 5;
/// Operation timed out on the server.
pub const TIMEOUT: i32 = 9;
/// Partition is unavailable (cluster in flux).
pub const PARTITION_UNAVAILABLE: i32 = 11;
/// Operation is not applicable to the bin's stored type.
pub const BIN_TYPE_ERROR: i32 = 12;
/// Storage device is overloaded; back off and retry.
pub const DEVICE_OVERLOAD: i32 = 18;
/// Namespace is not configured on the cluster.
pub const INVALID_NAMESPACE: i32 = 20;
/// Record was rejected by a filter expression.
pub const FILTERED_OUT: i32 = 27;
/// Security functionality is not enabled on the server.
pub const SECURITY_NOT_ENABLED: i32 = 52;
/// A user-defined function returned an error.
pub const UDF_BAD_RESPONSE: i32 = 100;

// Client-side codes (never transmitted).

/// Max error rate was exceeded for the target node.
pub const MAX_ERROR_RATE: i32 = -14;
/// No server node could be reached.
pub const SERVER_NOT_AVAILABLE: i32 = -8;
/// Routing found no eligible node for the partition.
pub const INVALID_NODE_ERROR: i32 = -3;
/// A response could not be decoded.
pub const PARSE_ERROR: i32 = -2;
/// Generic client-side failure.
pub const CLIENT_ERROR: i32 = -1;

/// Whether the connection that produced `code` may be returned to the pool.
///
/// Positive codes mean the server completed the command and the wire is in a
/// well-defined state. Zero and negative codes are client-side failures where
/// the stream may hold garbage, so the connection must be closed.
#[must_use]
pub const fn keep_connection(code: i32) -> bool {
    code > 0
}

/// Human-readable name for a result code.
#[must_use]
pub fn name(code: i32) -> &'static str {
    match code {
        OK => "ok",
        SERVER_ERROR => "server error",
        KEY_NOT_FOUND => "key not found",
        GENERATION_ERROR => "generation error",
        PARAMETER_ERROR => "parameter error",
        KEY_EXISTS => "key already exists",
        TIMEOUT => "server timeout",
        PARTITION_UNAVAILABLE => "partition unavailable",
        BIN_TYPE_ERROR => "bin type error",
        DEVICE_OVERLOAD => "device overload",
        INVALID_NAMESPACE => "invalid namespace",
        FILTERED_OUT => "filtered out",
        SECURITY_NOT_ENABLED => "security not enabled",
        UDF_BAD_RESPONSE => "udf bad response",
        MAX_ERROR_RATE => "max error rate exceeded",
        SERVER_NOT_AVAILABLE => "server not available",
        INVALID_NODE_ERROR => "invalid node",
        PARSE_ERROR => "parse error",
        CLIENT_ERROR => "client error",
        _ => "unknown result code",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_codes_keep_connection() {
        assert!(keep_connection(TIMEOUT));
        assert!(keep_connection(DEVICE_OVERLOAD));
        assert!(keep_connection(FILTERED_OUT));
        assert!(keep_connection(KEY_NOT_FOUND));
    }

    #[test]
    fn client_codes_close_connection() {
        assert!(!keep_connection(OK));
        assert!(!keep_connection(CLIENT_ERROR));
        assert!(!keep_connection(PARSE_ERROR));
        assert!(!keep_connection(INVALID_NODE_ERROR));
    }

    #[test]
    fn names_cover_known_codes() {
        assert_eq!(name(TIMEOUT), "server timeout");
        assert_eq!(name(9999), "unknown result code");
    }
}
