//! Async info round-trips over a connection.
//!
//! All control traffic (identity, generations, peers, partition bitmaps)
//! goes through these two calls. The frame codec itself lives in
//! `stratus_core::info`; this module only drives it over a socket.

use std::collections::HashMap;

use stratus_core::info as codec;

use crate::errors::Result;
use crate::net::Connection;

/// Sends `commands` and returns the raw response body.
///
/// Used by the peers and replicas decoders, which scan the body with their
/// own cursors.
///
/// # Errors
///
/// Propagates socket deadline/I/O failures and malformed frame headers.
pub async fn request_raw(conn: &mut Connection, commands: &[&str]) -> Result<Vec<u8>> {
    let frame = codec::encode_request(commands);
    conn.write_all(&frame).await?;

    let mut header = [0u8; codec::INFO_HEADER_SIZE];
    conn.read_exact(&mut header).await?;
    let body_len = codec::decode_header(header)?;

    let mut body = vec![0u8; body_len];
    conn.read_exact(&mut body).await?;
    Ok(body)
}

/// Sends `commands` and parses the response into a command → value map.
///
/// # Errors
///
/// Propagates socket deadline/I/O failures and malformed frame headers.
pub async fn request(
    conn: &mut Connection,
    commands: &[&str],
) -> Result<HashMap<String, String>> {
    let body = request_raw(conn, commands).await?;
    Ok(codec::parse_response(&body))
}
