//! Peers listing: per-tend scratch state and the peers-response decoder.
//!
//! The peers response is a nested bracket list:
//! `<generation>,<default_port>,[[<node>,<tls>,[<host>...]],...]` where a
//! host is `<ipv4-or-name>[:port]` or `[<ipv6>][:port]`. Ports default to
//! the announced default.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use stratus_core::InfoParser;

use crate::cluster::node::Node;
use crate::errors::Result;
use crate::net::Host;

/// A logical peer announced by a node: one name, one or more endpoints.
/// The first endpoint that handshakes successfully wins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Peer {
    pub node_name: String,
    pub tls_name: Option<String>,
    pub hosts: Vec<Host>,
}

/// Scratch state for one tend iteration.
///
/// Collects newly accepted nodes pending add, hosts that already failed this
/// tend (so they are not re-dialed), and refresh bookkeeping shared by every
/// node's refresh pass.
#[derive(Debug, Default)]
pub struct Peers {
    /// Newly validated nodes, keyed by node name, pending cluster add.
    pub nodes: HashMap<String, Arc<Node>>,
    /// Hosts that failed validation this tend.
    pub invalid_hosts: HashSet<Host>,
    /// Nodes whose info refresh succeeded this tend.
    pub refresh_count: usize,
    /// Set when any node reports a new peers generation or fails refresh.
    pub generation_changed: bool,
}

impl Peers {
    /// Marks a host as failed for the remainder of this tend.
    pub fn fail(&mut self, host: Host) {
        self.invalid_hosts.insert(host);
    }
}

/// Decoded peers listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerList {
    pub generation: i64,
    pub default_port: u16,
    pub peers: Vec<Peer>,
}

impl PeerList {
    /// Decodes a full peers response body (`<command>\t<value>\n`).
    ///
    /// # Errors
    ///
    /// Fails with a parse error echoing the (possibly truncated) body on any
    /// structural violation.
    pub fn parse(body: Vec<u8>) -> Result<Self> {
        let mut parser = InfoParser::new(body);
        if parser.is_empty() {
            return Err(parser.error("peers response is empty").into());
        }
        parser.skip_to_value()?;
        let generation = parser.parse_int()?;
        parser.expect(b',')?;
        let default_port = parse_port(&mut parser)?;
        parser.expect(b',')?;
        parser.expect(b'[')?;

        let mut peers = Vec::new();
        if parser.peek() != Some(b']') {
            loop {
                peers.push(parse_peer(&mut parser, default_port)?);
                if parser.peek() == Some(b',') {
                    parser.offset += 1;
                } else {
                    break;
                }
            }
        }

        Ok(Self {
            generation,
            default_port,
            peers,
        })
    }
}

fn parse_port(parser: &mut InfoParser) -> Result<u16> {
    let raw = parser.parse_int()?;
    u16::try_from(raw)
        .map_err(|_| parser.error(format!("port {raw} out of range")).into())
}

fn parse_peer(parser: &mut InfoParser, default_port: u16) -> Result<Peer> {
    parser.expect(b'[')?;
    let node_name = parser.parse_string(&[b','])?;
    parser.expect(b',')?;
    let tls_name = parser.parse_string(&[b','])?;
    parser.expect(b',')?;
    let tls_name = (!tls_name.is_empty()).then_some(tls_name);
    let hosts = parse_hosts(parser, default_port, tls_name.as_deref())?;
    parser.expect(b']')?;
    Ok(Peer {
        node_name,
        tls_name,
        hosts,
    })
}

fn parse_hosts(
    parser: &mut InfoParser,
    default_port: u16,
    tls_name: Option<&str>,
) -> Result<Vec<Host>> {
    parser.expect(b'[')?;
    let mut hosts = Vec::new();
    if parser.peek() == Some(b']') {
        parser.offset += 1;
        return Ok(hosts);
    }
    loop {
        hosts.push(parse_host(parser, default_port, tls_name)?);
        match parser.peek() {
            Some(b']') => {
                parser.offset += 1;
                return Ok(hosts);
            }
            Some(b',') => parser.offset += 1,
            _ => return Err(parser.error("unterminated host list").into()),
        }
    }
}

fn parse_host(
    parser: &mut InfoParser,
    default_port: u16,
    tls_name: Option<&str>,
) -> Result<Host> {
    let name = if parser.peek() == Some(b'[') {
        // Bracketed IPv6 address.
        parser.offset += 1;
        let name = parser.parse_string(&[b']'])?;
        parser.expect(b']')?;
        name
    } else {
        parser.parse_string(&[b':', b',', b']'])?
    };

    let port = match parser.peek() {
        Some(b':') => {
            parser.offset += 1;
            parse_port(parser)?
        }
        Some(b',' | b']') => default_port,
        // Stopping anywhere else means the response was cut off mid-host.
        _ => return Err(parser.error(format!("unterminated host {name:?}")).into()),
    };

    let mut host = Host::new(name, port);
    host.tls_name = tls_name.map(ToString::to_string);
    Ok(host)
}
