//! Stratus Client -- asynchronous driver for a distributed partitioned
//! key-value database.
//!
//! The driver keeps a live view of the cluster (one background tender task
//! discovers peers, tracks partition ownership, and manages node lifecycle)
//! and executes record commands against it with retry, timeout, and
//! failover semantics:
//!
//! - **Client** ([`client`]): user-facing facade (`put`/`get`/`delete`/...)
//! - **Cluster** ([`cluster`]): tender loop, nodes, copy-on-write partition map
//! - **Commands** ([`command`]): execution engine and concrete record commands
//! - **Net** ([`net`]): hosts, deadline-bounded connections, per-node pools
//! - **Policy** ([`policy`]): cluster-wide and per-command configuration
//! - **Errors** ([`errors`]): taxonomy with retry/keep-connection classification

pub mod client;
pub mod cluster;
pub mod command;
pub mod errors;
pub mod info;
pub mod net;
pub mod policy;

// Client
pub use client::Client;

// Cluster
pub use cluster::{Cluster, Node, PartitionMap, Partitions};

// Commands
pub use command::{Bin, Command, DeleteCommand, ExistsCommand, ReadCommand, Record, WriteCommand};

// Errors
pub use errors::{ClientError, CommandContext, Result};

// Net
pub use net::{Connection, Host};

// Policy
pub use policy::{AuthMode, ClientPolicy, CommandPolicy, Replica, TlsConfig};

// Protocol layer, re-exported for convenience.
pub use stratus_core::{Key, ParticleType, Value, PARTITION_COUNT};
