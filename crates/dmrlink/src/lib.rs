//! DMR network relay: HomeBrew master and peer endpoints, OpenBridge links
//! and talkgroup bridging, driven by a single routing core.
#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Voice prompts and the paced announcement workers.
pub mod announce;
/// Registration and talkgroup ACL checks.
pub mod auth;
/// Bridge table: conference bridges and their members.
pub mod bridge;
/// Time snapshots passed through the core.
pub mod clock;
/// CLI argument parsing and network configuration.
pub mod config;
/// Subscriber, peer and talkgroup name lookups.
pub mod directory;
/// Per-system protocol state and the outbound queue.
pub mod endpoint;
/// Error types for relay operations.
pub mod error;
/// HBP master role.
pub mod master;
/// Prometheus metrics collection and HTTP endpoint.
pub mod metrics;
/// OpenBridge links.
pub mod openbridge;
/// Repeater option strings.
pub mod options;
/// HBP and XLX peer roles.
pub mod peer;
mod ratelimit;
/// Reporting feed for dashboards.
pub mod report;
/// Routing core.
pub mod router;
/// Periodic maintenance tasks.
pub mod scheduler;
/// Socket binding and the core loop.
pub mod server;
/// Call state and duplicate suppression.
pub mod stream;
/// Last-heard subscriber locations.
pub mod subscriber;

pub use server::{run, run_with_shutdown, Relay};
