//! Wire-level building blocks for a DMR network relay.
//!
//! This crate provides:
//! - HomeBrew Repeater Protocol frame parsing and serialization ([`frame`])
//! - OpenBridge / FreeBridge framing and authentication ([`openbridge`])
//! - Login challenge and per-datagram keyed digests ([`crypto`])
//! - Permit/deny id lists ([`acl`])
//! - Link Control coding for header, terminator and embedded LC ([`lc`])
//! - Protocol type definitions and constants ([`types`])

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod acl;
pub mod crypto;
pub mod frame;
pub mod lc;
pub mod openbridge;
pub mod types;

pub use acl::{Acl, AclError};
pub use frame::FrameError;
pub use openbridge::ObpError;
pub use types::{DmrId, Slot, StreamId};
