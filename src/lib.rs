//! `peersync` is a peer-to-peer folder synchronizer: two endpoints watch a
//! local directory and, whenever a file appears or changes locally,
//! transfer it over TCP to the peer so both sides converge on the same
//! contents.
//!
//! Four long-lived components, joined by typed command queues:
//! [`scanner`] detects local changes, [`coordinator`] brokers them and
//! owns the [`registry`], [`sender`] drives outbound transfers, and
//! [`receiver`] accepts inbound ones. [`protocol`] is the wire codec they
//! all share, and [`fingerprint`] is the pluggable content-identity seam.
#![deny(unused_import_braces)]

extern crate byteorder;
extern crate clap;
extern crate fern;
extern crate rand;
extern crate seahash;
extern crate toml;

#[macro_use]
extern crate log;

pub mod config;
pub mod constants;
pub mod coordinator;
pub mod error;
pub mod fingerprint;
pub mod protocol;
pub mod receiver;
pub mod registry;
pub mod scanner;
pub mod sender;
pub mod writer;
