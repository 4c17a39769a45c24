//! Core of a passive network flow meter.
//!
//! This crate decodes captured packets (link through transport layer),
//! reassembles IP fragments under bounded memory, joins forward and
//! reverse uniflows into biflows, ages and emits terminated flows, and
//! connects a capture producer to a flush consumer through a
//! fixed-capacity lock-free ring.
//!
//! It does not capture packets, does not serialise flows to the wire,
//! and does not perform application-layer inspection: those are
//! external collaborators reached through the [`yaf::pipeline::Writer`]
//! and [`yaf::plugin::LabelPlugin`] traits.
//!
//! # Usage
//!
//! Add the following to your `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! yaf-core = "0.1"
//! ```
//!
//! The entry points are [`yaf::config::YafConfig`] for tuning, and
//! [`yaf::pipeline::Pipeline`] for wiring decode, fragment reassembly,
//! the ring, and the flow table together.

#![allow(clippy::bool_comparison)]

pub mod yaf;

pub use crate::yaf::config::YafConfig;
pub use crate::yaf::decode::{Decoder, LinkType};
pub use crate::yaf::error::{ConfigError, DecodeRejectReason, FragError, PipelineError, RingOutcome};
pub use crate::yaf::flow::{EndReason, Flow, MplsLabels, MptcpInfo};
pub use crate::yaf::flow_key::{FlowAddr, FlowKey};
pub use crate::yaf::flow_table::FlowTable;
pub use crate::yaf::flow_value::FlowValue;
pub use crate::yaf::frag::FragTable;
pub use crate::yaf::pbuf::{FragInfo, PBuf};
pub use crate::yaf::pipeline::{CaptureSource, CapturedFrame, Pipeline, PipelineHandle, Writer};
pub use crate::yaf::ring::PBufRing;
