//! Error and outcome types for the flow meter core.
//!
//! Most of the conditions the core recognises are *counted*, not
//! surfaced: a malformed packet, an evicted fragment, or a plugin that
//! declined to label a flow are all normal operation. Only conditions
//! that require the caller to change behaviour (a ring shutdown, a
//! writer failure, an invalid configuration) are modelled as
//! `Result::Err`.

use thiserror::Error;

/// Why the decoder rejected a packet. Attached to [`crate::yaf::decode::DecodeStats`]
/// for tallying; never returned as a hard failure to the pipeline.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Error)]
pub enum DecodeRejectReason {
    /// The capture was shorter than the header it claimed to contain.
    #[error("truncated at {layer}: needed at least {needed} bytes, had {available}")]
    Truncated {
        layer: &'static str,
        needed: usize,
        available: usize,
    },
    /// The link-layer type is not one this decoder understands.
    #[error("unsupported linktype {0}")]
    UnsupportedLinkType(u16),
    /// The link layer parsed fine, but the payload above it is neither
    /// IPv4 nor IPv6 (e.g. ARP, or an unrecognised MPLS payload).
    #[error("unsupported ethertype {0:#06x}")]
    UnsupportedEtherType(u16),
    /// A header field failed a basic sanity check (bad version, bad
    /// length, unknown next-header chain, etc).
    #[error("malformed {layer}: {reason}")]
    MalformedHeader {
        layer: &'static str,
        reason: &'static str,
    },
}

/// Why a fragment was dropped by the [`crate::yaf::frag::FragTable`].
/// Counted on [`crate::yaf::frag::FragTable::dropped`], never surfaced.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Error)]
pub enum FragError {
    /// Evicted to make room under `max_frags`.
    #[error("fragment evicted under max_frags pressure")]
    EvictedForCapacity,
    /// No fragment for this datagram arrived within `idle_ms`.
    #[error("fragment reassembly timed out")]
    IdleTimeout,
}

/// Result of a blocking wait on [`crate::yaf::ring::PBufRing`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RingOutcome<T> {
    /// The wait succeeded; here is the slot.
    Ready(T),
    /// The ring's interrupt flag was set while waiting. The caller
    /// should drain whatever is left and exit; this is not an error.
    Interrupted,
}

impl<T> RingOutcome<T> {
    pub fn is_interrupted(&self) -> bool {
        matches!(self, RingOutcome::Interrupted)
    }

    pub fn ready(self) -> Option<T> {
        match self {
            RingOutcome::Ready(v) => Some(v),
            RingOutcome::Interrupted => None,
        }
    }
}

/// Error surfaced by [`crate::yaf::pipeline::Pipeline`]. The only core
/// error that can legitimately abort the flush loop.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The writer failed to accept or flush a flow record. The flush
    /// loop aborts and begins a forced drain; flows not yet written
    /// may be lost if the writer cannot recover.
    #[error("writer failed: {0}")]
    Writer(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// Error validating a [`crate::yaf::config::YafConfig`].
#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum ConfigError {
    #[error("ring_capacity must be a power of two, got {0}")]
    RingCapacityNotPowerOfTwo(usize),
    #[error("max_flows must be non-zero")]
    MaxFlowsZero,
    #[error("idle_timeout_ms must be non-zero")]
    IdleTimeoutZero,
}
