//! The assembled bidirectional flow record: a joined pair of
//! [`FlowValue`]s under one [`FlowKey`], plus the bookkeeping needed to
//! decide when and why it ends. Grounded on `yfFlow_t` in the original
//! source's `yafcore.h`.

use arrayvec::ArrayVec;

use crate::yaf::flow_key::FlowKey;
use crate::yaf::flow_value::FlowValue;
use crate::yaf::plugin::FlowContext;

/// Why a flow was closed and handed to the writer. Grounded on the
/// `YAF_END_*` constants in the original source's `yafcore.h`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EndReason {
    /// No packet seen for at least `idle_timeout_ms`.
    Idle,
    /// The flow has been open for at least `active_timeout_ms`; a
    /// successor flow opens immediately to continue it, with
    /// [`Flow::is_continuation`] set.
    Active,
    /// A protocol-level close: TCP FIN/RST seen on both directions (or
    /// RST on either).
    Closed,
    /// Forced closed by the owner, e.g. on shutdown.
    Forced,
    /// Evicted to stay under `max_flows`.
    Resource,
    /// A single UDP packet closed immediately because
    /// `udp_uniflow_mode` is enabled.
    UdpForce,
}

/// An MPLS label stack, outermost label first. Bounded at 3 labels,
/// matching the original source's `YAF_MPLS_LABEL_COUNT`.
pub type MplsLabels = ArrayVec<u32, 3>;

/// MPTCP metadata discovered on a flow's SYN/SYN-ACK options, present
/// only when MPTCP capability was negotiated. Grounded on `yfMPTCPFlow_t`
/// in the original source's `yafcore.h`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MptcpInfo {
    /// Initial data sequence number.
    pub idsn: u64,
    /// Receiver token.
    pub token: u32,
    /// Max segment size negotiated on the MPTCP subflow.
    pub mss: u16,
    /// Address id advertised in the MP_CAPABLE/MP_JOIN option.
    pub addr_id: u8,
}

/// A TCP connection's observed open/close state, used to decide a
/// [`EndReason::Closed`] close.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
struct TcpState {
    fwd_fin_or_rst: bool,
    rev_fin_or_rst: bool,
}

pub struct Flow {
    pub key: FlowKey,
    pub forward: FlowValue,
    pub reverse: FlowValue,
    pub start_time_ms: u64,
    pub last_packet_time_ms: u64,
    /// The reverse direction's initial round-trip estimate: the gap
    /// between `start_time_ms` and the first reverse packet. `None`
    /// until a reverse packet has arrived.
    pub rdtime_ms: Option<u64>,
    /// True if this flow was opened to continue one that was closed
    /// out from under it by an active timeout.
    pub is_continuation: bool,
    pub mpls_labels: MplsLabels,
    pub mptcp: Option<MptcpInfo>,
    /// Set by [`crate::yaf::flow_table::FlowTable`] once the flow has
    /// been decided to close; `None` for a still-open flow.
    pub end_reason: Option<EndReason>,
    /// Application label assigned by the configured
    /// [`crate::yaf::plugin::LabelPlugin`]; zero means unlabelled.
    pub app_label: u16,
    /// Opaque per-flow DPI context owned by the label plugin, per
    /// `SPEC_FULL.md` §9's boxed-trait-object re-architecture of the
    /// source's raw-pointer-plus-free-callback contract.
    pub dpi_ctx: Option<Box<dyn FlowContext>>,
    /// Count of payload-bearing packets seen across both directions,
    /// used by [`crate::yaf::flow_table::FlowTable`] to decide when to
    /// invoke the label plugin.
    pub payload_packet_count: u32,
    /// True once the label plugin has been given its one scan attempt
    /// for this flow (whether or not it matched), so it is not retried
    /// forever on a flow it has already declined.
    pub label_done: bool,
    tcp_state: TcpState,
}

impl Flow {
    pub fn new(key: FlowKey, timestamp_ms: u64) -> Self {
        Flow {
            key,
            forward: FlowValue::default(),
            reverse: FlowValue::default(),
            start_time_ms: timestamp_ms,
            last_packet_time_ms: timestamp_ms,
            rdtime_ms: None,
            is_continuation: false,
            mpls_labels: MplsLabels::new(),
            mptcp: None,
            end_reason: None,
            app_label: 0,
            dpi_ctx: None,
            payload_packet_count: 0,
            label_done: false,
            tcp_state: TcpState::default(),
        }
    }

    /// Starts a new flow continuing this one after an active timeout,
    /// carrying over the key and MPLS/MPTCP context but none of the
    /// traffic counters.
    pub fn continuation(&self, timestamp_ms: u64) -> Self {
        let mut next = Flow::new(self.key, timestamp_ms);
        next.is_continuation = true;
        next.mpls_labels = self.mpls_labels.clone();
        next.mptcp = self.mptcp;
        next
    }

    pub fn value_for(&mut self, forward: bool) -> &mut FlowValue {
        if forward {
            &mut self.forward
        } else {
            &mut self.reverse
        }
    }

    /// Records a TCP FIN or RST seen on one direction; used to decide
    /// [`EndReason::Closed`].
    pub fn note_tcp_close_flag(&mut self, forward: bool, flags: u8) {
        use crate::yaf::flow_value::tcp_flags::{FIN, RST};
        let closes = flags & (FIN | RST) != 0;
        if !closes {
            return;
        }
        if forward {
            self.tcp_state.fwd_fin_or_rst = true;
        } else {
            self.tcp_state.rev_fin_or_rst = true;
        }
    }

    /// True once both directions have signalled close (or either has
    /// sent RST, which the caller should report via the same flag on
    /// both sides since an RST tears down the whole connection).
    pub fn tcp_closed(&self) -> bool {
        self.tcp_state.fwd_fin_or_rst && self.tcp_state.rev_fin_or_rst
    }

    pub fn idle_ms(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.last_packet_time_ms)
    }

    pub fn age_ms(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.start_time_ms)
    }

    pub fn total_packets(&self) -> u64 {
        self.forward.packets + self.reverse.packets
    }
}

impl std::fmt::Debug for Flow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Flow")
            .field("key", &self.key)
            .field("forward", &self.forward)
            .field("reverse", &self.reverse)
            .field("start_time_ms", &self.start_time_ms)
            .field("last_packet_time_ms", &self.last_packet_time_ms)
            .field("rdtime_ms", &self.rdtime_ms)
            .field("is_continuation", &self.is_continuation)
            .field("end_reason", &self.end_reason)
            .field("app_label", &self.app_label)
            .field("dpi_ctx", &self.dpi_ctx.is_some())
            .field("payload_packet_count", &self.payload_packet_count)
            .field("label_done", &self.label_done)
            .finish()
    }
}
