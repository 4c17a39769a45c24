//! `PBuf`: a decoded packet as handed from the decoder to the flow
//! table, via the ring. Grounded on `yfPBuf_t` / `yfTCPInfo_t` in the
//! original source's `yaftab.h`/`yafcore.h`.

use crate::yaf::flow_key::FlowKey;

/// Per-fragment bookkeeping a decoded fragment carries until the
/// fragment table has reassembled the full datagram. Grounded on
/// `yfIPFragInfo_t`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FragInfo {
    pub ip_id: u32,
    pub frag_offset: u16,
    pub more_fragments: bool,
    /// True once the fragment table has reassembled the full datagram
    /// into this `PBuf`'s payload; false while still a single fragment
    /// awaiting its siblings.
    pub reassembled: bool,
}

/// A single decoded packet, ready to be folded into the flow table.
///
/// `timestamp_ms == 0` is the sentinel for "not a real packet" used by
/// the ring to represent an empty/uninitialised slot; [`PBuf::is_valid`]
/// checks this. A real capture at the Unix epoch is not representable,
/// which matches the source implementation's convention.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PBuf {
    pub key: FlowKey,
    /// Capture timestamp in milliseconds since the Unix epoch.
    pub timestamp_ms: u64,
    /// Total on-wire length of the packet, including headers.
    pub packet_len: u32,
    /// Length of the transport-layer payload.
    pub payload_len: u16,
    /// Captured payload bytes, truncated to the decoder's configured
    /// snapshot length.
    pub payload: Vec<u8>,
    /// TCP sequence number, meaningful only when `key.protocol == 6`.
    pub tcp_seq: u32,
    /// TCP flags octet, meaningful only when `key.protocol == 6`.
    pub tcp_flags: u8,
    /// True if an MPTCP option (kind 30) was found in this packet's
    /// TCP options, meaningful only when `key.protocol == 6`.
    pub mp_capable: bool,
    /// MPLS label stack, outermost first, if any.
    pub mpls_labels: arrayvec::ArrayVec<u32, 3>,
    /// Source MAC address, if the link layer carried one.
    pub mac_addr: [u8; 6],
    pub frag: Option<FragInfo>,
}

impl PBuf {
    /// A slot in the "not yet filled with a real packet" state.
    pub fn invalid() -> Self {
        PBuf::default()
    }

    pub fn is_valid(&self) -> bool {
        self.timestamp_ms != 0
    }
}
