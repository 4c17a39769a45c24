//! The tuple used to index flows.

/// A source or destination address, stored at its natural width so no
/// allocation is needed for the common IPv4 case.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, serde::Deserialize, serde::Serialize)]
pub enum FlowAddr {
    V4([u8; 4]),
    V6([u8; 16]),
}

impl FlowAddr {
    pub fn version(&self) -> u8 {
        match self {
            FlowAddr::V4(_) => 4,
            FlowAddr::V6(_) => 6,
        }
    }
}

impl Default for FlowAddr {
    fn default() -> Self {
        FlowAddr::V4([0; 4])
    }
}

/// Five-tuple plus discriminators: addresses, ports, protocol, IP
/// version, VLAN id, and an opaque layer-2 identifier (used to keep
/// otherwise-identical flows on different physical/virtual interfaces
/// apart).
///
/// For ICMP and ICMPv6, `dest_port` holds `(type << 8 | code)` and only
/// the forward direction carries it; a reverse ICMP packet (e.g. an
/// echo reply answering an echo request) encodes a different type/code
/// pair and is represented as its own flow rather than joined to the
/// request. This mirrors the source implementation's behavior exactly
/// and is by design, not an oversight — see `SPEC_FULL.md` section 9.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, serde::Deserialize, serde::Serialize)]
pub struct FlowKey {
    pub source_addr: FlowAddr,
    pub dest_addr: FlowAddr,
    pub source_port: u16,
    pub dest_port: u16,
    pub protocol: u8,
    pub ip_version: u8,
    pub vlan_id: u16,
    pub layer2_id: u32,
}

impl FlowKey {
    /// True if this key's protocol is one where the reverse direction
    /// is never joined to the forward flow (ICMP/ICMPv6). See the
    /// doc comment on the struct.
    pub fn is_reverse_unjoinable(&self) -> bool {
        const ICMP: u8 = 1;
        const ICMPV6: u8 = 58;
        self.protocol == ICMP || self.protocol == ICMPV6
    }

    /// The key a packet in the opposite direction of this flow would
    /// present. VLAN id is preserved (not cleared) on the reverse key:
    /// a packet on a different VLAN never joins a flow opened on
    /// another, in either direction. This tightens the source's
    /// ambiguous "clear VLAN check on reverse only" behavior into an
    /// explicit policy — see `SPEC_FULL.md` section 9.
    pub fn reversed(&self) -> FlowKey {
        FlowKey {
            source_addr: self.dest_addr,
            dest_addr: self.source_addr,
            source_port: self.dest_port,
            dest_port: self.source_port,
            protocol: self.protocol,
            ip_version: self.ip_version,
            vlan_id: self.vlan_id,
            layer2_id: self.layer2_id,
        }
    }
}
