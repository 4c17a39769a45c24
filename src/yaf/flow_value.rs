//! Per-direction flow state: counters, captured payload, and
//! attributes. Grounded on `yfFlowVal_t` in the original source's
//! `yafcore.h`.

use arrayvec::ArrayVec;

/// Bound on the number of per-packet payload-end offsets kept for
/// downstream DPI, mirroring `YAF_MAX_PKT_BOUNDARY` in the source.
pub const MAX_PAYLOAD_OFFSETS: usize = 25;

/// A non-empty packet at or below this size counts as "small" for the
/// per-direction small/large packet histogram.
pub const SMALL_PKT_BOUND: u16 = 60;
/// A non-empty packet at or above this size counts as "large".
pub const LARGE_PKT_BOUND: u16 = 225;

/// At least one non-empty packet in this direction, and every one of
/// them has had the same payload size.
pub const ATTR_SAME_SIZE: u8 = 0x01;
/// A TCP packet arrived with sequence number before the end of the
/// previous packet's payload.
pub const ATTR_OUT_OF_SEQUENCE: u8 = 0x02;
/// MPTCP capability was discovered on this direction.
pub const ATTR_MP_CAPABLE: u8 = 0x04;
/// At least one packet in this direction arrived via fragment
/// reassembly.
pub const ATTR_FRAGMENTS: u8 = 0x08;

/// TCP flag bits, as they appear in the TCP header's flags octet.
pub mod tcp_flags {
    pub const FIN: u8 = 0x01;
    pub const SYN: u8 = 0x02;
    pub const RST: u8 = 0x04;
    pub const PSH: u8 = 0x08;
    pub const ACK: u8 = 0x10;
    pub const URG: u8 = 0x20;
}

/// Optional per-direction statistics, populated only when the caller
/// configures extended stats collection (inter-arrival and packet-size
/// histograms, small/large packet counts, TCP urgent count).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FlowValueStats {
    /// Inter-arrival time histogram buckets, in milliseconds.
    pub inter_arrival: [u32; 10],
    /// Packet-size histogram buckets.
    pub packet_size: [u32; 10],
    pub tcp_urg_count: u32,
    pub small_pkt_count: u32,
    pub nonempty_pkt_count: u32,
    pub large_pkt_count: u32,
    /// Timestamp of the last packet seen in this direction, used to
    /// compute the next inter-arrival bucket.
    pub last_pkt_time_ms: u64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FlowValue {
    pub octets: u64,
    pub packets: u64,
    /// Captured payload bytes, up to the configured `max_payload` cap.
    pub payload: Vec<u8>,
    /// Offset into `payload` at which each packet's contribution ends,
    /// bounded so unbounded packet counts cannot grow this unboundedly.
    pub payload_offsets: ArrayVec<u32, MAX_PAYLOAD_OFFSETS>,
    /// TCP flags observed on the first packet in this direction.
    pub initial_flags: u8,
    /// Bitwise union of TCP flags observed across all packets in this
    /// direction.
    pub union_flags: u8,
    /// Initial TCP sequence number.
    pub isn: u32,
    /// Sequence number of the last packet seen, for out-of-sequence
    /// detection.
    pub last_seq: u32,
    /// Payload length of the last packet seen, for out-of-sequence
    /// detection (`last_seq + last_payload_len` is the expected next
    /// sequence number).
    pub last_payload_len: u32,
    /// Size of the first non-empty packet in this direction.
    pub first_pkt_size: u16,
    /// Payload size shared by every non-empty packet so far, used to
    /// maintain [`ATTR_SAME_SIZE`] incrementally; `None` once a
    /// mismatch is seen.
    pub uniform_pkt_size: Option<u16>,
    pub attributes: u8,
    /// VLAN id observed on this direction (may differ transiently from
    /// the flow key's VLAN id under VLAN reordering).
    pub vlan_id: u16,
    pub mac_addr: [u8; 6],
    pub stats: Option<FlowValueStats>,
}

impl FlowValue {
    pub fn has_attribute(&self, attr: u8) -> bool {
        self.attributes & attr != 0
    }

    /// Folds in one packet's worth of data: octet/packet counts, the
    /// same-size attribute, and (for non-empty packets) the
    /// small/large histogram when stats are enabled.
    pub fn record_packet(&mut self, packet_len: u32, payload_len: u16, timestamp_ms: u64) {
        self.octets += packet_len as u64;
        self.packets += 1;

        if payload_len > 0 {
            if self.first_pkt_size == 0 {
                self.first_pkt_size = payload_len;
            }
            match self.uniform_pkt_size {
                None if self.packets == 1 || self.first_pkt_size == payload_len => {
                    self.uniform_pkt_size = Some(payload_len);
                }
                Some(prev) if prev == payload_len => {}
                _ => {
                    self.uniform_pkt_size = None;
                    self.attributes &= !ATTR_SAME_SIZE;
                }
            }
            if self.uniform_pkt_size.is_some() {
                self.attributes |= ATTR_SAME_SIZE;
            }

            if let Some(stats) = self.stats.as_mut() {
                stats.nonempty_pkt_count += 1;
                if payload_len <= SMALL_PKT_BOUND {
                    stats.small_pkt_count += 1;
                }
                if payload_len >= LARGE_PKT_BOUND {
                    stats.large_pkt_count += 1;
                }
                let bucket = (payload_len as usize / 150).min(9);
                stats.packet_size[bucket] += 1;
            }
        }

        if let Some(stats) = self.stats.as_mut() {
            if stats.last_pkt_time_ms != 0 && timestamp_ms >= stats.last_pkt_time_ms {
                let delta = timestamp_ms - stats.last_pkt_time_ms;
                let bucket = (delta as usize / 100).min(9);
                stats.inter_arrival[bucket] += 1;
            }
            stats.last_pkt_time_ms = timestamp_ms;
        }
    }

    /// Checks and sets [`ATTR_OUT_OF_SEQUENCE`] for a TCP packet.
    pub fn check_out_of_sequence(&mut self, seq: u32, payload_len: u32) {
        if self.packets > 1 {
            let expected = self.last_seq.wrapping_add(self.last_payload_len);
            if seq < expected {
                self.attributes |= ATTR_OUT_OF_SEQUENCE;
            }
        }
        self.last_seq = seq;
        self.last_payload_len = payload_len;
    }

    pub fn push_payload(&mut self, data: &[u8], max_payload: usize) {
        if max_payload == 0 {
            return;
        }
        let room = max_payload.saturating_sub(self.payload.len());
        let take = data.len().min(room);
        if take > 0 {
            self.payload.extend_from_slice(&data[..take]);
        }
        if self.payload_offsets.len() < self.payload_offsets.capacity() {
            self.payload_offsets.push(self.payload.len() as u32);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_size_attribute_set_when_all_equal() {
        let mut v = FlowValue::default();
        v.record_packet(100, 40, 1);
        v.record_packet(100, 40, 2);
        v.record_packet(100, 40, 3);
        assert!(v.has_attribute(ATTR_SAME_SIZE));
    }

    #[test]
    fn same_size_attribute_cleared_on_mismatch() {
        let mut v = FlowValue::default();
        v.record_packet(100, 40, 1);
        v.record_packet(100, 41, 2);
        assert!(!v.has_attribute(ATTR_SAME_SIZE));
    }

    #[test]
    fn out_of_sequence_detected() {
        let mut v = FlowValue::default();
        v.check_out_of_sequence(1000, 100);
        v.check_out_of_sequence(1050, 50); // expected 1100, got 1050: out of order
        assert!(v.has_attribute(ATTR_OUT_OF_SEQUENCE));
    }

    #[test]
    fn payload_capture_truncates_at_cap() {
        let mut v = FlowValue::default();
        v.push_payload(&[1, 2, 3, 4, 5], 3);
        assert_eq!(v.payload, vec![1, 2, 3]);
        v.push_payload(&[6, 7, 8], 3);
        assert_eq!(v.payload, vec![1, 2, 3]);
    }
}
