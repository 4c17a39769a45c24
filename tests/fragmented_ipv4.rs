//! End-to-end scenario from `SPEC_FULL.md` §8: a UDP datagram split
//! into three IPv4 fragments, delivered out of order, reassembles into
//! one packet folded into exactly one flow.
//!
//! This drives the same decode → defragment → flow-table path
//! `Pipeline`'s capture loop uses, built from the public `Decoder` and
//! `FragTable` APIs directly (the pipeline's own glue function is
//! private) so the scenario exercises real wire bytes rather than a
//! hand-built `PBuf`.

mod common;

use yaf_core::yaf::decode::LinkType;
use yaf_core::yaf::frag::FragKey;
use yaf_core::{Decoder, FlowTable, FragTable, YafConfig};

const ETHER_TYPE_IPV4: u16 = 0x0800;
const IP_PROTO_UDP: u8 = 17;

/// One Ethernet + IPv4 fragment frame. `frag_offset_units` is the IP
/// header's fragment-offset field, in 8-byte units; `payload` is this
/// fragment's contribution to the IP payload (for the zero-offset
/// fragment, that includes the UDP header).
fn ipv4_fragment(frag_offset_units: u16, more: bool, ip_id: u16, payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::new();
    frame.extend_from_slice(&[0xaa; 6]);
    frame.extend_from_slice(&[0xbb; 6]);
    frame.extend_from_slice(&ETHER_TYPE_IPV4.to_be_bytes());

    frame.push(0x45);
    frame.push(0);
    frame.extend_from_slice(&((20 + payload.len()) as u16).to_be_bytes());
    frame.extend_from_slice(&ip_id.to_be_bytes());
    let flags_frag = (if more { 0x2000 } else { 0 }) | frag_offset_units;
    frame.extend_from_slice(&flags_frag.to_be_bytes());
    frame.push(64);
    frame.push(IP_PROTO_UDP);
    frame.extend_from_slice(&0u16.to_be_bytes());
    frame.extend_from_slice(&[10, 0, 0, 5]);
    frame.extend_from_slice(&[10, 0, 0, 6]);
    frame.extend_from_slice(payload);
    frame
}

#[test]
fn three_out_of_order_fragments_reassemble_into_one_flow() {
    common::init_tracing();
    // A 3000-byte IP datagram (20-byte IP header + 8-byte UDP header +
    // 2972 bytes of payload). The fragmentable part — UDP header plus
    // payload, 2980 bytes — is split at byte offsets 0/1400/2800 and
    // delivered in the order 2, 1, 3.
    let udp_header = {
        let mut h = vec![0u8; 8];
        h[0..2].copy_from_slice(&7000u16.to_be_bytes());
        h[2..4].copy_from_slice(&9000u16.to_be_bytes());
        h[4..6].copy_from_slice(&2980u16.to_be_bytes());
        h
    };
    let mut datagram = udp_header;
    datagram.extend(std::iter::repeat(0xab).take(2980 - 8));
    assert_eq!(datagram.len(), 2980);

    let chunk1 = &datagram[0..1400];
    let chunk2 = &datagram[1400..2800];
    let chunk3 = &datagram[2800..2980];

    let mut decoder = Decoder::new(false, false);
    let mut frag_table = FragTable::new(16, 1 << 16, 30_000);
    let mut flow_table = FlowTable::new(YafConfig::default());

    let frame2 = ipv4_fragment(1400 / 8, true, 42, chunk2);
    let frame1 = ipv4_fragment(0, true, 42, chunk1);
    let frame3 = ipv4_fragment(2800 / 8, false, 42, chunk3);

    let mut completed = None;
    for (i, frame) in [frame2, frame1, frame3].into_iter().enumerate() {
        let mut pbuf = yaf_core::PBuf::invalid();
        decoder
            .decode(LinkType::Ethernet, i as u64 + 1, frame.len() as u32, &frame, 0, &mut pbuf)
            .unwrap();
        let frag = pbuf.frag.expect("fragment info present");

        let frag_key = FragKey {
            source_addr: pbuf.key.source_addr,
            dest_addr: pbuf.key.dest_addr,
            ip_id: frag.ip_id,
            protocol: pbuf.key.protocol,
        };
        let reassembled = frag_table.insert(
            frag_key,
            i as u64 + 1,
            0,
            frag.frag_offset as usize,
            &pbuf.payload,
            frag.more_fragments,
        );
        if let Some(datagram) = reassembled {
            decoder
                .decode_reassembled_transport(pbuf.key.protocol, &datagram.payload, &mut pbuf)
                .unwrap();
            completed = Some(pbuf);
        }
    }

    let final_pbuf = completed.expect("all three fragments delivered, datagram should complete");
    assert_eq!(final_pbuf.key.source_port, 7000);
    assert_eq!(final_pbuf.key.dest_port, 9000);
    assert_eq!(final_pbuf.payload.len(), 2972);

    flow_table.update(&final_pbuf);
    assert_eq!(flow_table.open_flows(), 1);

    let mut writer = common::VecWriter::default();
    flow_table.flush(10, true, &mut writer).unwrap();
    assert_eq!(writer.flows.len(), 1);
    assert_eq!(writer.flows[0].forward.packets, 1);
}
