//! Property-based tests for the OID model and the PDU codec.

use agentx_subagent::error::ErrorStatus;
use agentx_subagent::oid::Oid;
use agentx_subagent::pdu::{
    AddAgentCapsPdu, ClosePdu, CloseReason, GetBulkPdu, OpenPdu, Payload, Pdu, PduFlags,
    RegisterPdu, RemoveAgentCapsPdu, ResponsePdu, SearchRange, SearchRangeList, UnregisterPdu,
    VarBindList,
};
use agentx_subagent::registry::Registration;
use agentx_subagent::value::Value;
use agentx_subagent::varbind::VarBind;
use agentx_subagent::wire::ByteOrder;
use proptest::prelude::*;

// =============================================================================
// Strategies
// =============================================================================

/// OIDs of every shape the codec distinguishes: null, short, internet-prefixed
/// (compressible), and with the include flag.
fn arb_oid() -> impl Strategy<Value = Oid> {
    let subids = prop_oneof![
        Just(Vec::new()),
        prop::collection::vec(any::<u32>(), 1..=12),
        (0u32..=300, prop::collection::vec(any::<u32>(), 0..=10)).prop_map(|(x, tail)| {
            let mut v = vec![1, 3, 6, 1, x];
            v.extend(tail);
            v
        }),
        prop::collection::vec(Just(u32::MAX), 128..=128),
    ];
    (subids, any::<bool>()).prop_map(|(s, include)| Oid::from(s).with_include(include))
}

fn arb_octets() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..=13)
}

fn arb_value() -> impl Strategy<Value = Value> {
    prop_oneof![
        any::<i32>().prop_map(Value::Integer),
        arb_octets().prop_map(Value::OctetString),
        Just(Value::Null),
        arb_oid().prop_map(Value::ObjectIdentifier),
        any::<[u8; 4]>().prop_map(Value::IpAddress),
        any::<u32>().prop_map(Value::Counter32),
        any::<u32>().prop_map(Value::Gauge32),
        any::<u32>().prop_map(Value::TimeTicks),
        arb_octets().prop_map(Value::Opaque),
        any::<u64>().prop_map(Value::Counter64),
        Just(Value::NoSuchObject),
        Just(Value::NoSuchInstance),
        Just(Value::EndOfMibView),
    ]
}

fn arb_varbinds() -> impl Strategy<Value = Vec<VarBind>> {
    prop::collection::vec(
        (arb_oid(), arb_value()).prop_map(|(oid, value)| VarBind::new(oid, value)),
        0..=4,
    )
}

fn arb_ranges() -> impl Strategy<Value = Vec<SearchRange>> {
    prop::collection::vec(
        (arb_oid(), arb_oid()).prop_map(|(start, end)| SearchRange::new(start, end)),
        0..=4,
    )
}

fn arb_payload() -> impl Strategy<Value = Payload> {
    prop_oneof![
        (any::<u8>(), arb_oid(), arb_octets()).prop_map(|(timeout, id, description)| {
            Payload::Open(OpenPdu {
                timeout,
                id,
                description,
            })
        }),
        any::<u8>().prop_map(|r| Payload::Close(ClosePdu {
            reason: CloseReason::from_u8(r)
        })),
        (any::<u8>(), any::<u8>(), any::<u8>(), arb_oid(), any::<u32>()).prop_map(
            |(timeout, priority, range_subid, subtree, bound)| {
                Payload::Register(RegisterPdu {
                    timeout,
                    priority,
                    range_subid,
                    subtree,
                    upper_bound: if range_subid == 0 { 0 } else { bound },
                })
            }
        ),
        (any::<u8>(), any::<u8>(), arb_oid(), any::<u32>()).prop_map(
            |(priority, range_subid, subtree, bound)| {
                Payload::Unregister(UnregisterPdu {
                    priority,
                    range_subid,
                    subtree,
                    upper_bound: if range_subid == 0 { 0 } else { bound },
                })
            }
        ),
        arb_ranges().prop_map(|ranges| Payload::Get(SearchRangeList { ranges })),
        arb_ranges().prop_map(|ranges| Payload::GetNext(SearchRangeList { ranges })),
        (any::<u16>(), any::<u16>(), arb_ranges()).prop_map(|(n, m, ranges)| {
            Payload::GetBulk(GetBulkPdu {
                non_repeaters: n,
                max_repetitions: m,
                ranges,
            })
        }),
        arb_varbinds().prop_map(|varbinds| Payload::TestSet(VarBindList { varbinds })),
        Just(Payload::CommitSet),
        Just(Payload::UndoSet),
        Just(Payload::CleanupSet),
        arb_varbinds().prop_map(|varbinds| Payload::Notify(VarBindList { varbinds })),
        Just(Payload::Ping),
        arb_varbinds().prop_map(|varbinds| Payload::IndexAllocate(VarBindList { varbinds })),
        arb_varbinds().prop_map(|varbinds| Payload::IndexDeallocate(VarBindList { varbinds })),
        (arb_oid(), arb_octets()).prop_map(|(id, description)| {
            Payload::AddAgentCaps(AddAgentCapsPdu { id, description })
        }),
        arb_oid().prop_map(|id| Payload::RemoveAgentCaps(RemoveAgentCapsPdu { id })),
        (any::<u32>(), any::<u16>(), any::<u16>(), arb_varbinds()).prop_map(
            |(sys_uptime, error, index, varbinds)| {
                Payload::Response(ResponsePdu {
                    sys_uptime,
                    error: ErrorStatus::from_u16(error),
                    index,
                    varbinds,
                })
            }
        ),
    ]
}

prop_compose! {
    fn arb_pdu()(
        payload in arb_payload(),
        big_endian in any::<bool>(),
        flags in any::<(bool, bool, bool)>(),
        ids in any::<(u32, u32, u32)>(),
        context in prop::option::of(arb_octets()),
    ) -> Pdu {
        let mut pdu = Pdu::new(payload);
        pdu.byte_order = if big_endian { ByteOrder::BigEndian } else { ByteOrder::LittleEndian };
        pdu.flags = PduFlags {
            instance_registration: flags.0,
            new_index: flags.1,
            any_index: flags.2,
        };
        (pdu.session_id, pdu.transaction_id, pdu.packet_id) = ids;
        if pdu.pdu_type().allows_context() {
            pdu.context = context;
        }
        pdu
    }
}

// =============================================================================
// Properties
// =============================================================================

proptest! {
    #[test]
    fn pdu_roundtrip(pdu in arb_pdu()) {
        let bytes = pdu.encode();
        let decoded = Pdu::from_bytes(&bytes).unwrap();
        prop_assert_eq!(&decoded, &pdu);
        prop_assert_eq!(decoded.encode(), bytes);
    }

    #[test]
    fn pdu_truncation_is_an_error(pdu in arb_pdu(), cut in any::<prop::sample::Index>()) {
        let bytes = pdu.encode();
        let keep = cut.index(bytes.len());
        prop_assert!(Pdu::from_bytes(&bytes[..keep]).is_err());
    }

    #[test]
    fn oid_order_is_total(a in arb_oid(), b in arb_oid()) {
        let ab = a.compare(&b);
        prop_assert_eq!(ab, b.compare(&a).reverse());
        prop_assert_eq!(ab.is_eq(), a.as_slice() == b.as_slice());
    }

    #[test]
    fn oid_prefix_sorts_first(a in arb_oid(), tail in prop::collection::vec(any::<u32>(), 1..=4)) {
        prop_assume!(a.len() + tail.len() <= 128);
        let child = a.join(&tail);
        prop_assert!(a.compare(&child).is_lt());
        prop_assert!(a.contains(&child));
        prop_assert!(!child.contains(&a));
    }

    #[test]
    fn oid_contains_iff_prefix(a in arb_oid(), b in arb_oid()) {
        let prefix = b.as_slice().len() >= a.len() && b.as_slice()[..a.len()] == *a.as_slice();
        prop_assert_eq!(a.contains(&b), prefix);
    }

    #[test]
    fn oid_text_roundtrip(a in arb_oid()) {
        let parsed: Oid = a.to_string().parse().unwrap();
        prop_assert_eq!(parsed.as_slice(), a.as_slice());
    }

    #[test]
    fn registration_covers_its_subtree(
        subtree in prop::collection::vec(0u32..1000, 1..=8),
        tail in prop::collection::vec(any::<u32>(), 0..=3),
    ) {
        let reg = Registration::new(Oid::from(subtree.clone()));
        let mut inside = subtree.clone();
        inside.extend(tail);
        prop_assert!(reg.covers(&Oid::from(inside)));
        let mut sibling = subtree;
        if let Some(last) = sibling.last_mut() {
            *last += 1;
        }
        prop_assert!(!reg.covers(&Oid::from(sibling)));
    }
}
