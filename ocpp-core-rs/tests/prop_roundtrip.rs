//! Property tests for framing and payload schemas
//!
//! Tests codec invariants:
//! - Envelope framing: unframe(frame(e)) == e for every version
//! - Payloads: try_parse(to_document(p)) == p, optionals and custom data included
//! - Unordered collections: equality and hash ignore insertion order
//! - Garbage input: parsing never panics and every answerable failure has an id

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use chrono::{DateTime, TimeZone, Utc};
use ocpp_core::messages::{Call, CallError, CallResult, Envelope};
use ocpp_core::schema::{v16, v2, CustomData, Extensions, Payload, ValueSet};
use ocpp_core::{CorrelationId, ErrorCode, ProtocolVersion, TextEnum};
use proptest::prelude::*;
use serde_json::{json, Value};

// ============================================================================
// Strategies
// ============================================================================

fn version() -> impl Strategy<Value = ProtocolVersion> {
    prop::sample::select(ProtocolVersion::ALL.to_vec())
}

fn v2_version() -> impl Strategy<Value = ProtocolVersion> {
    prop::sample::select(vec![ProtocolVersion::V201, ProtocolVersion::V21])
}

fn correlation_id() -> impl Strategy<Value = CorrelationId> {
    "[A-Za-z0-9-]{1,36}".prop_map(|s| CorrelationId::new(s).unwrap())
}

fn scalar() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::from),
        any::<i64>().prop_map(Value::from),
        "[ -~]{0,20}".prop_map(Value::from),
    ]
}

fn json_value() -> impl Strategy<Value = Value> {
    scalar().prop_recursive(3, 24, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Value::from),
            prop::collection::btree_map("[a-z]{1,6}", inner, 0..4)
                .prop_map(|m| Value::Object(m.into_iter().collect())),
        ]
    })
}

fn error_code() -> impl Strategy<Value = ErrorCode> {
    prop::sample::select(ErrorCode::ALL.to_vec())
}

fn envelope() -> impl Strategy<Value = Envelope> {
    prop_oneof![
        (correlation_id(), "[A-Z][A-Za-z]{1,30}", json_value())
            .prop_map(|(id, action, payload)| Envelope::from(Call::new(id, action, payload))),
        (correlation_id(), json_value())
            .prop_map(|(id, payload)| Envelope::from(CallResult::new(id, payload))),
        (correlation_id(), error_code(), "[ -~]{0,40}", json_value()).prop_map(
            |(id, code, description, details)| {
                let mut err = CallError::new(id, code, description);
                err.error_details = details;
                Envelope::from(err)
            }
        ),
    ]
}

fn text(max: usize) -> impl Strategy<Value = String> {
    proptest::string::string_regex(&format!("[A-Za-z0-9]{{1,{max}}}")).unwrap()
}

fn custom_data() -> impl Strategy<Value = Option<CustomData>> {
    prop::option::of(
        (
            "[a-z]{1,10}\\.[a-z]{2,8}",
            prop::collection::btree_map("[a-z]{1,8}", scalar(), 0..4),
        )
            .prop_map(|(vendor, fields)| {
                fields
                    .into_iter()
                    .fold(CustomData::new(vendor), |cd, (k, v)| cd.with_field(k, v))
            }),
    )
}

fn timestamp() -> impl Strategy<Value = DateTime<Utc>> {
    (0i64..4_102_444_800, prop_oneof![Just(0u32), 0u32..1_000_000_000])
        .prop_map(|(secs, nanos)| Utc.timestamp_opt(secs, nanos).unwrap())
}

fn additional_info() -> impl Strategy<Value = v2::AdditionalInfo> {
    (text(36), text(50), custom_data()).prop_map(|(additional_id_token, kind, custom_data)| {
        v2::AdditionalInfo {
            additional_id_token,
            kind,
            custom_data,
        }
    })
}

fn id_token_kind(version: ProtocolVersion) -> BoxedStrategy<v2::IdTokenType> {
    let known = prop::sample::select(vec![
        v2::IdTokenEnum::Central,
        v2::IdTokenEnum::EMaid,
        v2::IdTokenEnum::Iso14443,
        v2::IdTokenEnum::KeyCode,
        v2::IdTokenEnum::NoAuthorization,
    ])
    .prop_map(v2::IdTokenType::Known);
    match version {
        ProtocolVersion::V21 => {
            // Vocabulary names in any case must come back as the same value
            let vocabulary = prop::sample::select(
                v2::IdTokenEnum::variants()
                    .iter()
                    .flat_map(|k| [k.as_str().to_string(), k.as_str().to_ascii_lowercase()])
                    .collect::<Vec<_>>(),
            );
            prop_oneof![
                known,
                vocabulary.prop_map(v2::IdTokenType::from_text),
                "[A-Za-z][A-Za-z0-9]{0,19}".prop_map(v2::IdTokenType::from_text),
            ]
            .boxed()
        }
        _ => known.boxed(),
    }
}

fn id_token(version: ProtocolVersion) -> impl Strategy<Value = v2::IdToken> {
    (
        text(36),
        id_token_kind(version),
        prop::collection::vec(additional_info(), 0..4),
        custom_data(),
    )
        .prop_map(|(id, kind, infos, custom_data)| v2::IdToken {
            id_token: id,
            kind,
            additional_info: infos.into_iter().collect(),
            custom_data,
        })
}

fn ocsp() -> impl Strategy<Value = v2::OcspRequestData> {
    (
        prop::sample::select(vec![
            v2::HashAlgorithm::Sha256,
            v2::HashAlgorithm::Sha384,
            v2::HashAlgorithm::Sha512,
        ]),
        text(128),
        text(128),
        text(40),
        "https://[a-z]{1,20}\\.example/ocsp",
    )
        .prop_map(
            |(hash_algorithm, issuer_name_hash, issuer_key_hash, serial_number, responder_url)| {
                v2::OcspRequestData {
                    hash_algorithm,
                    issuer_name_hash,
                    issuer_key_hash,
                    serial_number,
                    responder_url,
                    custom_data: None,
                }
            },
        )
}

fn authorize_v2() -> impl Strategy<Value = (ProtocolVersion, v2::AuthorizeRequest)> {
    v2_version().prop_flat_map(|version| {
        (
            id_token(version),
            prop::option::of(text(200)),
            prop::collection::vec(ocsp(), 0..=4),
            custom_data(),
        )
            .prop_map(move |(id_token, certificate, hashes, custom_data)| {
                (
                    version,
                    v2::AuthorizeRequest {
                        id_token,
                        certificate,
                        iso15118_certificate_hash_data: hashes.into_iter().collect(),
                        custom_data,
                    },
                )
            })
    })
}

fn boot_v16() -> impl Strategy<Value = v16::BootNotificationRequest> {
    (
        text(20),
        text(20),
        prop::option::of(text(25)),
        prop::option::of(text(25)),
        prop::option::of(text(50)),
        prop::option::of(text(20)),
        prop::option::of(text(20)),
        prop::option::of(text(25)),
        prop::option::of(text(25)),
    )
        .prop_map(
            |(
                vendor,
                model,
                cp_serial,
                cb_serial,
                firmware,
                iccid,
                imsi,
                meter_type,
                meter_serial,
            )| {
                v16::BootNotificationRequest {
                    charge_point_vendor: vendor,
                    charge_point_model: model,
                    charge_point_serial_number: cp_serial,
                    charge_box_serial_number: cb_serial,
                    firmware_version: firmware,
                    iccid,
                    imsi,
                    meter_type,
                    meter_serial_number: meter_serial,
                }
            },
        )
}

fn status_notification_v2() -> impl Strategy<Value = v2::StatusNotificationRequest> {
    (
        timestamp(),
        prop::sample::select(vec![
            v2::ConnectorStatus::Available,
            v2::ConnectorStatus::Occupied,
            v2::ConnectorStatus::Reserved,
            v2::ConnectorStatus::Unavailable,
            v2::ConnectorStatus::Faulted,
        ]),
        0i32..1000,
        0i32..1000,
        custom_data(),
    )
        .prop_map(|(timestamp, connector_status, evse_id, connector_id, custom_data)| {
            v2::StatusNotificationRequest {
                timestamp,
                connector_status,
                evse_id,
                connector_id,
                custom_data,
            }
        })
}

fn hash_of<T: Hash>(value: &T) -> u64 {
    let mut hasher = DefaultHasher::new();
    value.hash(&mut hasher);
    hasher.finish()
}

// ============================================================================
// Envelope Property Tests
// ============================================================================

proptest! {
    /// CORE INVARIANT: framing is lossless for every version
    #[test]
    fn envelope_frame_unframe(env in envelope(), version in version()) {
        let text = env.to_text(version);
        let parsed = Envelope::parse(&text).unwrap();
        prop_assert_eq!(parsed, env);
    }

    /// Arbitrary text never panics the parser
    #[test]
    fn parse_never_panics(text in "\\PC{0,64}") {
        if let Err(err) = Envelope::parse(&text) {
            if err.should_reply() {
                let reply = err.to_call_error();
                prop_assert!(!reply.correlation_id.as_str().is_empty());
            }
        }
    }

    /// Arbitrary JSON arrays never panic and answer with the salvaged id
    #[test]
    fn unframe_json_arrays(items in prop::collection::vec(json_value(), 0..6)) {
        let doc = Value::from(items);
        if let Err(err) = Envelope::unframe(&doc) {
            let reply = err.to_call_error();
            match doc.get(1).and_then(Value::as_str).filter(|s| !s.is_empty()) {
                Some(id) => prop_assert_eq!(reply.correlation_id.as_str(), id),
                None => prop_assert_eq!(reply.correlation_id.as_str(), "-1"),
            }
        }
    }
}

// ============================================================================
// Payload Property Tests
// ============================================================================

proptest! {
    /// 2.x Authorize survives serialization with nested sets and custom data
    #[test]
    fn authorize_v2_roundtrip((version, req) in authorize_v2()) {
        let doc = req.to_document(&Extensions::default());
        let parsed = v2::AuthorizeRequest::try_parse(&doc, version).unwrap();
        prop_assert_eq!(parsed, req);
    }

    /// Absent optionals stay absent on the wire
    #[test]
    fn boot_v16_roundtrip(req in boot_v16()) {
        let doc = req.to_document(&Extensions::default());
        prop_assert!(doc.as_object().unwrap().values().all(|v| !v.is_null()));
        let parsed = v16::BootNotificationRequest::try_parse(&doc, ProtocolVersion::V16).unwrap();
        prop_assert_eq!(parsed, req);
    }

    /// Timestamps keep sub-second precision
    #[test]
    fn status_notification_v2_roundtrip(req in status_notification_v2(), version in v2_version()) {
        let doc = req.to_document(&Extensions::default());
        let parsed = v2::StatusNotificationRequest::try_parse(&doc, version).unwrap();
        prop_assert_eq!(parsed, req);
    }

    /// Custom data fields come back with the same vendor and values
    #[test]
    fn custom_data_roundtrip(cd in custom_data().prop_filter("present", Option::is_some)) {
        let cd = cd.unwrap();
        let parsed = CustomData::parse(&cd.to_value()).unwrap();
        prop_assert_eq!(hash_of(&parsed), hash_of(&cd));
        prop_assert_eq!(parsed, cd);
    }
}

// ============================================================================
// Unordered Collection Property Tests
// ============================================================================

proptest! {
    /// Equality and hash ignore insertion order
    #[test]
    fn value_set_order_independent(
        items in prop::collection::vec(0i32..50, 0..12),
        seed in any::<u64>()
    ) {
        let forward: ValueSet<i32> = items.iter().copied().collect();
        let mut shuffled = items.clone();
        let len = shuffled.len();
        if len > 1 {
            // Deterministic rotation plus reversal from the seed
            shuffled.rotate_left((seed as usize) % len);
            shuffled.reverse();
        }
        let backward: ValueSet<i32> = shuffled.into_iter().collect();

        prop_assert_eq!(&forward, &backward);
        prop_assert_eq!(hash_of(&forward), hash_of(&backward));
    }

    /// Duplicates collapse to one member
    #[test]
    fn value_set_deduplicates(items in prop::collection::vec(0i32..5, 0..20)) {
        let set: ValueSet<i32> = items.iter().copied().collect();
        let mut unique = items.clone();
        unique.sort_unstable();
        unique.dedup();
        prop_assert_eq!(set.len(), unique.len());
        for item in &items {
            prop_assert!(set.contains(item));
        }
    }

    /// Element order on the wire does not change the parsed value
    #[test]
    fn evse_ids_any_order(ids in prop::collection::btree_set(0i32..100, 1..6)) {
        let ids: Vec<i32> = ids.into_iter().collect();
        let mut reversed = ids.clone();
        reversed.reverse();

        let a = v2::IdTokenInfo::try_parse(
            &json!({"status": "Accepted", "evseId": ids}),
            ProtocolVersion::V201,
        ).unwrap();
        let b = v2::IdTokenInfo::try_parse(
            &json!({"status": "Accepted", "evseId": reversed}),
            ProtocolVersion::V201,
        ).unwrap();
        prop_assert_eq!(a, b);
    }
}
