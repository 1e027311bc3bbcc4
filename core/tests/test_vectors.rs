//! Verify the wire codec against JSON test vectors stored in `test-vectors/`.
//!
//! Comparing parsed JSON values (not raw strings) avoids false negatives from
//! field-ordering differences.

use reqbatch_core::wire::{self, WireRequest};

fn cases(raw: &str) -> Vec<serde_json::Value> {
    let vectors: serde_json::Value = serde_json::from_str(raw).unwrap();
    vectors["cases"].as_array().unwrap().clone()
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

#[test]
fn request_test_vectors() {
    for case in cases(include_str!("../../test-vectors/requests.json")) {
        let name = case["name"].as_str().unwrap();
        let payload = case["payload"].to_string();
        let expected = case["expected"].as_array().unwrap();

        let decoded = wire::decode_requests(&payload).unwrap();
        assert_eq!(decoded.len(), expected.len(), "{name}: length");

        for (i, (entry, want)) in decoded.iter().zip(expected).enumerate() {
            if let Some(canonical) = want.get("decoded") {
                let req = entry.as_ref().unwrap_or_else(|e| panic!("{name}[{i}]: {e}"));
                let actual = serde_json::to_value(WireRequest::from(req)).unwrap();
                assert_eq!(&actual, canonical, "{name}[{i}]: decoded form");
            }

            let prepared = entry.clone().and_then(|req| req.prepare());
            match want["prepare"].as_str().unwrap() {
                "ok" => assert!(prepared.is_ok(), "{name}[{i}]: {prepared:?}"),
                prefix => {
                    let cause = prepared.unwrap_err().to_string();
                    assert!(cause.starts_with(prefix), "{name}[{i}]: {cause}");
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

#[test]
fn result_test_vectors() {
    for case in cases(include_str!("../../test-vectors/results.json")) {
        let name = case["name"].as_str().unwrap();
        let payload = case["payload"].to_string();
        let expected = case["expected"].as_array().unwrap();

        let outcomes = wire::decode_results(&payload).unwrap();
        assert_eq!(outcomes.len(), expected.len(), "{name}: length");

        for (i, (outcome, want)) in outcomes.iter().zip(expected).enumerate() {
            if let Some(status) = want.get("status") {
                assert_eq!(outcome.status().map(u64::from), status.as_u64(), "{name}[{i}]");
            }
            if let Some(cause) = want.get("cause") {
                let actual = outcome.cause().unwrap_or_else(|| panic!("{name}[{i}]: not a failure"));
                assert!(actual.starts_with(cause.as_str().unwrap()), "{name}[{i}]: {actual}");
            }
        }

        if let Some(canonical) = case.get("canonical") {
            let encoded: serde_json::Value =
                serde_json::from_str(&wire::encode_results(&outcomes).unwrap()).unwrap();
            assert_eq!(&encoded, canonical, "{name}: canonical encoding");
        }
    }
}
