//! Tests for error conversions
//!
//! Checks that the `?` operator works with the codecs the crate uses and that
//! policy errors are classified as such.

use crate::error::{CumulusError, CumulusResult};

#[test]
fn test_bincode_error_conversion() {
    fn decode() -> CumulusResult<u64> {
        let value: u64 = bincode::deserialize(&[1u8, 2])?;
        Ok(value)
    }

    match decode() {
        Err(CumulusError::Serialization { operation, .. }) => assert_eq!(operation, "bincode"),
        other => panic!("Expected Serialization error, got {:?}", other),
    }
}

#[test]
fn test_toml_error_conversion() {
    fn parse() -> CumulusResult<toml::Value> {
        Ok(toml::from_str::<toml::Value>("this is = = not toml")?)
    }

    assert!(matches!(parse(), Err(CumulusError::Serialization { .. })));
}

#[test]
fn test_policy_error_classification() {
    let conflict = CumulusError::affinity_conflict("web-1", "pods 1 and 2 are disjoint");
    assert!(conflict.is_policy_error());

    let mismatch = CumulusError::BareMetalCapacityMismatch {
        offering: "bm-large".to_string(),
        host_id: 7,
        expected: "8x2000MHz".to_string(),
        actual: "16x2000MHz".to_string(),
    };
    assert!(mismatch.is_policy_error());
    assert!(mismatch.to_string().contains("host 7"));

    let exhausted = CumulusError::InsufficientCapacity {
        vm: "web-1".to_string(),
        zone_id: 1,
        message: "no host".to_string(),
    };
    assert!(!exhausted.is_policy_error());
}
