//! Result hashing
//!
//! xxh3-64 over a canonical encoding of a result page: for every result, in
//! order, the length-prefixed entity id, each trait as canonical JSON
//! (message fields are a `BTreeMap`, so key order is stable), and the
//! ordering value as tag, payload and operation id. The commit status of a
//! result is not part of the hash.

use exocore_core::{EntityResult, OrderingValue, OrderingValueKind, Result};
use xxhash_rust::xxh3::Xxh3;

/// Hash a page of results
pub fn hash_results(results: &[EntityResult]) -> Result<u64> {
    let mut hasher = Xxh3::new();
    hasher.update(&(results.len() as u64).to_le_bytes());
    for result in results {
        write_bytes(&mut hasher, result.entity.id.as_str().as_bytes());
        hasher.update(&(result.entity.traits.len() as u64).to_le_bytes());
        for r#trait in &result.entity.traits {
            let encoded = serde_json::to_vec(r#trait)?;
            write_bytes(&mut hasher, &encoded);
        }
        write_ordering_value(&mut hasher, &result.ordering_value);
    }
    Ok(hasher.digest())
}

fn write_bytes(hasher: &mut Xxh3, bytes: &[u8]) {
    hasher.update(&(bytes.len() as u64).to_le_bytes());
    hasher.update(bytes);
}

fn write_ordering_value(hasher: &mut Xxh3, value: &OrderingValue) {
    match value.value {
        OrderingValueKind::Float(v) => {
            hasher.update(&[1]);
            hasher.update(&v.to_bits().to_le_bytes());
        }
        OrderingValueKind::Uint64(v) => {
            hasher.update(&[2]);
            hasher.update(&v.to_le_bytes());
        }
        OrderingValueKind::Date(v) => {
            hasher.update(&[3]);
            hasher.update(&v.timestamp().to_le_bytes());
            hasher.update(&v.timestamp_subsec_nanos().to_le_bytes());
        }
        OrderingValueKind::Min => hasher.update(&[4]),
        OrderingValueKind::Max => hasher.update(&[5]),
    }
    hasher.update(&value.operation_id.to_le_bytes());
}
