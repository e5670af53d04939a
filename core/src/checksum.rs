//! Row checksums used to skip re-applying identical snapshots.
//!
//! The checksum is the classic 31-multiplier rolling hash over UTF-16 code
//! units with 32-bit wrapping arithmetic, so it agrees with what browser
//! clients of the same server compute for the same text.

use serde::Serialize;

use crate::protocol::RowSnapshot;

/// Checksum of `s`, walking its UTF-16 code units.
pub fn checksum_str(s: &str) -> i32 {
    s.encode_utf16().fold(0i32, |acc, unit| {
        acc.wrapping_shl(5)
            .wrapping_sub(acc)
            .wrapping_add(i32::from(unit))
    })
}

/// Checksum of any serializable value's canonical JSON text.
///
/// Object keys are ordered because every map in the snapshot model is a
/// `BTreeMap`, so two equal values always hash the same.
pub fn checksum_json<T: Serialize>(value: &T) -> Result<i32, serde_json::Error> {
    serde_json::to_string(value).map(|text| checksum_str(&text))
}

/// Checksum of a row snapshot.
///
/// Serializing a snapshot cannot fail for data that was itself deserialized
/// from JSON; if it somehow does, the row id alone is hashed so the row is
/// still reconciled rather than wedged.
pub fn row_checksum(snapshot: &RowSnapshot) -> i32 {
    match checksum_json(snapshot) {
        Ok(sum) => sum,
        Err(err) => {
            tracing::error!(row = %snapshot.xpstrid, error = %err, "failed to serialize row snapshot");
            checksum_str(snapshot.xpstrid.as_str())
        }
    }
}
