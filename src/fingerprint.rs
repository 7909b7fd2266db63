//! Deterministic row content hashing (C2).

use crate::value::Row;
use sha2::{Digest, Sha256};

/// Compute a stable, printable fingerprint of `row` projected onto
/// `columns` in declaration order.
///
/// Collisions are treated as row-version equality, consistent with the
/// canonical SCD-2 convention of trusting a cryptographic hash.
#[must_use]
pub fn fingerprint(row: &Row, columns: &[String]) -> String {
    let mut bytes = Vec::new();
    for column in columns {
        let value = crate::value::get(row, column);
        match value {
            Some(v) => v.encode_for_fingerprint(&mut bytes),
            None => bytes.push(0), // absent column behaves like NULL
        }
    }

    let digest = Sha256::digest(&bytes);
    hex::encode(digest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    fn row(pairs: &[(&str, Value)]) -> Row {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn same_payload_same_hash() {
        let columns = vec!["car".to_string(), "hp".to_string()];
        let r1 = row(&[
            ("car", Value::Text("Mazda RX4".to_string())),
            ("hp", Value::Integer(110)),
        ]);
        let r2 = row(&[
            ("hp", Value::Integer(110)),
            ("car", Value::Text("Mazda RX4".to_string())),
        ]);
        assert_eq!(fingerprint(&r1, &columns), fingerprint(&r2, &columns));
    }

    #[test]
    fn null_differs_from_empty_string() {
        let columns = vec!["x".to_string()];
        let with_null = row(&[("x", Value::Null)]);
        let with_empty = row(&[("x", Value::Text(String::new()))]);
        assert_ne!(
            fingerprint(&with_null, &columns),
            fingerprint(&with_empty, &columns)
        );
    }

    #[test]
    fn value_change_changes_hash() {
        let columns = vec!["hp".to_string()];
        let a = row(&[("hp", Value::Integer(110))]);
        let b = row(&[("hp", Value::Integer(55))]);
        assert_ne!(fingerprint(&a, &columns), fingerprint(&b, &columns));
    }

    #[test]
    fn output_is_lowercase_hex() {
        let columns = vec!["hp".to_string()];
        let a = row(&[("hp", Value::Integer(110))]);
        let digest = fingerprint(&a, &columns);
        assert_eq!(digest.len(), 64);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }
}
