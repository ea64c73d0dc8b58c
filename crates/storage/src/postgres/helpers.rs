//! Shared helper functions for PostgreSQL row conversion.

use namesake_core::error::{StorageError, StorageResult};
use namesake_core::models::Blockchain;

/// Convert a `Vec<u8>` to a fixed-size byte array.
///
/// Returns an error if the length doesn't match.
pub fn bytes_to_array<const N: usize>(bytes: Vec<u8>, field_name: &str) -> StorageResult<[u8; N]> {
    bytes.try_into().map_err(|v: Vec<u8>| {
        StorageError::SerializationError(format!(
            "{} has invalid length: expected {}, got {}",
            field_name,
            N,
            v.len()
        ))
    })
}

/// Convert an optional `Vec<u8>` to an optional fixed-size array.
pub fn bytes_to_optional_array<const N: usize>(
    bytes: Option<Vec<u8>>,
    field_name: &str,
) -> StorageResult<Option<[u8; N]>> {
    bytes.map(|b| bytes_to_array(b, field_name)).transpose()
}

/// Parse a stored blockchain tag.
pub fn parse_blockchain(tag: &str, field_name: &str) -> StorageResult<Blockchain> {
    tag.parse()
        .map_err(|e: String| StorageError::SerializationError(format!("{}: {}", field_name, e)))
}

pub fn query_error(e: sqlx::Error) -> StorageError {
    StorageError::QueryError(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    // Test critique: erreurs incluent le nom du champ pour debug
    #[test]
    fn test_error_includes_field_name() {
        let bad_bytes = vec![1u8; 16]; // mauvaise longueur
        let result = bytes_to_array::<20>(bad_bytes, "resolution.owner_address");
        let err = result.unwrap_err().to_string();
        assert!(err.contains("resolution.owner_address"));
        assert!(err.contains("expected 20"));
    }

    #[test]
    fn test_optional_array() {
        assert_eq!(bytes_to_optional_array::<32>(None, "event.node").unwrap(), None);
        assert_eq!(
            bytes_to_optional_array::<2>(Some(vec![1, 2]), "x").unwrap(),
            Some([1, 2])
        );
        assert!(bytes_to_optional_array::<32>(Some(vec![0; 31]), "event.node").is_err());
    }

    #[test]
    fn test_parse_blockchain_tag() {
        assert_eq!(parse_blockchain("MATIC", "blockchain").unwrap(), Blockchain::Matic);
        let err = parse_blockchain("SOL", "domain_resolutions.blockchain").unwrap_err();
        assert!(err.to_string().contains("domain_resolutions.blockchain"));
    }
}
