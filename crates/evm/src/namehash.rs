//! EIP-137 namehash.

use alloy::primitives::keccak256;

use namesake_core::models::Node;

/// Namehash of a dotted name. The empty name hashes to zero.
pub fn eip137_namehash(name: &str) -> Node {
    let mut node = [0u8; 32];
    if name.is_empty() {
        return Node(node);
    }

    for label in name.rsplit('.') {
        let label_hash = keccak256(label.as_bytes());
        let mut buf = [0u8; 64];
        buf[..32].copy_from_slice(&node);
        buf[32..].copy_from_slice(label_hash.as_slice());
        node = keccak256(buf).0;
    }

    Node(node)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_name_is_zero() {
        assert_eq!(eip137_namehash(""), Node::ZERO);
    }

    // Test critique: vecteurs connus (EIP-137 et registre CNS)
    #[test]
    fn test_known_vectors() {
        assert_eq!(
            eip137_namehash("eth").to_hex(),
            "0x93cdeb708b7545dc668eb9280176169d1c33cfd8ed6f04690a0bcc88a93fc4ae"
        );
        assert_eq!(
            eip137_namehash("crypto").to_hex(),
            "0x0f4a10a4f46c288cea365fcf45cccf0e9d901b945b9829ccdb54c10dc3cb7a6f"
        );
        assert_eq!(
            eip137_namehash("brad.crypto").to_hex(),
            "0x756e4e998dbffd803c21d23b06cd855cdc7a4b57706c95964a37e24b47c10fc9"
        );
    }
}
