//! Solidity bindings for the CNS registry and resolver.

use alloy::sol;

sol! {
    /// CNS registry: ERC-721 token per domain plus resolver bookkeeping.
    #[sol(rpc)]
    interface CnsRegistry {
        event Transfer(address indexed from, address indexed to, uint256 indexed tokenId);
        event Approval(address indexed owner, address indexed approved, uint256 indexed tokenId);
        event ApprovalForAll(address indexed owner, address indexed operator, bool approved);
        event NewURI(uint256 indexed tokenId, string uri);
        event Resolve(uint256 indexed tokenId, address indexed to);
        event Sync(address indexed resolver, uint256 indexed updateId, uint256 indexed tokenId);

        function resolverOf(uint256 tokenId) external view returns (address);
    }
}

sol! {
    /// CNS resolver: records keyed by the keccak hash of their key.
    #[sol(rpc)]
    interface CnsResolver {
        function getByHash(uint256 keyHash, uint256 tokenId) external view returns (string memory key, string memory value);
    }
}
