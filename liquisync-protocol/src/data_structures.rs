use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Identifier of an independent chain participating in the protocol.
pub type ChainId = u64;

// Represent a user account on some chain
#[derive(Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AccountId {
    pub chain_id: ChainId,
    pub address: String, // Using String for simplicity, could be a fixed-size type
}

/// Chain-agnostic token identifier. Liquidity for one token is pooled
/// virtually across every chain, so the token itself carries no chain id.
#[derive(Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TokenId(pub String);

impl TokenId {
    pub fn new(symbol: &str) -> Self {
        TokenId(symbol.to_string())
    }
}

impl fmt::Display for TokenId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Canonical unordered token pair identifying a virtual liquidity pool.
/// The constructor sorts, so (X, Y) and (Y, X) address the same pool.
#[derive(Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PairKey {
    a: TokenId,
    b: TokenId,
}

impl PairKey {
    pub fn new(x: TokenId, y: TokenId) -> Self {
        if x <= y {
            PairKey { a: x, b: y }
        } else {
            PairKey { a: y, b: x }
        }
    }

    pub fn first(&self) -> &TokenId {
        &self.a
    }

    pub fn second(&self) -> &TokenId {
        &self.b
    }

    /// The opposite side of the pair, if `token` is a member at all.
    pub fn other(&self, token: &TokenId) -> Option<&TokenId> {
        if token == &self.a {
            Some(&self.b)
        } else if token == &self.b {
            Some(&self.a)
        } else {
            None
        }
    }

    pub fn contains(&self, token: &TokenId) -> bool {
        token == &self.a || token == &self.b
    }
}

impl fmt::Display for PairKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.a, self.b)
    }
}

/// Key of one entry in the virtual balance ledger.
#[derive(Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BalanceKey {
    pub account: AccountId,
    pub token: TokenId,
}

/// Reserved per-chain account holding protocol custody: the escrow float that
/// funds destination payouts and absorbs settled source locks.
pub const VAULT_ADDRESS: &str = "vault";

impl BalanceKey {
    pub fn new(chain_id: ChainId, address: &str, token: TokenId) -> Self {
        BalanceKey {
            account: AccountId { chain_id, address: address.to_string() },
            token,
        }
    }

    /// The vault entry for a chain/token pair.
    pub fn vault(chain_id: ChainId, token: TokenId) -> Self {
        Self::new(chain_id, VAULT_ADDRESS, token)
    }
}

/// Globally unique identifier correlating every message of one swap.
#[derive(Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RequestId(pub [u8; 32]);

impl RequestId {
    /// Derive an id from the request fields, the depositor and a per-factory
    /// nonce, for callers that do not supply their own.
    pub fn derive(
        source_chain: ChainId,
        depositor: &str,
        source_token: &TokenId,
        amount_in: u128,
        dest_chain: ChainId,
        dest_token: &TokenId,
        recipient: &str,
        nonce: u64,
    ) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(b"liquisync-request-v1");
        hasher.update(source_chain.to_be_bytes());
        hasher.update(depositor.as_bytes());
        hasher.update(source_token.0.as_bytes());
        hasher.update(amount_in.to_be_bytes());
        hasher.update(dest_chain.to_be_bytes());
        hasher.update(dest_token.0.as_bytes());
        hasher.update(recipient.as_bytes());
        hasher.update(nonce.to_be_bytes());
        RequestId(hasher.finalize().into())
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RequestId({})", &hex::encode(self.0)[..8])
    }
}

/// Immutable swap request. Created once by the source chain factory and never
/// modified afterwards; every later message refers to it by `request_id`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapRequest {
    pub request_id: RequestId,
    pub source_chain: ChainId,
    pub source_token: TokenId,
    pub amount_in: u128,
    pub dest_chain: ChainId,
    pub dest_token: TokenId,
    pub min_amount_out: u128,
    pub recipient: AccountId,
}
