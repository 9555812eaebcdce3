// Wire protocol: packet variants, endpoint addressing, opaque-bytes codec
// and the transport-facing relayer interface.

use crate::crypto::Signature;
use crate::data_structures::{ChainId, RequestId, SwapRequest, TokenId};
use crate::error::SwapError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Logical addresses the relayer routes between. Chains only ever talk to the
/// router; the router is the only peer of the settlement layer.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, Serialize, Deserialize)]
pub enum Endpoint {
    Chain(ChainId),
    Settlement,
    Router,
}

/// Outcome payload carried by a settlement acknowledgment.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SwapOutcomePayload {
    Success { amount_out: u128, route: Vec<TokenId> },
    Failure { reason: SwapError },
}

/// Acknowledgment for exactly one swap request, signed by the settlement
/// layer over the domain-tagged digest of (request_id, outcome).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SwapAckPacket {
    pub request_id: RequestId,
    pub outcome: SwapOutcomePayload,
    pub signature: Signature,
}

/// Instruction to move escrowed custody to a recipient.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseInstruction {
    pub request_id: RequestId,
    pub chain: ChainId,
    pub token: TokenId,
    pub recipient: String,
    pub amount: u128,
}

/// Instruction to return a locked amount to its original depositor.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundInstruction {
    pub request_id: RequestId,
    pub chain: ChainId,
    pub token: TokenId,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EscrowOp {
    Release,
    Refund,
}

/// What happened when a chain applied an escrow instruction. A replay
/// against a terminal lock reports `AlreadyTerminal`, which the router
/// treats the same as `Applied`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReceiptStatus {
    Applied,
    AlreadyTerminal,
    Failed(SwapError),
}

/// Chain -> router confirmation of an escrow transition.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscrowReceipt {
    pub request_id: RequestId,
    pub chain: ChainId,
    pub op: EscrowOp,
    pub status: ReceiptStatus,
}

/// Every message kind exchanged between endpoints. Closed by design:
/// receivers match exhaustively and log anything addressed to the wrong
/// endpoint.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Packet {
    SwapRequest(SwapRequest),
    SwapAck(SwapAckPacket),
    Release(ReleaseInstruction),
    Refund(RefundInstruction),
    Receipt(EscrowReceipt),
}

impl Packet {
    pub fn request_id(&self) -> RequestId {
        match self {
            Packet::SwapRequest(req) => req.request_id,
            Packet::SwapAck(ack) => ack.request_id,
            Packet::Release(rel) => rel.request_id,
            Packet::Refund(refund) => refund.request_id,
            Packet::Receipt(receipt) => receipt.request_id,
        }
    }

    /// Opaque bytes for the transport.
    pub fn encode(&self) -> Result<Vec<u8>, SwapError> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| SwapError::TransportFailure(e.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> Result<Packet, SwapError> {
        bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map(|(packet, _)| packet)
            .map_err(|e| SwapError::TransportFailure(e.to_string()))
    }
}

/// One routed message. The transport treats the packet as opaque bytes; the
/// typed form exists so in-process endpoints skip a decode.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NetworkMessage {
    pub sender: Endpoint,
    pub receiver: Endpoint,
    pub packet: Packet,
}

/// Bytes the settlement layer signs for an acknowledgment. Domain-tagged so
/// an ack signature can never be replayed as anything else.
pub fn ack_digest(request_id: &RequestId, outcome: &SwapOutcomePayload) -> Vec<u8> {
    let mut message = Vec::with_capacity(64);
    message.extend_from_slice(b"liquisync-ack-v1");
    message.extend_from_slice(&request_id.0);
    let encoded = bincode::serde::encode_to_vec(outcome, bincode::config::standard())
        .expect("outcome payloads always encode");
    message.extend_from_slice(&encoded);
    message
}

/// Transport collaborator. The only promises made by implementations are
/// at-least-once delivery (messages may be duplicated, delayed or
/// reordered) and an error on immediate transport-level failure.
#[async_trait]
pub trait RelayerInterface: Send + Sync {
    async fn send(&self, msg: NetworkMessage) -> Result<(), SwapError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{keypair_from_seed, sign, verify};
    use crate::data_structures::AccountId;

    fn sample_request() -> SwapRequest {
        let source_token = TokenId::new("X");
        let dest_token = TokenId::new("Z");
        SwapRequest {
            request_id: RequestId::derive(1, "alice", &source_token, 10_000, 2, &dest_token, "bob", 0),
            source_chain: 1,
            source_token,
            amount_in: 10_000,
            dest_chain: 2,
            dest_token,
            min_amount_out: 9_000,
            recipient: AccountId { chain_id: 2, address: "bob".to_string() },
        }
    }

    #[test]
    fn packet_codec_round_trip() {
        let packet = Packet::SwapRequest(sample_request());
        let bytes = packet.encode().unwrap();
        assert_eq!(Packet::decode(&bytes).unwrap(), packet);
        assert!(Packet::decode(&bytes[..bytes.len() - 1]).is_err());
    }

    #[test]
    fn ack_digest_binds_request_and_outcome() {
        let id = sample_request().request_id;
        let success = SwapOutcomePayload::Success { amount_out: 9_745, route: vec![TokenId::new("X")] };
        let failure = SwapOutcomePayload::Failure { reason: SwapError::InvalidAmount };
        assert_ne!(ack_digest(&id, &success), ack_digest(&id, &failure));

        let key = keypair_from_seed(1);
        let sig = sign(&ack_digest(&id, &success), &key);
        assert!(verify(&ack_digest(&id, &success), &sig, &key.verifying_key()));
        assert!(!verify(&ack_digest(&id, &failure), &sig, &key.verifying_key()));
    }

    #[test]
    fn packet_request_id_accessor_covers_variants() {
        let req = sample_request();
        let id = req.request_id;
        let packets = vec![
            Packet::SwapRequest(req),
            Packet::Refund(RefundInstruction { request_id: id, chain: 1, token: TokenId::new("X") }),
            Packet::Receipt(EscrowReceipt {
                request_id: id,
                chain: 1,
                op: EscrowOp::Refund,
                status: ReceiptStatus::Applied,
            }),
        ];
        for packet in packets {
            assert_eq!(packet.request_id(), id);
        }
    }
}
