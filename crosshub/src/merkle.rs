// Copyright (c) Crosshub Contributors
// SPDX-License-Identifier: Apache-2.0

//! Keccak-256 merkle commitments over settlement leaves.
//!
//! Leaf digests are the keccak hash of the leaf struct's canonical ABI
//! tuple encoding. Interior nodes hash the sorted concatenation of
//! their children and an odd node is carried up unchanged; both must
//! match the on-chain verifier's sorted-pair proof convention exactly.
//! Leaf array invariants are re-checked before hashing.

use ethers::abi::{encode, Token};
use ethers::types::{H256, U256};
use ethers::utils::keccak256;
use thiserror::Error;

use crosshub_types::settlement::{PoolRebalanceLeaf, RelayerRefundLeaf};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MerkleError {
    #[error("cannot build a merkle tree with no leaves")]
    NoLeaves,

    #[error("leaf index {index} out of range for {leaves} leaves")]
    LeafIndexOutOfRange { index: usize, leaves: usize },

    #[error("pool rebalance leaf {leaf_id} has misaligned arrays")]
    MisalignedLeaf { leaf_id: u32 },

    #[error("relayer refund leaf {leaf_id} has misaligned arrays")]
    MisalignedRefundLeaf { leaf_id: u32 },
}

/// Bottom-up merkle tree with all intermediate layers retained for
/// proof generation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MerkleTree {
    layers: Vec<Vec<H256>>,
}

impl MerkleTree {
    pub fn new(leaves: Vec<H256>) -> Result<Self, MerkleError> {
        if leaves.is_empty() {
            return Err(MerkleError::NoLeaves);
        }
        let mut layers = vec![leaves];
        while layers.last().map_or(0, Vec::len) > 1 {
            let previous = layers.last().map(Vec::as_slice).unwrap_or_default();
            let mut next = Vec::with_capacity((previous.len() + 1) / 2);
            for pair in previous.chunks(2) {
                match pair {
                    [left, right] => next.push(combined_hash(left, right)),
                    [odd] => next.push(*odd),
                    _ => unreachable!("chunks(2) yields one or two nodes"),
                }
            }
            layers.push(next);
        }
        Ok(Self { layers })
    }

    pub fn root(&self) -> H256 {
        // Construction guarantees a non-empty final layer.
        self.layers[self.layers.len() - 1][0]
    }

    pub fn leaf_count(&self) -> usize {
        self.layers[0].len()
    }

    /// Sibling path for the leaf at `index`, bottom-up. Levels where
    /// the node was carried up without a sibling contribute nothing.
    pub fn proof(&self, index: usize) -> Result<Vec<H256>, MerkleError> {
        let leaves = self.leaf_count();
        if index >= leaves {
            return Err(MerkleError::LeafIndexOutOfRange { index, leaves });
        }
        let mut proof = Vec::new();
        let mut position = index;
        for layer in &self.layers[..self.layers.len() - 1] {
            let sibling = position ^ 1;
            if sibling < layer.len() {
                proof.push(layer[sibling]);
            }
            position /= 2;
        }
        Ok(proof)
    }

    pub fn verify(root: &H256, leaf: &H256, proof: &[H256]) -> bool {
        let computed = proof
            .iter()
            .fold(*leaf, |node, sibling| combined_hash(&node, sibling));
        computed == *root
    }
}

/// Sorted-pair keccak: `hash(min(a,b) || max(a,b))`.
pub fn combined_hash(a: &H256, b: &H256) -> H256 {
    let (low, high) = if a <= b { (a, b) } else { (b, a) };
    let mut bytes = [0u8; 64];
    bytes[..32].copy_from_slice(low.as_bytes());
    bytes[32..].copy_from_slice(high.as_bytes());
    H256::from(keccak256(bytes))
}

/// Digest of one pool-rebalance leaf: keccak over the ABI encoding of
/// `(uint256 chainId, uint256[] bundleLpFees, int256[] netSendAmounts,
/// int256[] runningBalances, uint8 groupIndex, uint32 leafId,
/// address[] l1Tokens)`.
pub fn hash_pool_rebalance_leaf(leaf: &PoolRebalanceLeaf) -> Result<H256, MerkleError> {
    if !leaf.arrays_aligned() {
        return Err(MerkleError::MisalignedLeaf {
            leaf_id: leaf.leaf_id,
        });
    }
    let tuple = Token::Tuple(vec![
        Token::Uint(U256::from(leaf.chain_id)),
        Token::Array(leaf.bundle_lp_fees.iter().map(|v| Token::Uint(*v)).collect()),
        Token::Array(
            leaf.net_send_amounts
                .iter()
                .map(|v| Token::Int(v.into_raw()))
                .collect(),
        ),
        Token::Array(
            leaf.running_balances
                .iter()
                .map(|v| Token::Int(v.into_raw()))
                .collect(),
        ),
        Token::Uint(U256::from(leaf.group_index)),
        Token::Uint(U256::from(leaf.leaf_id)),
        Token::Array(leaf.l1_tokens.iter().map(|a| Token::Address(*a)).collect()),
    ]);
    Ok(H256::from(keccak256(encode(&[tuple]))))
}

/// Digest of one relayer-refund leaf: keccak over the ABI encoding of
/// `(uint256 amountToReturn, uint256 chainId, uint256[] refundAmounts,
/// uint32 leafId, address l2TokenAddress, address[] refundAddresses)`.
pub fn hash_relayer_refund_leaf(leaf: &RelayerRefundLeaf) -> Result<H256, MerkleError> {
    if !leaf.arrays_aligned() {
        return Err(MerkleError::MisalignedRefundLeaf {
            leaf_id: leaf.leaf_id,
        });
    }
    let tuple = Token::Tuple(vec![
        Token::Uint(leaf.amount_to_return),
        Token::Uint(U256::from(leaf.chain_id)),
        Token::Array(leaf.refund_amounts.iter().map(|v| Token::Uint(*v)).collect()),
        Token::Uint(U256::from(leaf.leaf_id)),
        Token::Address(leaf.l2_token_address),
        Token::Array(
            leaf.refund_addresses
                .iter()
                .map(|a| Token::Address(*a))
                .collect(),
        ),
    ]);
    Ok(H256::from(keccak256(encode(&[tuple]))))
}

pub fn build_pool_rebalance_tree(leaves: &[PoolRebalanceLeaf]) -> Result<MerkleTree, MerkleError> {
    let digests = leaves
        .iter()
        .map(hash_pool_rebalance_leaf)
        .collect::<Result<Vec<_>, _>>()?;
    MerkleTree::new(digests)
}

pub fn build_relayer_refund_tree(leaves: &[RelayerRefundLeaf]) -> Result<MerkleTree, MerkleError> {
    let digests = leaves
        .iter()
        .map(hash_relayer_refund_leaf)
        .collect::<Result<Vec<_>, _>>()?;
    MerkleTree::new(digests)
}
