use codec::{Decode, Encode};
use lattice_primitives::{Space, ValidatorId};
use scale_info::TypeInfo;
use sp_std::prelude::*;

/// Lifecycle of a registered node.
///
/// The only transitions are Active -> Leaving -> Left and
/// Active <-> InMaintenance. A node never moves backwards along the exit
/// path and is never deleted; Left rows stay in the table for audit.
#[derive(Encode, Decode, Clone, Copy, Eq, PartialEq, Debug, TypeInfo)]
pub enum NodeStatus {
	Active,
	Leaving,
	Left,
	InMaintenance,
}

/// Uncompressed secp256k1 public key, stored as its two coordinates.
#[derive(Encode, Decode, Clone, Eq, PartialEq, Debug, TypeInfo)]
pub struct NodePublicKey {
	pub x: [u8; 32],
	pub y: [u8; 32],
}

#[derive(Encode, Decode, Clone, Eq, PartialEq, Debug, TypeInfo)]
pub struct Node<AccountId, BlockNumber> {
	pub name: Vec<u8>,
	pub ip: [u8; 4],
	pub public_ip: [u8; 4],
	pub port: u16,
	pub public_key: NodePublicKey,
	pub domain_name: Vec<u8>,
	pub owner: AccountId,
	pub validator_id: ValidatorId,
	pub status: NodeStatus,
	pub registered_at: BlockNumber,
	pub last_reward_at: BlockNumber,
	pub capacity: Space,
}
