use codec::{Decode, Encode};
use lattice_primitives::Space;
use scale_info::TypeInfo;
use sp_std::prelude::*;

#[derive(Encode, Decode, Clone, Eq, PartialEq, Debug, TypeInfo)]
pub struct Schain<AccountId, BlockNumber> {
	pub name: Vec<u8>,
	pub owner: AccountId,
	pub type_id: u8,
	/// Space every member node dedicates to this schain.
	pub part_of_node: Space,
	pub lifetime: BlockNumber,
	pub start_block: BlockNumber,
	/// Deposit forwarded by the token collaborator; recorded verbatim.
	pub deposit: u128,
	/// Bumped every time the group composition changes.
	pub generation: u32,
}

/// Shape of one schain type: how much of each node it consumes and how many
/// nodes its group needs.
#[derive(Encode, Decode, Clone, Copy, Eq, PartialEq, Debug, TypeInfo)]
pub struct SchainTypeDescription {
	pub part_of_node: Space,
	pub number_of_nodes: u32,
}
