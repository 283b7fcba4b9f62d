use codec::{Decode, Encode};
use lattice_primitives::{NodeId, SchainHash};
use scale_info::TypeInfo;

/// One in-flight replacement of a node inside a schain. The record's
/// presence freezes the schain against a second concurrent exit.
#[derive(Encode, Decode, Clone, Eq, PartialEq, Debug, TypeInfo)]
pub struct Rotation<BlockNumber> {
	pub leaving_node: NodeId,
	/// Chosen replacement; `None` while selection has not happened or
	/// found no candidate.
	pub new_node: Option<NodeId>,
	pub freeze_until: BlockNumber,
	pub started_at: BlockNumber,
}

/// DKG handshake state of a schain's current group composition.
#[derive(Encode, Decode, Clone, Copy, Eq, PartialEq, Debug, TypeInfo)]
pub enum DkgStatus {
	NotStarted,
	/// A new group was formed and must produce a key before it is live.
	PendingRekey,
	Successful,
	Failed,
}

impl Default for DkgStatus {
	fn default() -> Self {
		DkgStatus::NotStarted
	}
}

#[derive(Encode, Decode, Clone, Eq, PartialEq, Debug, TypeInfo)]
pub struct LeavingEntry<BlockNumber> {
	pub schain_hash: SchainHash,
	pub finished_at: BlockNumber,
}
