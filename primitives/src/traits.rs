use crate::{NodeId, ValidatorId};

/// Read-side interface of the staking/validator collaborator.
///
/// All checks against this interface happen at call time; nothing derived
/// from it is cached by the registry.
pub trait ValidatorRegistry<AccountId> {
	/// The validator a node-owner address is linked to, if any.
	fn validator_id(who: &AccountId) -> Option<ValidatorId>;

	/// Whether the validator is enabled on the staking side.
	fn is_authorized(validator: ValidatorId) -> bool;

	/// The validator's effective bonded amount for the current epoch.
	fn bond_amount(validator: ValidatorId) -> u128;
}

impl<AccountId> ValidatorRegistry<AccountId> for () {
	fn validator_id(_who: &AccountId) -> Option<ValidatorId> {
		None
	}

	fn is_authorized(_validator: ValidatorId) -> bool {
		false
	}

	fn bond_amount(_validator: ValidatorId) -> u128 {
		0
	}
}

/// Sink for reward claims. The token collaborator decides amounts; the
/// runtime core only reports which node claims and whether the
/// authorization gate found it eligible.
pub trait BountyPayout {
	fn payout(node: NodeId, eligible: bool);
}

impl BountyPayout for () {
	fn payout(_node: NodeId, _eligible: bool) {}
}

/// Veto hook consulted during replacement selection, letting the rotation
/// coordinator keep a node that just destabilized a group from being
/// re-picked before its delay has elapsed.
pub trait ReplacementVeto {
	fn is_vetoed(node: NodeId) -> bool;
}

impl ReplacementVeto for () {
	fn is_vetoed(_node: NodeId) -> bool {
		false
	}
}
