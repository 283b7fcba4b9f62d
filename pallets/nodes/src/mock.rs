use crate as pallet_nodes;
use frame_support::{
	derive_impl,
	traits::{ConstU16, ConstU32, ConstU64, ConstU8, Everything},
};
use lattice_primitives::{ValidatorId, ValidatorRegistry};
use sp_core::H256;
use sp_runtime::{
	traits::{BlakeTwo256, IdentityLookup},
	BuildStorage,
};

type Block = frame_system::mocking::MockBlock<Test>;
type AccountId = u64;

// Configure a mock runtime to test the pallet.
frame_support::construct_runtime!(
	pub enum Test {
		System: frame_system,
		Nodes: pallet_nodes,
	}
);

#[derive_impl(frame_system::config_preludes::TestDefaultConfig)]
impl frame_system::Config for Test {
	type BaseCallFilter = Everything;
	type BlockWeights = ();
	type BlockLength = ();
	type DbWeight = ();
	type RuntimeOrigin = RuntimeOrigin;
	type RuntimeCall = RuntimeCall;
	type Block = Block;
	type Hash = H256;
	type Hashing = BlakeTwo256;
	type AccountId = AccountId;
	type Lookup = IdentityLookup<Self::AccountId>;
	type RuntimeEvent = RuntimeEvent;
	type BlockHashCount = ConstU64<250>;
	type Version = ();
	type PalletInfo = PalletInfo;
	type AccountData = ();
	type OnNewAccount = ();
	type OnKilledAccount = ();
	type SystemWeightInfo = ();
	type SS58Prefix = ConstU16<42>;
	type OnSetCode = ();
	type MaxConsumers = ConstU32<16>;
	type Nonce = u64;
}

/// Static staking collaborator: every account below 900 is linked to the
/// validator with the same number. Validator 66 is disabled, validator 7
/// has bond for exactly one node.
pub struct StaticValidators;

impl ValidatorRegistry<AccountId> for StaticValidators {
	fn validator_id(who: &AccountId) -> Option<ValidatorId> {
		if *who >= 900 {
			None
		} else {
			Some(*who as ValidatorId)
		}
	}

	fn is_authorized(validator: ValidatorId) -> bool {
		validator != 66
	}

	fn bond_amount(validator: ValidatorId) -> u128 {
		if validator == 7 {
			150
		} else {
			1_000_000
		}
	}
}

impl pallet_nodes::Config for Test {
	type RuntimeEvent = RuntimeEvent;
	type Validators = StaticValidators;
	type MinimumStakeRequirement = frame_support::traits::ConstU128<100>;
	type NodeCapacity = ConstU8<128>;
	type RewardPeriod = ConstU64<50>;
}

// Build genesis storage according to the mock runtime.
pub fn new_test_ext() -> sp_io::TestExternalities {
	let t = frame_system::GenesisConfig::<Test>::default().build_storage().unwrap();

	let mut ext = sp_io::TestExternalities::new(t);
	ext.execute_with(|| {
		System::set_block_number(1);
	});
	ext
}
