#![cfg_attr(not(feature = "std"), no_std)]

pub use pallet::*;

#[cfg(test)]
mod mock;


#[frame_support::pallet]
pub mod pallet {
	use frame_support::pallet_prelude::*;
	use frame_system::{ensure_root, ensure_signed, ensure_signed_or_root, pallet_prelude::*};
	use lattice_primitives::{BountyPayout, NodeId, SchainHash};
	use pallet_nodes::{NodePublicKey, NodeStatus};
	use sp_std::prelude::*;

	#[pallet::pallet]
	#[pallet::without_storage_info]
	pub struct Pallet<T>(_);

	#[pallet::config]
	pub trait Config: frame_system::Config + pallet_rotation::Config {
		type RuntimeEvent: From<Event<Self>> + IsType<<Self as frame_system::Config>::RuntimeEvent>;

		/// Token collaborator notified of reward claims.
		type Payout: BountyPayout;
	}

	#[pallet::event]
	#[pallet::generate_deposit(pub(super) fn deposit_event)]
	pub enum Event<T: Config> {
		NodeCreated { node_id: NodeId, owner: T::AccountId },
		/// One `node_exit` call was processed; `completed` tells whether the
		/// node reached the Left state.
		NodeExitProcessed { node_id: NodeId, completed: bool },
		BountyIssued { node_id: NodeId, eligible: bool },
		VacanciesFilled { schain_hash: SchainHash, filled: u32 },
	}

	#[pallet::error]
	pub enum Error<T> {
		NodeNotFound,
		NotNodeOwner,
		NodeAlreadyLeft,
		/// A node in maintenance cannot start or continue an exit.
		NodeInMaintenance,
		/// The rotation delay of the leaving node has not elapsed yet.
		LeavingPeriodNotExpired,
		SchainNotFound,
		NotSchainOwner,
		/// The node's reward period has not elapsed.
		RewardNotDue,
		/// The schain has no recorded vacancy.
		NoVacancy,
		/// No eligible node could be seated into the vacancy.
		NoReplacementAvailable,
	}

	#[pallet::call]
	impl<T: Config> Pallet<T> {
		/// Register a node for the calling owner. The authorization gate is
		/// consulted first; the registry performs the uniqueness checks.
		#[pallet::call_index(0)]
		#[pallet::weight(Weight::from_parts(10_000, 0) + T::DbWeight::get().reads_writes(8, 8))]
		pub fn create_node(
			origin: OriginFor<T>,
			port: u16,
			ip: [u8; 4],
			public_ip: [u8; 4],
			public_key: NodePublicKey,
			name: Vec<u8>,
			domain_name: Vec<u8>,
		) -> DispatchResult {
			let who = ensure_signed(origin)?;

			let validator_id = pallet_nodes::Pallet::<T>::can_create_node(&who)?;
			let node_id = pallet_nodes::Pallet::<T>::do_register_node(
				who.clone(),
				validator_id,
				ip,
				public_ip,
				port,
				public_key,
				name,
				domain_name,
			)?;

			Self::deposit_event(Event::NodeCreated { node_id, owner: who });
			Ok(())
		}

		/// Start a node's exit: freeze every schain it serves and move it to
		/// Leaving.
		#[pallet::call_index(1)]
		#[pallet::weight(Weight::from_parts(10_000, 0) + T::DbWeight::get().reads_writes(6, 6))]
		pub fn init_exit(origin: OriginFor<T>, node_id: NodeId) -> DispatchResult {
			Self::ensure_node_owner_or_root(origin, node_id)?;

			let node = pallet_nodes::Pallet::<T>::node(node_id).ok_or(Error::<T>::NodeNotFound)?;
			ensure!(node.status == NodeStatus::Active, pallet_nodes::Error::<T>::NodeNotActive);

			pallet_rotation::Pallet::<T>::freeze_schains(node_id)?;
			pallet_nodes::Pallet::<T>::do_init_exit(node_id)?;
			Ok(())
		}

		/// Drive a leaving node's exit: rotate it out of every schain it
		/// still serves, then complete the exit once the delay has elapsed.
		#[pallet::call_index(2)]
		#[pallet::weight(Weight::from_parts(10_000, 0) + T::DbWeight::get().reads_writes(12, 12))]
		pub fn node_exit(origin: OriginFor<T>, node_id: NodeId) -> DispatchResult {
			Self::ensure_node_owner_or_root(origin, node_id)?;

			let node = pallet_nodes::Pallet::<T>::node(node_id).ok_or(Error::<T>::NodeNotFound)?;
			match node.status {
				NodeStatus::Active => {
					pallet_rotation::Pallet::<T>::freeze_schains(node_id)?;
					pallet_nodes::Pallet::<T>::do_init_exit(node_id)?;
				}
				NodeStatus::Leaving => {}
				NodeStatus::Left => return Err(Error::<T>::NodeAlreadyLeft.into()),
				NodeStatus::InMaintenance => return Err(Error::<T>::NodeInMaintenance.into()),
			}

			let mut rotated = false;
			for schain_hash in pallet_schains::Pallet::<T>::schain_hashes_for_node(node_id) {
				pallet_rotation::Pallet::<T>::rotate_node(node_id, schain_hash)?;
				rotated = true;
			}

			if pallet_schains::Pallet::<T>::schain_hashes_for_node(node_id).is_empty() {
				if pallet_rotation::Pallet::<T>::exit_delay_elapsed(node_id) {
					pallet_nodes::Pallet::<T>::do_complete_exit(node_id)?;
					pallet_rotation::Pallet::<T>::note_exit_completed(node_id);
					Self::deposit_event(Event::NodeExitProcessed { node_id, completed: true });
					return Ok(());
				}
				// Refuse a call that would do nothing at all.
				ensure!(rotated, Error::<T>::LeavingPeriodNotExpired);
			}

			Self::deposit_event(Event::NodeExitProcessed { node_id, completed: false });
			Ok(())
		}

		/// Create an schain: allocate its group and open the DKG channel for
		/// the new composition.
		#[pallet::call_index(3)]
		#[pallet::weight(Weight::from_parts(10_000, 0) + T::DbWeight::get().reads_writes(20, 20))]
		pub fn create_schain(
			origin: OriginFor<T>,
			name: Vec<u8>,
			type_id: u8,
			lifetime: BlockNumberFor<T>,
			deposit: u128,
		) -> DispatchResult {
			let who = ensure_signed(origin)?;

			let schain_hash =
				pallet_schains::Pallet::<T>::do_create_schain(who, name, type_id, lifetime, deposit)?;
			pallet_rotation::Pallet::<T>::open_channel(schain_hash);
			Ok(())
		}

		/// Delete an schain. Only its owner may do so before the lifetime
		/// runs out; an expired schain can be reaped by anyone.
		#[pallet::call_index(4)]
		#[pallet::weight(Weight::from_parts(10_000, 0) + T::DbWeight::get().reads_writes(20, 20))]
		pub fn delete_schain(origin: OriginFor<T>, name: Vec<u8>) -> DispatchResult {
			let who = ensure_signed(origin)?;

			let schain_hash = pallet_schains::Pallet::<T>::schain_hash_of(&name);
			let schain =
				pallet_schains::Pallet::<T>::schain(schain_hash).ok_or(Error::<T>::SchainNotFound)?;
			ensure!(
				schain.owner == who || pallet_schains::Pallet::<T>::is_expired(&schain),
				Error::<T>::NotSchainOwner
			);

			pallet_rotation::Pallet::<T>::clear_schain_state(schain_hash);
			pallet_schains::Pallet::<T>::do_delete_schain(schain_hash)?;
			Ok(())
		}

		#[pallet::call_index(5)]
		#[pallet::weight(Weight::from_parts(10_000, 0) + T::DbWeight::get().reads_writes(20, 20))]
		pub fn delete_schain_by_root(origin: OriginFor<T>, name: Vec<u8>) -> DispatchResult {
			ensure_root(origin)?;

			let schain_hash = pallet_schains::Pallet::<T>::schain_hash_of(&name);
			ensure!(
				pallet_schains::Pallet::<T>::is_schain_in_system(&schain_hash),
				Error::<T>::SchainNotFound
			);

			pallet_rotation::Pallet::<T>::clear_schain_state(schain_hash);
			pallet_schains::Pallet::<T>::do_delete_schain(schain_hash)?;
			Ok(())
		}

		/// Claim the periodic reward for a node. The gate decides
		/// eligibility; the token collaborator decides amounts.
		#[pallet::call_index(6)]
		#[pallet::weight(Weight::from_parts(10_000, 0) + T::DbWeight::get().reads_writes(3, 2))]
		pub fn get_bounty(origin: OriginFor<T>, node_id: NodeId) -> DispatchResult {
			let who = ensure_signed(origin)?;

			let node = pallet_nodes::Pallet::<T>::node(node_id).ok_or(Error::<T>::NodeNotFound)?;
			ensure!(node.owner == who, Error::<T>::NotNodeOwner);
			ensure!(node.status != NodeStatus::Left, Error::<T>::NodeAlreadyLeft);
			ensure!(
				pallet_nodes::Pallet::<T>::reward_period_elapsed(&node),
				Error::<T>::RewardNotDue
			);

			let eligible = !pallet_nodes::Pallet::<T>::is_incompliant(node_id);
			pallet_nodes::Pallet::<T>::note_reward(node_id);
			T::Payout::payout(node_id, eligible);

			Self::deposit_event(Event::BountyIssued { node_id, eligible });
			Ok(())
		}

		/// Retry replacement selection for a group running below its
		/// required size. Open to anyone; capacity may have appeared since
		/// the shortfall was recorded.
		#[pallet::call_index(7)]
		#[pallet::weight(Weight::from_parts(10_000, 0) + T::DbWeight::get().reads_writes(10, 10))]
		pub fn fill_vacancies(origin: OriginFor<T>, name: Vec<u8>) -> DispatchResult {
			ensure_signed(origin)?;

			let schain_hash = pallet_schains::Pallet::<T>::schain_hash_of(&name);
			ensure!(
				pallet_schains::Pallet::<T>::is_schain_in_system(&schain_hash),
				Error::<T>::SchainNotFound
			);
			let seats = pallet_schains::Pallet::<T>::vacant_seats(schain_hash);
			ensure!(seats > 0, Error::<T>::NoVacancy);

			let mut filled: u32 = 0;
			for _ in 0..seats {
				match pallet_rotation::Pallet::<T>::fill_vacancy(schain_hash) {
					Ok(_) => filled = filled.saturating_add(1),
					Err(_) => break,
				}
			}
			ensure!(filled > 0, Error::<T>::NoReplacementAvailable);

			Self::deposit_event(Event::VacanciesFilled { schain_hash, filled });
			Ok(())
		}
	}

	impl<T: Config> Pallet<T> {
		fn ensure_node_owner_or_root(origin: OriginFor<T>, node_id: NodeId) -> DispatchResult {
			if let Some(who) = ensure_signed_or_root(origin)? {
				let node =
					pallet_nodes::Pallet::<T>::node(node_id).ok_or(Error::<T>::NodeNotFound)?;
				ensure!(node.owner == who, Error::<T>::NotNodeOwner);
			}
			Ok(())
		}
	}
}
