#![cfg_attr(not(feature = "std"), no_std)]

pub use pallet::*;
pub use types::*;

#[cfg(test)]
mod mock;


mod types;

#[frame_support::pallet]
pub mod pallet {
	use super::*;
	use frame_support::pallet_prelude::*;
	use frame_system::{ensure_root, pallet_prelude::*};
	use lattice_primitives::{NodeId, ReplacementVeto, SchainHash};
	use sp_std::prelude::*;

	#[pallet::pallet]
	#[pallet::without_storage_info]
	pub struct Pallet<T>(_);

	#[pallet::config]
	pub trait Config: frame_system::Config + pallet_schains::Config {
		type RuntimeEvent: From<Event<Self>> + IsType<<Self as frame_system::Config>::RuntimeEvent>;

		/// Blocks a leaving node stays frozen before its exit can complete,
		/// and for which a rotated-out node is kept off new groups.
		#[pallet::constant]
		type RotationDelay: Get<BlockNumberFor<Self>>;

		/// Blocks the DKG collaborator has to report a result before the
		/// round counts as failed.
		#[pallet::constant]
		type ComplaintTimeLimit: Get<BlockNumberFor<Self>>;

		/// Failed DKG rounds a group composition may retry before the
		/// coordinator picks a fresh replacement.
		#[pallet::constant]
		type DkgRetriesBeforeReselection: Get<u32>;
	}

	#[pallet::storage]
	#[pallet::getter(fn rotation)]
	pub type Rotations<T: Config> =
		StorageMap<_, Blake2_128Concat, SchainHash, Rotation<BlockNumberFor<T>>, OptionQuery>;

	#[pallet::storage]
	#[pallet::getter(fn dkg_status)]
	pub type DkgStatusOf<T: Config> =
		StorageMap<_, Blake2_128Concat, SchainHash, DkgStatus, ValueQuery>;

	/// Block by which the pending DKG round must have reported.
	#[pallet::storage]
	#[pallet::getter(fn dkg_deadline)]
	pub type DkgDeadline<T: Config> =
		StorageMap<_, Blake2_128Concat, SchainHash, BlockNumberFor<T>, OptionQuery>;

	#[pallet::storage]
	#[pallet::getter(fn failed_dkg_attempts)]
	pub type FailedDkgAttempts<T: Config> =
		StorageMap<_, Blake2_128Concat, SchainHash, u32, ValueQuery>;

	/// Finished rotations per node, newest last.
	#[pallet::storage]
	#[pallet::getter(fn leaving_history)]
	pub type LeavingHistory<T: Config> =
		StorageMap<_, Blake2_128Concat, NodeId, Vec<LeavingEntry<BlockNumberFor<T>>>, ValueQuery>;

	/// When a node last left a group; selection vetoes it until the
	/// rotation delay has elapsed.
	#[pallet::storage]
	#[pallet::getter(fn last_rotated_out_at)]
	pub type LastRotatedOutAt<T: Config> =
		StorageMap<_, Blake2_128Concat, NodeId, BlockNumberFor<T>, OptionQuery>;

	/// Earliest block at which a leaving node may complete its exit.
	#[pallet::storage]
	#[pallet::getter(fn exit_allowed_after)]
	pub type ExitAllowedAfter<T: Config> =
		StorageMap<_, Blake2_128Concat, NodeId, BlockNumberFor<T>, OptionQuery>;

	#[pallet::event]
	#[pallet::generate_deposit(pub(super) fn deposit_event)]
	pub enum Event<T: Config> {
		/// A leaving node froze the schain; replacement is pending.
		RotationStarted { schain_hash: SchainHash, leaving_node: NodeId },
		ReplacementSelected { schain_hash: SchainHash, leaving_node: NodeId, new_node: NodeId },
		/// No eligible replacement; the group keeps running one seat short.
		ReplacementUnavailable { schain_hash: SchainHash, leaving_node: NodeId },
		/// The new group composition must now produce a key.
		DkgChannelOpened { schain_hash: SchainHash },
		DkgSucceeded { schain_hash: SchainHash },
		DkgFailed { schain_hash: SchainHash, attempts: u32 },
		/// Same group, next round.
		DkgRestarted { schain_hash: SchainHash, attempt: u32 },
		RotationFinalized { schain_hash: SchainHash, leaving_node: NodeId },
	}

	#[pallet::error]
	pub enum Error<T> {
		SchainNotFound,
		/// Another node is already rotating out of this schain.
		RotationInProgress,
		/// The schain's current group has not completed its DKG.
		DkgNotCompleted,
		/// No rotation record exists for this node and schain.
		NoActiveRotation,
		/// No DKG round is pending for this schain.
		NoPendingDkg,
		/// The schain has no recorded vacancy to fill.
		NoVacancy,
	}

	#[pallet::call]
	impl<T: Config> Pallet<T> {
		/// Inbound completion signal from the DKG collaborator.
		#[pallet::call_index(0)]
		#[pallet::weight(Weight::from_parts(10_000, 0) + T::DbWeight::get().reads_writes(4, 4))]
		pub fn report_dkg_result(
			origin: OriginFor<T>,
			schain_hash: SchainHash,
			success: bool,
		) -> DispatchResult {
			ensure_root(origin)?;
			ensure!(
				pallet_schains::Pallet::<T>::is_schain_in_system(&schain_hash),
				Error::<T>::SchainNotFound
			);
			ensure!(
				DkgStatusOf::<T>::get(schain_hash) == DkgStatus::PendingRekey,
				Error::<T>::NoPendingDkg
			);

			if success {
				Self::on_dkg_success(schain_hash);
			} else {
				Self::on_dkg_failure(schain_hash)?;
			}
			Ok(())
		}
	}

	impl<T: Config> Pallet<T> {
		/// Freeze every schain the leaving node is assigned to. Fails if any
		/// of them is already rotating another member or mid-rekey.
		pub fn freeze_schains(leaving_node: NodeId) -> DispatchResult {
			for schain_hash in pallet_schains::Pallet::<T>::schain_hashes_for_node(leaving_node) {
				Self::freeze_single(schain_hash, leaving_node)?;
			}
			Ok(())
		}

		fn freeze_single(schain_hash: SchainHash, leaving_node: NodeId) -> DispatchResult {
			Self::absorb_dkg_timeout(schain_hash)?;

			if let Some(rotation) = Rotations::<T>::get(schain_hash) {
				ensure!(rotation.leaving_node == leaving_node, Error::<T>::RotationInProgress);
				return Ok(());
			}
			ensure!(
				DkgStatusOf::<T>::get(schain_hash) == DkgStatus::Successful,
				Error::<T>::DkgNotCompleted
			);

			let now = frame_system::Pallet::<T>::block_number();
			let freeze_until = now + T::RotationDelay::get();
			Rotations::<T>::insert(
				schain_hash,
				Rotation { leaving_node, new_node: None, freeze_until, started_at: now },
			);
			ExitAllowedAfter::<T>::mutate(leaving_node, |after| {
				*after = Some(match *after {
					Some(existing) if existing > freeze_until => existing,
					_ => freeze_until,
				});
			});

			Self::deposit_event(Event::RotationStarted { schain_hash, leaving_node });
			Ok(())
		}

		/// One rotation step for one schain: unassign the leaver and try to
		/// seat a replacement. Succeeds with a recorded shortfall when no
		/// candidate exists.
		pub fn rotate_node(
			leaving_node: NodeId,
			schain_hash: SchainHash,
		) -> Result<Option<NodeId>, DispatchError> {
			Self::absorb_dkg_timeout(schain_hash)?;

			let schain = pallet_schains::Pallet::<T>::schain(schain_hash)
				.ok_or(Error::<T>::SchainNotFound)?;
			let mut rotation =
				Rotations::<T>::get(schain_hash).ok_or(Error::<T>::NoActiveRotation)?;
			ensure!(rotation.leaving_node == leaving_node, Error::<T>::NoActiveRotation);
			if rotation.new_node.is_some() {
				// Already swapped; only the DKG report moves things forward.
				return Ok(rotation.new_node);
			}

			let selected = pallet_schains::Pallet::<T>::select_nodes(
				schain_hash,
				1,
				schain.part_of_node,
				&[leaving_node],
			);
			pallet_schains::Pallet::<T>::remove_node_from_schain(
				leaving_node,
				schain_hash,
				schain.part_of_node,
			)?;
			pallet_schains::Pallet::<T>::bump_generation(schain_hash);

			match selected {
				Ok(picked) => {
					let new_node = picked[0];
					pallet_schains::Pallet::<T>::add_node_to_schain(
						new_node,
						schain_hash,
						schain.part_of_node,
					)?;
					rotation.new_node = Some(new_node);
					Rotations::<T>::insert(schain_hash, rotation);
					Self::open_channel(schain_hash);

					Self::deposit_event(Event::ReplacementSelected {
						schain_hash,
						leaving_node,
						new_node,
					});
					Ok(Some(new_node))
				}
				Err(_) => {
					// The group keeps running short; the frozen record lets a
					// later call fill the seat when capacity appears.
					Rotations::<T>::insert(schain_hash, rotation);
					pallet_schains::Pallet::<T>::note_vacancy(schain_hash);
					Self::open_channel(schain_hash);

					log::info!(
						"no replacement for node {} on schain {:?}",
						leaving_node,
						schain_hash
					);
					Self::deposit_event(Event::ReplacementUnavailable { schain_hash, leaving_node });
					Ok(None)
				}
			}
		}

		/// Seat a node into a group that is running below its required size.
		pub fn fill_vacancy(schain_hash: SchainHash) -> Result<NodeId, DispatchError> {
			Self::absorb_dkg_timeout(schain_hash)?;

			let schain = pallet_schains::Pallet::<T>::schain(schain_hash)
				.ok_or(Error::<T>::SchainNotFound)?;
			ensure!(
				pallet_schains::Pallet::<T>::vacant_seats(schain_hash) > 0,
				Error::<T>::NoVacancy
			);

			let picked =
				pallet_schains::Pallet::<T>::select_nodes(schain_hash, 1, schain.part_of_node, &[])?;
			let node_id = picked[0];
			pallet_schains::Pallet::<T>::add_node_to_schain(node_id, schain_hash, schain.part_of_node)?;
			pallet_schains::Pallet::<T>::bump_generation(schain_hash);
			pallet_schains::Pallet::<T>::clear_vacancy(schain_hash);
			Self::open_channel(schain_hash);
			Ok(node_id)
		}

		/// Mark the schain's current composition as pending a key.
		pub fn open_channel(schain_hash: SchainHash) {
			let now = frame_system::Pallet::<T>::block_number();
			DkgStatusOf::<T>::insert(schain_hash, DkgStatus::PendingRekey);
			DkgDeadline::<T>::insert(schain_hash, now + T::ComplaintTimeLimit::get());
			Self::deposit_event(Event::DkgChannelOpened { schain_hash });
		}

		/// Drop every record kept for a schain. Used when it is deleted.
		pub fn clear_schain_state(schain_hash: SchainHash) {
			Rotations::<T>::remove(schain_hash);
			DkgStatusOf::<T>::remove(schain_hash);
			DkgDeadline::<T>::remove(schain_hash);
			FailedDkgAttempts::<T>::remove(schain_hash);
		}

		/// Whether the leaving node has sat out its freeze period.
		pub fn exit_delay_elapsed(node_id: NodeId) -> bool {
			match ExitAllowedAfter::<T>::get(node_id) {
				Some(after) => frame_system::Pallet::<T>::block_number() >= after,
				None => true,
			}
		}

		pub fn note_exit_completed(node_id: NodeId) {
			ExitAllowedAfter::<T>::remove(node_id);
		}

		/// Lazily fold an expired DKG deadline into a failure. Timeouts are
		/// only observed when the next relevant operation comes along.
		pub fn absorb_dkg_timeout(schain_hash: SchainHash) -> DispatchResult {
			if DkgStatusOf::<T>::get(schain_hash) == DkgStatus::PendingRekey {
				if let Some(deadline) = DkgDeadline::<T>::get(schain_hash) {
					if frame_system::Pallet::<T>::block_number() > deadline {
						Self::on_dkg_failure(schain_hash)?;
					}
				}
			}
			Ok(())
		}

		fn on_dkg_success(schain_hash: SchainHash) {
			let now = frame_system::Pallet::<T>::block_number();
			DkgStatusOf::<T>::insert(schain_hash, DkgStatus::Successful);
			DkgDeadline::<T>::remove(schain_hash);
			FailedDkgAttempts::<T>::remove(schain_hash);

			if let Some(rotation) = Rotations::<T>::take(schain_hash) {
				let leaving_node = rotation.leaving_node;
				LeavingHistory::<T>::mutate(leaving_node, |history| {
					history.push(LeavingEntry { schain_hash, finished_at: now })
				});
				LastRotatedOutAt::<T>::insert(leaving_node, now);
				Self::deposit_event(Event::RotationFinalized { schain_hash, leaving_node });
			}
			Self::deposit_event(Event::DkgSucceeded { schain_hash });
		}

		fn on_dkg_failure(schain_hash: SchainHash) -> DispatchResult {
			let attempts = FailedDkgAttempts::<T>::mutate(schain_hash, |count| {
				*count = count.saturating_add(1);
				*count
			});
			DkgStatusOf::<T>::insert(schain_hash, DkgStatus::Failed);
			DkgDeadline::<T>::remove(schain_hash);
			Self::deposit_event(Event::DkgFailed { schain_hash, attempts });

			if attempts <= T::DkgRetriesBeforeReselection::get() {
				// Same group gets another round.
				Self::open_channel(schain_hash);
				Self::deposit_event(Event::DkgRestarted { schain_hash, attempt: attempts });
				return Ok(());
			}

			// Retry budget exhausted: if a rotation chose the group, swap the
			// chosen replacement for a fresh one.
			if let Some(mut rotation) = Rotations::<T>::get(schain_hash) {
				if let Some(previous) = rotation.new_node {
					let schain = pallet_schains::Pallet::<T>::schain(schain_hash)
						.ok_or(Error::<T>::SchainNotFound)?;
					let now = frame_system::Pallet::<T>::block_number();

					pallet_schains::Pallet::<T>::remove_node_from_schain(
						previous,
						schain_hash,
						schain.part_of_node,
					)?;
					LeavingHistory::<T>::mutate(previous, |history| {
						history.push(LeavingEntry { schain_hash, finished_at: now })
					});
					LastRotatedOutAt::<T>::insert(previous, now);
					FailedDkgAttempts::<T>::remove(schain_hash);

					let leaving_node = rotation.leaving_node;
					match pallet_schains::Pallet::<T>::select_nodes(
						schain_hash,
						1,
						schain.part_of_node,
						&[leaving_node, previous],
					) {
						Ok(picked) => {
							let new_node = picked[0];
							pallet_schains::Pallet::<T>::add_node_to_schain(
								new_node,
								schain_hash,
								schain.part_of_node,
							)?;
							rotation.new_node = Some(new_node);
							Rotations::<T>::insert(schain_hash, rotation);
							pallet_schains::Pallet::<T>::bump_generation(schain_hash);
							Self::open_channel(schain_hash);

							Self::deposit_event(Event::ReplacementSelected {
								schain_hash,
								leaving_node,
								new_node,
							});
						}
						Err(_) => {
							rotation.new_node = None;
							Rotations::<T>::insert(schain_hash, rotation);
							pallet_schains::Pallet::<T>::bump_generation(schain_hash);
							pallet_schains::Pallet::<T>::note_vacancy(schain_hash);
							Self::open_channel(schain_hash);

							Self::deposit_event(Event::ReplacementUnavailable {
								schain_hash,
								leaving_node,
							});
						}
					}
				}
			}
			Ok(())
		}
	}

	impl<T: Config> ReplacementVeto for Pallet<T> {
		fn is_vetoed(node_id: NodeId) -> bool {
			match LastRotatedOutAt::<T>::get(node_id) {
				Some(at) => {
					let now = frame_system::Pallet::<T>::block_number();
					now < at + T::RotationDelay::get()
				}
				None => false,
			}
		}
	}
}
