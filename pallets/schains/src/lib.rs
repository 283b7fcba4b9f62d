#![cfg_attr(not(feature = "std"), no_std)]

pub use pallet::*;
pub use types::*;

#[cfg(test)]
mod mock;


mod types;

#[frame_support::pallet]
pub mod pallet {
	use super::*;
	use codec::Encode;
	use frame_support::pallet_prelude::*;
	use frame_system::{ensure_root, pallet_prelude::*};
	use lattice_primitives::{IndexedSlotList, NodeId, ReplacementVeto, SchainHash, Space, FULL_NODE_SPACE};
	use sp_io::hashing::blake2_256;
	use sp_std::prelude::*;

	#[pallet::pallet]
	#[pallet::without_storage_info]
	pub struct Pallet<T>(_);

	#[pallet::config]
	pub trait Config: frame_system::Config + pallet_nodes::Config {
		type RuntimeEvent: From<Event<Self>> + IsType<<Self as frame_system::Config>::RuntimeEvent>;

		/// Consulted for every selection candidate; lets the rotation
		/// coordinator keep freshly rotated-out nodes off new groups.
		type ReplacementVeto: ReplacementVeto;

		/// Failed liveness re-checks tolerated inside one selection call.
		#[pallet::constant]
		type SelectionAttempts: Get<u32>;
	}

	#[pallet::storage]
	#[pallet::getter(fn schain)]
	pub type Schains<T: Config> = StorageMap<
		_,
		Blake2_128Concat,
		SchainHash,
		Schain<T::AccountId, BlockNumberFor<T>>,
		OptionQuery,
	>;

	/// Every schain hash known to the system.
	#[pallet::storage]
	#[pallet::getter(fn schains_at_system)]
	pub type SchainHashes<T: Config> = StorageValue<_, Vec<SchainHash>, ValueQuery>;

	#[pallet::storage]
	#[pallet::getter(fn schain_hashes_by_owner)]
	pub type SchainHashesByOwner<T: Config> =
		StorageMap<_, Blake2_128Concat, T::AccountId, Vec<SchainHash>, ValueQuery>;

	/// The registry of schain shapes that can be requested.
	#[pallet::storage]
	#[pallet::getter(fn schain_type)]
	pub type SchainTypes<T: Config> =
		StorageMap<_, Blake2_128Concat, u8, SchainTypeDescription, OptionQuery>;

	/// Current group of a schain.
	#[pallet::storage]
	#[pallet::getter(fn nodes_in_group)]
	pub type NodesInGroup<T: Config> =
		StorageMap<_, Blake2_128Concat, SchainHash, Vec<NodeId>, ValueQuery>;

	/// Per-node slot sequence with its hole stack. Indices stay stable while
	/// other schains come and go.
	#[pallet::storage]
	#[pallet::getter(fn schain_slots)]
	pub type SchainSlots<T: Config> =
		StorageMap<_, Blake2_128Concat, NodeId, IndexedSlotList<SchainHash>, ValueQuery>;

	/// Reverse index: where a schain sits in a node's slot sequence.
	#[pallet::storage]
	#[pallet::getter(fn slot_of_schain_on_node)]
	pub type SlotOfSchainOnNode<T: Config> = StorageDoubleMap<
		_,
		Blake2_128Concat,
		SchainHash,
		Blake2_128Concat,
		NodeId,
		u32,
		OptionQuery,
	>;

	/// Seats a group is currently short of, after replacement selection
	/// found no candidate.
	#[pallet::storage]
	#[pallet::getter(fn vacant_seats)]
	pub type VacantSeats<T: Config> = StorageMap<_, Blake2_128Concat, SchainHash, u32, ValueQuery>;

	#[pallet::genesis_config]
	pub struct GenesisConfig<T: Config> {
		/// (type id, part of node, number of nodes)
		pub schain_types: Vec<(u8, Space, u32)>,
		#[serde(skip)]
		pub _config: sp_std::marker::PhantomData<T>,
	}

	impl<T: Config> Default for GenesisConfig<T> {
		fn default() -> Self {
			Self {
				schain_types: [
					(1, 1, 16),
					(2, 16, 16),
					(3, 128, 16),
					(4, 1, 2),
					(5, 32, 4),
				]
				.to_vec(),
				_config: Default::default(),
			}
		}
	}

	#[pallet::genesis_build]
	impl<T: Config> BuildGenesisConfig for GenesisConfig<T> {
		fn build(&self) {
			for (type_id, part_of_node, number_of_nodes) in &self.schain_types {
				SchainTypes::<T>::insert(
					type_id,
					SchainTypeDescription {
						part_of_node: *part_of_node,
						number_of_nodes: *number_of_nodes,
					},
				);
			}
		}
	}

	#[pallet::event]
	#[pallet::generate_deposit(pub(super) fn deposit_event)]
	pub enum Event<T: Config> {
		SchainCreated { schain_hash: SchainHash, name: Vec<u8>, owner: T::AccountId },
		SchainDeleted { schain_hash: SchainHash, name: Vec<u8> },
		SchainTypeAdded { type_id: u8 },
		NodeAddedToSchain { schain_hash: SchainHash, node_id: NodeId },
		NodeRemovedFromSchain { schain_hash: SchainHash, node_id: NodeId },
		/// A group is running short of its required size.
		VacancyRecorded { schain_hash: SchainHash, missing: u32 },
		VacancyFilled { schain_hash: SchainHash },
	}

	#[pallet::error]
	pub enum Error<T> {
		SchainNotFound,
		/// The schain name is empty.
		InvalidSchainName,
		/// Another schain already uses this name.
		SchainNameTaken,
		/// The requested schain type is not registered.
		InvalidSchainType,
		NotSchainOwner,
		/// No eligible node with enough free space could be selected.
		InsufficientCapacity,
		/// The node holds no slot for this schain.
		NodeNotInSchain,
	}

	#[pallet::call]
	impl<T: Config> Pallet<T> {
		/// Register a new schain shape.
		#[pallet::call_index(0)]
		#[pallet::weight(Weight::from_parts(10_000, 0) + T::DbWeight::get().writes(1))]
		pub fn add_schain_type(
			origin: OriginFor<T>,
			type_id: u8,
			part_of_node: Space,
			number_of_nodes: u32,
		) -> DispatchResult {
			ensure_root(origin)?;
			ensure!(
				part_of_node > 0 && part_of_node <= FULL_NODE_SPACE && number_of_nodes > 0,
				Error::<T>::InvalidSchainType
			);

			SchainTypes::<T>::insert(type_id, SchainTypeDescription { part_of_node, number_of_nodes });
			Self::deposit_event(Event::SchainTypeAdded { type_id });
			Ok(())
		}
	}

	impl<T: Config> Pallet<T> {
		pub fn schain_hash_of(name: &[u8]) -> SchainHash {
			blake2_256(name)
		}

		pub fn is_schain_in_system(schain_hash: &SchainHash) -> bool {
			Schains::<T>::contains_key(schain_hash)
		}

		pub fn number_of_schains() -> u32 {
			SchainHashes::<T>::get().len() as u32
		}

		/// Schain hashes occupying slots on a node.
		pub fn schain_hashes_for_node(node_id: NodeId) -> Vec<SchainHash> {
			SchainSlots::<T>::get(node_id).iter().map(|(_, hash)| *hash).collect()
		}

		pub fn is_expired(schain: &Schain<T::AccountId, BlockNumberFor<T>>) -> bool {
			let now = frame_system::Pallet::<T>::block_number();
			now >= schain.start_block + schain.lifetime
		}

		/// Create the schain row and allocate its initial group.
		pub fn do_create_schain(
			owner: T::AccountId,
			name: Vec<u8>,
			type_id: u8,
			lifetime: BlockNumberFor<T>,
			deposit: u128,
		) -> Result<SchainHash, DispatchError> {
			ensure!(!name.is_empty(), Error::<T>::InvalidSchainName);
			let schain_hash = blake2_256(&name);
			ensure!(!Schains::<T>::contains_key(schain_hash), Error::<T>::SchainNameTaken);
			let ty = SchainTypes::<T>::get(type_id).ok_or(Error::<T>::InvalidSchainType)?;

			// Select before writing anything so a failed selection leaves no
			// trace behind.
			let picked =
				Self::select_nodes(schain_hash, ty.number_of_nodes, ty.part_of_node, &[])?;

			let now = frame_system::Pallet::<T>::block_number();
			Schains::<T>::insert(
				schain_hash,
				Schain {
					name: name.clone(),
					owner: owner.clone(),
					type_id,
					part_of_node: ty.part_of_node,
					lifetime,
					start_block: now,
					deposit,
					generation: 0,
				},
			);
			for node_id in picked {
				Self::add_node_to_schain(node_id, schain_hash, ty.part_of_node)?;
			}

			SchainHashes::<T>::mutate(|hashes| hashes.push(schain_hash));
			SchainHashesByOwner::<T>::mutate(&owner, |hashes| hashes.push(schain_hash));

			log::info!("schain {:?} created with {} nodes", name, ty.number_of_nodes);
			Self::deposit_event(Event::SchainCreated { schain_hash, name, owner });
			Ok(schain_hash)
		}

		/// Tear the schain down, handing every slot and its space back.
		pub fn do_delete_schain(schain_hash: SchainHash) -> DispatchResult {
			let schain = Schains::<T>::take(schain_hash).ok_or(Error::<T>::SchainNotFound)?;

			for node_id in NodesInGroup::<T>::get(schain_hash) {
				Self::remove_node_from_schain(node_id, schain_hash, schain.part_of_node)?;
			}
			NodesInGroup::<T>::remove(schain_hash);
			VacantSeats::<T>::remove(schain_hash);
			SchainHashes::<T>::mutate(|hashes| hashes.retain(|hash| *hash != schain_hash));
			SchainHashesByOwner::<T>::mutate(&schain.owner, |hashes| {
				hashes.retain(|hash| *hash != schain_hash)
			});

			Self::deposit_event(Event::SchainDeleted { schain_hash, name: schain.name });
			Ok(())
		}

		/// Occupy space on the node and hand it a slot. The capacity check
		/// happens before any state is touched.
		pub fn add_node_to_schain(
			node_id: NodeId,
			schain_hash: SchainHash,
			part_of_node: Space,
		) -> DispatchResult {
			pallet_nodes::Pallet::<T>::occupy_space(node_id, part_of_node)?;

			let position = SchainSlots::<T>::mutate(node_id, |slots| slots.insert(schain_hash));
			SlotOfSchainOnNode::<T>::insert(schain_hash, node_id, position);
			NodesInGroup::<T>::mutate(schain_hash, |group| group.push(node_id));

			Self::deposit_event(Event::NodeAddedToSchain { schain_hash, node_id });
			Ok(())
		}

		/// Vacate the node's slot for this schain and return the space.
		pub fn remove_node_from_schain(
			node_id: NodeId,
			schain_hash: SchainHash,
			part_of_node: Space,
		) -> DispatchResult {
			let position = SlotOfSchainOnNode::<T>::take(schain_hash, node_id)
				.ok_or(Error::<T>::NodeNotInSchain)?;
			SchainSlots::<T>::mutate(node_id, |slots| slots.remove(position));
			NodesInGroup::<T>::mutate(schain_hash, |group| group.retain(|id| *id != node_id));
			pallet_nodes::Pallet::<T>::release_space(node_id, part_of_node);

			Self::deposit_event(Event::NodeRemovedFromSchain { schain_hash, node_id });
			Ok(())
		}

		/// Deterministic pseudo-random selection of `count` nodes for a
		/// schain.
		///
		/// Candidates are Active nodes with enough free space that are not in
		/// the group, not excluded by the caller and not vetoed. Every draw
		/// re-checks the candidate right before committing to it; re-draws
		/// are bounded within the call.
		pub fn select_nodes(
			schain_hash: SchainHash,
			count: u32,
			part_of_node: Space,
			exclude: &[NodeId],
		) -> Result<Vec<NodeId>, DispatchError> {
			let group = NodesInGroup::<T>::get(schain_hash);
			let mut candidates: Vec<NodeId> = pallet_nodes::Pallet::<T>::nodes_with_free_space(part_of_node)
				.into_iter()
				.filter(|id| !group.contains(id))
				.filter(|id| !exclude.contains(id))
				.filter(|id| !T::ReplacementVeto::is_vetoed(*id))
				.collect();

			let mut picked = Vec::new();
			let mut draws: u32 = 0;
			let mut misses: u32 = 0;
			while (picked.len() as u32) < count {
				ensure!(!candidates.is_empty(), Error::<T>::InsufficientCapacity);

				let index = Self::draw_index(&schain_hash, draws, candidates.len() as u32);
				draws = draws.saturating_add(1);
				let candidate = candidates.swap_remove(index as usize);

				// Liveness re-check before the candidate is committed.
				if pallet_nodes::Pallet::<T>::is_node_active(candidate)
					&& pallet_nodes::Pallet::<T>::free_space_of(candidate) >= part_of_node
				{
					picked.push(candidate);
				} else {
					misses = misses.saturating_add(1);
					ensure!(misses < T::SelectionAttempts::get(), Error::<T>::InsufficientCapacity);
				}
			}
			Ok(picked)
		}

		pub fn note_vacancy(schain_hash: SchainHash) {
			let missing = VacantSeats::<T>::mutate(schain_hash, |seats| {
				*seats = seats.saturating_add(1);
				*seats
			});
			Self::deposit_event(Event::VacancyRecorded { schain_hash, missing });
		}

		pub fn clear_vacancy(schain_hash: SchainHash) {
			VacantSeats::<T>::mutate_exists(schain_hash, |maybe_seats| {
				let seats = maybe_seats.unwrap_or_default().saturating_sub(1);
				*maybe_seats = if seats == 0 { None } else { Some(seats) };
			});
			Self::deposit_event(Event::VacancyFilled { schain_hash });
		}

		pub fn bump_generation(schain_hash: SchainHash) {
			Schains::<T>::mutate(schain_hash, |maybe_schain| {
				if let Some(schain) = maybe_schain {
					schain.generation = schain.generation.saturating_add(1);
				}
			});
		}

		fn draw_index(schain_hash: &SchainHash, draw: u32, len: u32) -> u32 {
			let parent_hash = frame_system::Pallet::<T>::parent_hash();
			let seed = blake2_256(&(parent_hash, schain_hash, draw).encode());
			let word = u32::from_le_bytes([seed[0], seed[1], seed[2], seed[3]]);
			word % len
		}
	}
}
