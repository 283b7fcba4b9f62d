#![cfg_attr(not(feature = "std"), no_std)]

pub mod slot_list;
pub mod traits;

pub use slot_list::IndexedSlotList;
pub use traits::{BountyPayout, ReplacementVeto, ValidatorRegistry};

/// Stable numeric identifier of a registered node. Never reused.
pub type NodeId = u32;

/// Identifier of a validator in the staking collaborator.
pub type ValidatorId = u32;

/// Blake2-256 hash of an schain name.
pub type SchainHash = [u8; 32];

/// Fraction of a node's capacity, measured in 1/128 units of a full node.
pub type Space = u8;

/// The capacity a node declares when it enters the registry.
pub const FULL_NODE_SPACE: Space = 128;
