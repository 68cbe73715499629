//! Low-memory handlers for the image store.
//!
//! Two tiers are exposed to the external low-memory arbiter: a RAM tier
//! that compresses block rows in place, and a disk tier that pages block
//! rows out to the scratch file. Each tier first *solicits* with a cheap
//! estimate (no list walking, just the aggregate block counts), then on
//! *release* purges whole rows from the largest candidate stores until the
//! requested amount is covered or nothing is left at that tier.
//!
//! Both paths try-lock the shared mutex and give up on contention: the
//! arbiter runs on whichever thread faulted, and stalling it against a
//! long render-side hold would invert the priorities.

use log::debug;

use crate::blist::MAX_BLISTS_TO_PURGE;
use crate::shared::{ImageStoreSet, SharedStores, StoreKey};
use crate::store::{BLOCK_DEFAULT_SIZE, PurgeKind, StoreAction};
use crate::error::StoreError;

/// Minimum blocks to purge per plane per call on a closed store; open
/// stores purge a single row so a whole column of staging buffers frees
/// when the row finishes.
const MIN_BLOCKS: usize = 10;

/// Fraction of stores allowed onto the blist-sharing lists before the
/// global pool is trimmed proactively.
const MAX_PURGED_STORE_FRACTION: usize = 4;

/// The two memory tiers the arbiter distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryTier {
	/// Reclaims RAM by compressing block rows.
	Ram,
	/// Reclaims RAM by paging block rows to the scratch file.
	Disk,
}

impl MemoryTier {
	fn action(self) -> StoreAction {
		match self {
			MemoryTier::Ram => StoreAction::Compression,
			MemoryTier::Disk => StoreAction::WriteToDisk,
		}
	}
}

impl SharedStores {
	/// The largest store currently purgeable at `action`.
	///
	/// Closed stores first (their lists are per-action and size-ordered),
	/// then writable stores whose next action matches.
	fn purge_locate_largest(&self, action: StoreAction) -> Option<StoreKey> {
		for node in &self.nodes {
			if let Some(&key) = node.lists[action as usize].first() {
				debug_assert!(!self.stores[key].open_for_writing);
				return Some(key);
			}
		}
		for node in &self.nodes {
			for &key in &node.lists[StoreAction::OpenForWriting as usize] {
				if self.stores[key].action == action {
					return Some(key);
				}
			}
		}
		None
	}

	/// Purges data from one store at its current action, at most
	/// `purge_limit` blocks (zero means one row).
	///
	/// When a tier runs dry the store advances to its next action, which
	/// for closed stores means relinking onto the next list.
	pub(crate) fn store_purge_some(
		&mut self,
		key: StoreKey,
		purge_limit: usize,
	) -> Result<usize, StoreError> {
		let mut total = 0usize;
		let policy = self.policy;
		let mut released: Vec<Vec<u8>> = Vec::new();

		loop {
			let action = self.stores[key].action;
			let open = self.stores[key].open_for_writing;
			let min_per_plane = if open { 1 } else { MIN_BLOCKS };

			let kind = match action {
				StoreAction::Compression => PurgeKind::Compress,
				StoreAction::WriteToDisk => PurgeKind::WriteToDisk,
				_ => break,
			};

			let pagefile = &mut self.pagefile;
			let purged =
				self.stores[key].purge_rows(kind, min_per_plane, pagefile, &mut released)?;
			total += purged;

			if purged == 0 {
				match action {
					StoreAction::Compression => {
						if open {
							self.stores[key].set_action(
								false,
								policy.compress_image_source,
								policy.purge_to_disk,
							);
						} else {
							self.relink(key, StoreAction::ShareBlists1);
						}
					}
					StoreAction::WriteToDisk => {
						if open {
							self.stores[key].action = StoreAction::NothingMore;
						} else {
							self.relink(key, StoreAction::ShareBlists2);
						}
					}
					_ => unreachable!(),
				}
				break;
			}
			// A limit of zero means a single row (the open-store write
			// path); otherwise stop once the limit is covered.
			if purge_limit == 0 || total >= purge_limit {
				break;
			}
		}

		// Released sample buffers go back to the node pool for reuse by
		// later block allocations.
		if !released.is_empty() {
			let abytes = self.stores[key].abytes;
			if let Some(node) = self.nodes.iter_mut().find(|n| n.abytes == abytes) {
				for buf in released {
					node.blists.give(buf);
				}
			}
		}

		Ok(total)
	}

	/// Advances stores whose staging buffers have finished migrating to
	/// the pool onto their next eviction action.
	///
	/// Buffer migration happens eagerly at purge time here, so a store on
	/// a sharing list is immediately eligible for its next tier.
	pub(crate) fn advance_blist_sharing(&mut self) {
		let policy = self.policy;
		let keys: Vec<StoreKey> = self
			.nodes
			.iter()
			.flat_map(|n| n.lists[StoreAction::ShareBlists1 as usize].iter().copied())
			.collect();
		for key in keys {
			let next = match self.stores[key].action {
				StoreAction::ShareBlists1 => {
					if self.stores[key].can_write_to_disk(policy.purge_to_disk) {
						StoreAction::WriteToDisk
					} else {
						StoreAction::NothingMore
					}
				}
				StoreAction::ShareBlists2 => StoreAction::NothingMore,
				_ => continue,
			};
			self.relink(key, next);
		}
	}

	/// Flags every writable store to purge finished rows eagerly.
	pub(crate) fn mark_open_stores_for_row_purge(&mut self) {
		let keys: Vec<StoreKey> = self
			.nodes
			.iter()
			.flat_map(|n| n.lists[StoreAction::OpenForWriting as usize].iter().copied())
			.collect();
		for key in keys {
			self.stores[key].blist_purge_row = true;
		}
	}

	/// Frees surplus recycled buffers from the global pools, largest block
	/// sizes retained preferentially. Returns buffers freed.
	pub(crate) fn purge_global_blists(&mut self) -> usize {
		let mut freed = 0usize;
		for node in self.nodes.iter_mut() {
			if freed >= MAX_BLISTS_TO_PURGE {
				break;
			}
			freed += node.blists.purge_surplus();
		}
		if freed > 0 {
			debug!("blist purge freed {freed} staging buffers");
		}
		freed
	}
}

impl ImageStoreSet {
	/// Solicit estimate for a tier: approximately how many bytes a
	/// release call could reclaim. `None` when the tier has nothing or
	/// policy forbids it.
	///
	/// This path must be quick, so the estimate assumes every block is of
	/// the default size; the RAM tier halves it because compression keeps
	/// the compressed payload resident.
	pub fn lowmem_solicit(&self, tier: MemoryTier) -> Option<usize> {
		let shared = self.try_lock()?;
		if !shared.policy.purge_allowed {
			return None;
		}
		match tier {
			MemoryTier::Ram if !shared.policy.compress_image_source => return None,
			MemoryTier::Disk if !shared.policy.purge_to_disk => return None,
			_ => {}
		}

		let nblocks = shared.blocks_at_action(tier.action());
		if nblocks == 0 {
			return None;
		}
		let estimate = match tier {
			MemoryTier::Ram => BLOCK_DEFAULT_SIZE * nblocks / 2,
			MemoryTier::Disk => BLOCK_DEFAULT_SIZE * nblocks,
		};
		debug!("imstore solicit ({tier:?}): ~{} KiB", estimate / 1024);
		Some(estimate)
	}

	/// Release handler: purges until roughly `taken_size` bytes are
	/// covered. Returns true when anything was freed; gives up silently
	/// when the store mutex is contended.
	pub fn lowmem_release(&self, tier: MemoryTier, taken_size: usize) -> Result<bool, StoreError> {
		let Some(mut shared) = self.try_lock() else {
			return Ok(false);
		};

		// Stores parked on a sharing list have already surrendered their
		// staging buffers; move them on so this tier can see them.
		shared.advance_blist_sharing();

		// While pressure lasts, open stores purge each row the moment it
		// completes instead of waiting for the next release call.
		shared.mark_open_stores_for_row_purge();

		let max_blocks = (taken_size / BLOCK_DEFAULT_SIZE).max(1);
		let mut purged_blocks = 0usize;
		let mut result = false;

		while purged_blocks < max_blocks {
			let Some(key) = shared.purge_locate_largest(tier.action()) else {
				break;
			};
			let purged = shared.store_purge_some(key, max_blocks - purged_blocks)?;
			purged_blocks += purged;
			result = result || purged > 0;
		}

		// Many stores stuck on the sharing lists means staging buffers
		// are piling up in the pools; trim them proactively.
		let sharing = shared.stores_at_action(StoreAction::ShareBlists1);
		if sharing * MAX_PURGED_STORE_FRACTION > shared.n_stores_total
			|| (!result && purged_blocks == 0)
		{
			let freed = shared.purge_global_blists();
			result = result || freed > 0;
		}

		debug!(
			"imstore release ({tier:?}): {} KiB purged",
			purged_blocks * BLOCK_DEFAULT_SIZE / 1024
		);
		Ok(result)
	}
}
