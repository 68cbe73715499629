//! The per-page shared store context.
//!
//! Every store of a page is linked into one of a chain of nodes keyed by
//! block payload size (`abytes`), largest first. Within a node, stores
//! sit on one list per eviction action, ordered by descending block count
//! so the low-memory handlers always purge the biggest stores first.
//! Aggregate per-action store and block counts let the solicit path
//! estimate reclaimable memory without walking anything.

use std::path::PathBuf;
use std::sync::Arc;

use log::debug;
use parking_lot::{Mutex, MutexGuard};
use ripple_types::IBBox;
use ripple_types::colorant::ColorantIndex;
use slotmap::{SlotMap, new_key_type};

use crate::blist::BlistPool;
use crate::error::StoreError;
use crate::pagefile::PageFile;
use crate::store::{N_ACTIONS, Store, StoreAction, StoreFlags};

new_key_type! {
	/// Stable handle for a store within its page's shared context.
	pub struct StoreKey;
}

/// Page-level policy controlling the eviction tiers.
#[derive(Debug, Clone, Copy)]
pub struct StorePolicy {
	/// Compression tier enabled (`CompressImageSource`).
	pub compress_image_source: bool,
	/// Disk tier enabled (`LowMemImagePurgeToDisk`).
	pub purge_to_disk: bool,
	/// Master switch; cleared while purging would be unsafe.
	pub purge_allowed: bool,
}

impl Default for StorePolicy {
	fn default() -> Self {
		Self {
			compress_image_source: true,
			purge_to_disk: true,
			purge_allowed: true,
		}
	}
}

/// One size bucket: stores sharing a block payload size.
#[derive(Debug)]
pub(crate) struct StoreNode {
	pub abytes: usize,
	/// Store lists per action, descending block count.
	pub lists: [Vec<StoreKey>; N_ACTIONS],
	pub n_stores: [usize; N_ACTIONS],
	pub n_blocks: [usize; N_ACTIONS],
	/// Recycled sample buffers for this block size.
	pub blists: BlistPool,
}

impl StoreNode {
	fn new(abytes: usize) -> Self {
		Self {
			abytes,
			lists: Default::default(),
			n_stores: [0; N_ACTIONS],
			n_blocks: [0; N_ACTIONS],
			blists: BlistPool::default(),
		}
	}
}

/// The blist-sharing actions alias one node list: both purge the same
/// staging buffers and keeping them together avoids merging two lists
/// when choosing what to migrate to the global pool.
fn list_slot(action: StoreAction) -> usize {
	match action {
		StoreAction::ShareBlists2 => StoreAction::ShareBlists1 as usize,
		other => other as usize,
	}
}

/// All stores of one page plus the scratch spool and pools.
#[derive(Debug)]
pub struct SharedStores {
	pub(crate) stores: SlotMap<StoreKey, Store>,
	/// Nodes sorted by descending `abytes`.
	pub(crate) nodes: Vec<StoreNode>,
	pub(crate) n_stores: [usize; N_ACTIONS],
	pub(crate) n_blocks: [usize; N_ACTIONS],
	pub(crate) n_stores_total: usize,
	pub(crate) n_blocks_total: usize,
	pub(crate) policy: StorePolicy,
	pub(crate) pagefile: PageFile,
}

impl SharedStores {
	fn new(policy: StorePolicy, spool_dir: Option<PathBuf>) -> Self {
		let dir = spool_dir.unwrap_or_else(std::env::temp_dir);
		Self {
			stores: SlotMap::with_key(),
			nodes: Vec::new(),
			n_stores: [0; N_ACTIONS],
			n_blocks: [0; N_ACTIONS],
			n_stores_total: 0,
			n_blocks_total: 0,
			policy,
			pagefile: PageFile::new(&dir),
		}
	}

	// ── Node linkage ─────────────────────────────────────────────────────

	fn node_index(&mut self, abytes: usize) -> usize {
		match self.nodes.iter().position(|n| n.abytes <= abytes) {
			Some(i) if self.nodes[i].abytes == abytes => i,
			Some(i) => {
				self.nodes.insert(i, StoreNode::new(abytes));
				i
			}
			None => {
				self.nodes.push(StoreNode::new(abytes));
				self.nodes.len() - 1
			}
		}
	}

	pub(crate) fn link(&mut self, key: StoreKey, action: StoreAction) {
		let (abytes, weight) = {
			let store = &self.stores[key];
			(store.abytes, store.nblocks() * store.nplanes())
		};
		let slot = list_slot(action);
		let ni = self.node_index(abytes);
		let node = &mut self.nodes[ni];

		// Largest store first within the list.
		let list = &mut node.lists[slot];
		let pos = list
			.iter()
			.position(|&k| {
				let s = &self.stores[k];
				s.nblocks() * s.nplanes() <= weight
			})
			.unwrap_or(list.len());
		list.insert(pos, key);

		node.n_stores[slot] += 1;
		node.n_blocks[slot] += weight;
		self.n_stores[slot] += 1;
		self.n_blocks[slot] += weight;
		self.n_stores_total += 1;
		self.n_blocks_total += weight;
	}

	pub(crate) fn unlink(&mut self, key: StoreKey, action: StoreAction) {
		let (abytes, weight) = {
			let store = &self.stores[key];
			(store.abytes, store.nblocks() * store.nplanes())
		};
		let slot = list_slot(action);
		let ni = self
			.nodes
			.iter()
			.position(|n| n.abytes == abytes)
			.expect("store linked to a missing node");
		let node = &mut self.nodes[ni];
		let pos = node.lists[slot]
			.iter()
			.position(|&k| k == key)
			.expect("store missing from its action list");
		node.lists[slot].remove(pos);

		node.n_stores[slot] -= 1;
		node.n_blocks[slot] -= weight;
		self.n_stores[slot] -= 1;
		self.n_blocks[slot] -= weight;
		self.n_stores_total -= 1;
		self.n_blocks_total -= weight;
		// Empty nodes stay: the size will most likely recur on this page.
	}

	pub(crate) fn relink(&mut self, key: StoreKey, action: StoreAction) {
		let old = if self.stores[key].open_for_writing {
			StoreAction::OpenForWriting
		} else {
			self.stores[key].action
		};
		self.unlink(key, old);
		self.link(key, action);
		self.stores[key].action = action;
	}

	// ── Store lifecycle ──────────────────────────────────────────────────

	/// Opens a new store for writing.
	pub fn open(
		&mut self,
		bbox: IBBox,
		nplanes: usize,
		bpp: u8,
		flags: StoreFlags,
	) -> Result<StoreKey, StoreError> {
		let store = Store::new(bbox, nplanes, bpp, flags);
		let key = self.stores.insert(store);
		self.link(key, StoreAction::OpenForWriting);
		debug!(
			"image store opened: {}x{} px, {} planes, {} bpp",
			bbox.width(),
			bbox.height(),
			nplanes,
			bpp
		);
		Ok(key)
	}

	/// Shared access to a store.
	pub fn store(&self, key: StoreKey) -> Result<&Store, StoreError> {
		self.stores.get(key).ok_or(StoreError::StaleHandle)
	}

	/// Mutable access to a store.
	pub fn store_mut(&mut self, key: StoreKey) -> Result<&mut Store, StoreError> {
		self.stores.get_mut(key).ok_or(StoreError::StaleHandle)
	}

	fn node_pool_of(&mut self, key: StoreKey) -> Option<usize> {
		let abytes = self.stores.get(key)?.abytes;
		self.nodes.iter().position(|n| n.abytes == abytes)
	}

	/// Writes one image row of a plane; see [`Store::write_row`].
	pub fn write_row(
		&mut self,
		key: StoreKey,
		planei: usize,
		y: i32,
		data: &[u8],
	) -> Result<(), StoreError> {
		let ni = self.node_pool_of(key);
		let completed = {
			let store = self.stores.get_mut(key).ok_or(StoreError::StaleHandle)?;
			let pool = ni.map(|i| &mut self.nodes[i].blists);
			store.write_row(planei, y, data, pool)?
		};
		if completed {
			self.written_some(key)?;
		}
		Ok(())
	}

	/// A row of blocks just filled: completed data makes the store a
	/// purge candidate, and under memory pressure the finished row is
	/// purged at once so its staging buffers free up for the next one.
	fn written_some(&mut self, key: StoreKey) -> Result<(), StoreError> {
		let policy = self.policy;
		// Fresh data always reopens the compression opportunity.
		self.stores[key].set_action(true, policy.compress_image_source, policy.purge_to_disk);
		if self.stores[key].blist_purge_row {
			self.store_purge_some(key, 1)?;
		}
		Ok(())
	}

	/// Writes one byte-column of a transposed plane; see
	/// [`Store::write_column`].
	pub fn write_column(
		&mut self,
		key: StoreKey,
		planei: usize,
		x: i32,
		data: &[u8],
	) -> Result<(), StoreError> {
		let ni = self.node_pool_of(key);
		let completed = {
			let store = self.stores.get_mut(key).ok_or(StoreError::StaleHandle)?;
			let pool = ni.map(|i| &mut self.nodes[i].blists);
			store.write_column(planei, x, data, pool)?
		};
		if completed {
			self.written_some(key)?;
		}
		Ok(())
	}

	/// Reads a run of samples; see [`Store::read_run`].
	pub fn read_run(
		&mut self,
		key: StoreKey,
		planei: usize,
		x: i32,
		y: i32,
	) -> Result<(&[u8], usize), StoreError> {
		let ni = self.node_pool_of(key);
		let store = self.stores.get_mut(key).ok_or(StoreError::StaleHandle)?;
		let pool = ni.map(|i| &mut self.nodes[i].blists);
		store.read_run(planei, x, y, &mut self.pagefile, pool)
	}

	/// Pre-allocates the first row of blocks; see [`Store::prealloc`].
	pub fn prealloc(
		&mut self,
		key: StoreKey,
		planei: Option<usize>,
		n_samples: usize,
	) -> Result<(), StoreError> {
		let ni = self.node_pool_of(key);
		let store = self.stores.get_mut(key).ok_or(StoreError::StaleHandle)?;
		let pool = ni.map(|i| &mut self.nodes[i].blists);
		store.prealloc(planei, n_samples, pool)
	}

	/// Closes a store for writing and links it to its first eviction
	/// action.
	pub fn close(&mut self, key: StoreKey) -> Result<(), StoreError> {
		let incomplete = self.store_mut(key)?.finish_writing();
		if incomplete {
			debug!("image store closed with incomplete data");
		}
		let policy = self.policy;
		{
			let store = self.store_mut(key)?;
			store.set_action(true, policy.compress_image_source, policy.purge_to_disk);
		}
		let action = self.stores[key].action;
		// finish_writing cleared the open flag; unlink from the open list.
		self.unlink(key, StoreAction::OpenForWriting);
		self.link(key, action);

		// Rendering must always find staging buffers for one row of
		// blocks, so the pool reserve follows the most demanding plane of
		// the widest closed store.
		if let Some(ni) = self.node_pool_of(key) {
			let want = {
				let store = &self.stores[key];
				let per_plane = store
					.planes
					.iter()
					.flatten()
					.map(|p| p.n_desired_blists)
					.max()
					.unwrap_or(0);
				per_plane * store.nplanes()
			};
			let pool = &mut self.nodes[ni].blists;
			pool.required = pool.required.max(want);
		}
		Ok(())
	}

	/// Reopens a closed store for image adjustment when every block is
	/// still memory-resident. Extends the plane array to `nplanes`.
	///
	/// Returns false (without touching the store) when recycling is not
	/// possible.
	pub fn recycle(&mut self, key: StoreKey, nplanes: usize) -> Result<bool, StoreError> {
		{
			let store = self.store(key)?;
			if store.open_for_writing || nplanes < store.nplanes() {
				return Ok(false);
			}
			for plane in store.planes.iter().flatten() {
				for block in plane.blocks.iter().flatten() {
					if !matches!(
						block.storage(),
						crate::block::BlockStorage::Memory(_)
					) {
						return Ok(false);
					}
				}
			}
		}

		let old_action = self.stores[key].action;
		self.unlink(key, old_action);
		{
			let store = &mut self.stores[key];
			while store.planes.len() < nplanes {
				store.planes.push(None);
			}
			store.open_for_writing = true;
			store.flags |= StoreFlags::RECYCLED;
			store.action = StoreAction::NothingMore;
			for plane in store.planes.iter_mut().flatten() {
				for block in plane.blocks.iter_mut().flatten() {
					block.reopen();
				}
			}
		}
		self.link(key, StoreAction::OpenForWriting);
		Ok(true)
	}

	/// Tightens a store's trimmed bbox; see [`Store::trim`].
	pub fn trim(&mut self, key: StoreKey, ibbox: IBBox) -> Result<(), StoreError> {
		self.store_mut(key)?.trim(ibbox);
		Ok(())
	}

	/// Reorders a store's planes to a new colorant-index mapping.
	///
	/// `current[j]` names the colorant in plane `j`; the rebuilt store has
	/// `order.len()` planes with `order[i]` drawn from wherever it sat.
	/// Planes matching no slot are freed.
	pub fn reorder(
		&mut self,
		key: StoreKey,
		current: &[ColorantIndex],
		order: &[ColorantIndex],
	) -> Result<(), StoreError> {
		let old_action = if self.stores.get(key).ok_or(StoreError::StaleHandle)?.open_for_writing
		{
			StoreAction::OpenForWriting
		} else {
			self.stores[key].action
		};
		self.unlink(key, old_action);
		{
			let store = &mut self.stores[key];
			let mut old_planes: Vec<_> = std::mem::take(&mut store.planes);
			let mut planes = Vec::with_capacity(order.len());
			for want in order {
				let found = current
					.iter()
					.position(|have| have == want)
					.and_then(|j| old_planes.get_mut(j).map(Option::take));
				planes.push(found.flatten());
			}
			// Unmatched planes are dropped: multi-channel to LUT
			// conversion deletes planes this way.
			store.planes = planes;
		}
		self.link(key, old_action);
		Ok(())
	}

	/// Merges `src` into `dst` plane-wise and frees `src`.
	///
	/// The stores must agree on geometry and the planes must be mutually
	/// exclusive. The merged action keeps whichever eviction potential is
	/// greater.
	pub fn merge(&mut self, src_key: StoreKey, dst_key: StoreKey) -> Result<(), StoreError> {
		{
			let Some([src, dst]) = self.stores.get_disjoint_mut([src_key, dst_key]) else {
				return Err(StoreError::StaleHandle);
			};
			if src.bpp != dst.bpp
				|| src.obbox != dst.obbox
				|| src.flags != dst.flags
				|| src.xblock != dst.xblock
				|| src.yblock != dst.yblock
				|| src.abytes != dst.abytes
				|| src.open_for_writing
				|| dst.open_for_writing
			{
				return Err(StoreError::MergeMismatch);
			}
		}

		let dst_action = self.stores[dst_key].action;
		let src_action = self.stores[src_key].action;
		self.unlink(dst_key, dst_action);

		{
			let Some([src, dst]) = self.stores.get_disjoint_mut([src_key, dst_key]) else {
				unreachable!("both stores verified above");
			};
			if src.planes.len() > dst.planes.len() {
				dst.planes.resize_with(src.planes.len(), || None);
			}
			for (i, plane) in src.planes.iter_mut().enumerate() {
				if plane.is_some() {
					debug_assert!(
						dst.planes[i].is_none(),
						"merge planes must be mutually exclusive"
					);
					dst.planes[i] = plane.take();
				}
			}
		}

		let merged_action = if src_action.merge_rank() > dst_action.merge_rank() {
			src_action
		} else {
			dst_action
		};
		self.link(dst_key, merged_action);
		self.stores[dst_key].action = merged_action;

		self.free(src_key)?;
		Ok(())
	}

	/// Frees a store and all its data.
	pub fn free(&mut self, key: StoreKey) -> Result<(), StoreError> {
		let action = if self.stores.get(key).ok_or(StoreError::StaleHandle)?.open_for_writing {
			StoreAction::OpenForWriting
		} else {
			self.stores[key].action
		};
		self.unlink(key, action);
		self.stores.remove(key);
		Ok(())
	}

	/// Installs preconversion reserves for a store.
	pub fn preconvert_reserve(&mut self, key: StoreKey) -> Result<(), StoreError> {
		self.store_mut(key)?.preconvert_reserve()
	}

	/// Releases a store's preconversion reserves.
	pub fn release_reserves(&mut self, key: StoreKey) -> Result<(), StoreError> {
		self.store_mut(key)?.release_reserves();
		Ok(())
	}

	/// Releases every store's preconversion reserves (render pass start).
	pub fn release_all_reserves(&mut self) {
		for (_, store) in self.stores.iter_mut() {
			store.release_reserves();
		}
	}

	/// Destroys the scratch spool (page erase).
	pub fn destroy_pagefile(&mut self) {
		self.pagefile.destroy();
	}

	/// Total blocks currently linked under an action, all nodes combined.
	pub fn blocks_at_action(&self, action: StoreAction) -> usize {
		self.n_blocks[list_slot(action)]
	}

	/// Total stores currently linked under an action.
	pub fn stores_at_action(&self, action: StoreAction) -> usize {
		self.n_stores[list_slot(action)]
	}
}

/// Handle to a page's image stores, shared across threads.
///
/// One mutex serialises the shared lists, block state transitions and the
/// scratch file; the low-memory handlers only ever try-lock it.
#[derive(Debug, Clone)]
pub struct ImageStoreSet {
	inner: Arc<Mutex<SharedStores>>,
}

impl ImageStoreSet {
	/// Creates the shared context for a page.
	pub fn new(policy: StorePolicy, spool_dir: Option<PathBuf>) -> Self {
		Self {
			inner: Arc::new(Mutex::new(SharedStores::new(policy, spool_dir))),
		}
	}

	/// Locks the shared context.
	pub fn lock(&self) -> MutexGuard<'_, SharedStores> {
		self.inner.lock()
	}

	/// Tries to lock without blocking; the low-memory path gives up on
	/// contention rather than stall an allocating thread.
	pub fn try_lock(&self) -> Option<MutexGuard<'_, SharedStores>> {
		self.inner.try_lock()
	}
}
