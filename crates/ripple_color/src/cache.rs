//! The content-addressed color cache.
//!
//! Colors are owned by an arena; a prime-sized hash table indexes them by
//! content. Cached entries sit on one of two most-recently-used lists:
//! the referenced list (refcount ≥ 1) and the unreferenced list (refcount
//! 0, retained for resurrection). When the cache is full a new color
//! first recycles the oldest unreferenced entry, then as a last resort
//! pushes the oldest referenced entry out of the index — that color lives
//! on through its handles and is freed on its final release.

use log::{debug, trace};
use ripple_types::paintmask::{self, CHAIN, CMD, PmCommand};
use ripple_types::{ColorValue, ColorantIndex};
use slotmap::{SlotMap, new_key_type};

use crate::entry::{MergeAction, PackedColor};
use crate::error::ColorError;

/// A reference count saturates here; further references copy the color.
pub const MAX_REFCOUNT: u16 = u16::MAX;

new_key_type! {
	/// Stable arena key for a cached color.
	pub struct ColorKey;
}

/// A counted reference to an interned color.
///
/// Carries a one-entry lookup cache so repeated reads of the same colorant
/// skip the paintmask walk (the common pattern when rendering a single
/// separation).
#[derive(Debug)]
pub struct DlColor {
	key: ColorKey,
	last: Option<(ColorantIndex, Option<ColorValue>)>,
}

impl DlColor {
	fn new(key: ColorKey) -> Self {
		Self {
			key,
			last: None,
		}
	}

	/// The arena key; equal keys mean the same cached color.
	pub fn key(&self) -> ColorKey {
		self.key
	}

	/// Reads a colorant value through the one-entry cache.
	pub fn colorant_value(
		&mut self,
		store: &ColorStore,
		ci: ColorantIndex,
	) -> Result<Option<ColorValue>, ColorError> {
		if let Some((last_ci, last_cv)) = self.last
			&& last_ci == ci
		{
			return Ok(last_cv);
		}
		let cv = store.get(self)?.colorant_value(ci);
		self.last = Some((ci, cv));
		Ok(cv)
	}
}

/// Which MRU list an entry is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MruList {
	Referenced,
	Unreferenced,
}

#[derive(Debug)]
struct CacheEntry {
	packed: PackedColor,
	refs: u16,
	/// Present in the hash index (constants and pushed-out colors are not).
	in_cache: bool,
	bucket: usize,
	list: Option<MruList>,
	prev: Option<ColorKey>,
	next: Option<ColorKey>,
}

#[derive(Debug, Default)]
struct ListEnds {
	head: Option<ColorKey>,
	tail: Option<ColorKey>,
}

/// Configuration for a color store.
#[derive(Debug, Clone, Copy, Default)]
pub struct ColorStoreConfig {
	/// Shrinks the hash table for low-memory configurations.
	pub low_memory: bool,
}

impl ColorStoreConfig {
	/// Prime bucket count; smaller in debug builds to churn the recycling
	/// paths, much smaller under the low-memory configuration.
	fn bucket_count(self) -> usize {
		if self.low_memory {
			131
		} else if cfg!(debug_assertions) {
			1021
		} else {
			2039
		}
	}
}

/// The per-page display-list color store.
#[derive(Debug)]
pub struct ColorStore {
	arena: SlotMap<ColorKey, CacheEntry>,
	buckets: Vec<Vec<ColorKey>>,
	mru_ref: ListEnds,
	mru_unref: ListEnds,
	cached: usize,
	max_cached: usize,
	black: ColorKey,
	white: ColorKey,
	none: ColorKey,
}

/// Content hash of a packed color, the same fold the original cache used:
/// colorvalues then mask bytes shifted in four bits at a time, command
/// payload bytes added, command colors hashing to zero.
fn content_hash(packed: &PackedColor, bucket_count: usize) -> usize {
	let pm = packed.pm();
	if pm[0] == CMD {
		return 0;
	}

	let mut h: u32 = 0;
	for value in packed.values() {
		h = (h << 4).wrapping_add(u32::from(value.0));
	}

	let info = paintmask::parse(pm);
	for &byte in &pm[..info.mask_len] {
		h = (h << 4).wrapping_add(u32::from(byte & !CHAIN));
	}

	let mut cursor = info.mask_len;
	if info.allsep {
		h = h.wrapping_add(u32::from(pm[cursor + 1]));
		cursor += 2;
	}
	if info.opacity {
		h = h.wrapping_add(u32::from(pm[cursor + 1]));
		cursor += 2;
	}
	if let Some(tail) = info.maxblt {
		h = h.wrapping_add(u32::from(pm[cursor + 1]));
		for &byte in &pm[tail..info.total_len] {
			h = (h << 4).wrapping_add(u32::from(byte & !CHAIN));
		}
	}

	(h % bucket_count as u32) as usize
}

impl ColorStore {
	/// Creates an empty store with the three constant colors installed.
	pub fn new(config: ColorStoreConfig) -> Self {
		let bucket_count = config.bucket_count();
		let mut arena = SlotMap::with_key();
		let constant = |arena: &mut SlotMap<ColorKey, CacheEntry>, cmd| {
			arena.insert(CacheEntry {
				packed: PackedColor::build_cmd(cmd),
				refs: 1,
				in_cache: false,
				bucket: 0,
				list: None,
				prev: None,
				next: None,
			})
		};
		let black = constant(&mut arena, PmCommand::All0);
		let white = constant(&mut arena, PmCommand::All1);
		let none = constant(&mut arena, PmCommand::None);

		Self {
			arena,
			buckets: vec![Vec::new(); bucket_count],
			mru_ref: ListEnds::default(),
			mru_unref: ListEnds::default(),
			cached: 0,
			max_cached: 2 * bucket_count,
			black,
			white,
			none,
		}
	}

	/// The constant black (ALL0) color.
	pub fn black(&self) -> DlColor {
		DlColor::new(self.black)
	}

	/// The constant white (ALL1) color.
	pub fn white(&self) -> DlColor {
		DlColor::new(self.white)
	}

	/// The constant none color.
	pub fn none(&self) -> DlColor {
		DlColor::new(self.none)
	}

	fn is_constant(&self, key: ColorKey) -> bool {
		key == self.black || key == self.white || key == self.none
	}

	/// Builds a scratch color; convenience over [`PackedColor::build`].
	pub fn build(
		&self,
		cis: &[ColorantIndex],
		cvs: &[ColorValue],
		opacity: ColorValue,
	) -> Result<PackedColor, ColorError> {
		PackedColor::build(cis, cvs, opacity)
	}

	/// The packed color behind a handle.
	pub fn get(&self, dlc: &DlColor) -> Result<&PackedColor, ColorError> {
		self.arena.get(dlc.key).map(|e| &e.packed).ok_or(ColorError::StaleHandle)
	}

	/// Current reference count behind a handle.
	pub fn refcount(&self, dlc: &DlColor) -> Result<u16, ColorError> {
		self.arena.get(dlc.key).map(|e| e.refs).ok_or(ColorError::StaleHandle)
	}

	/// Number of colors currently in the hash index.
	pub fn cached_len(&self) -> usize {
		self.cached
	}

	// ── MRU list plumbing ────────────────────────────────────────────────

	fn ends(&mut self, list: MruList) -> &mut ListEnds {
		match list {
			MruList::Referenced => &mut self.mru_ref,
			MruList::Unreferenced => &mut self.mru_unref,
		}
	}

	fn push_head(&mut self, list: MruList, key: ColorKey) {
		let old_head = self.ends(list).head;
		{
			let entry = &mut self.arena[key];
			debug_assert!(entry.list.is_none(), "entry already on an MRU list");
			entry.list = Some(list);
			entry.prev = None;
			entry.next = old_head;
		}
		if let Some(head) = old_head {
			self.arena[head].prev = Some(key);
		}
		let ends = self.ends(list);
		ends.head = Some(key);
		if ends.tail.is_none() {
			ends.tail = Some(key);
		}
	}

	fn unlink(&mut self, key: ColorKey) {
		let (list, prev, next) = {
			let entry = &mut self.arena[key];
			let list = entry.list.take().expect("entry not on an MRU list");
			(list, entry.prev.take(), entry.next.take())
		};
		match prev {
			Some(p) => self.arena[p].next = next,
			None => self.ends(list).head = next,
		}
		match next {
			Some(n) => self.arena[n].prev = prev,
			None => self.ends(list).tail = prev,
		}
	}

	fn tail_of(&self, list: MruList) -> Option<ColorKey> {
		match list {
			MruList::Referenced => self.mru_ref.tail,
			MruList::Unreferenced => self.mru_unref.tail,
		}
	}

	// ── Cache index plumbing ─────────────────────────────────────────────

	fn uncache(&mut self, key: ColorKey) {
		let bucket = self.arena[key].bucket;
		let pos = self.buckets[bucket]
			.iter()
			.position(|&k| k == key)
			.expect("cached entry missing from its bucket");
		self.buckets[bucket].swap_remove(pos);
		self.arena[key].in_cache = false;
		self.cached -= 1;
	}

	/// Makes room in the cache for one more entry.
	///
	/// Preference order: unreferenced colors are freed outright, then a
	/// still-referenced color is pushed out of the index (it stays alive
	/// through its handles).
	fn make_room(&mut self) {
		if self.cached < self.max_cached {
			return;
		}
		if let Some(victim) = self.tail_of(MruList::Unreferenced) {
			trace!("color cache full: dropping unreferenced entry");
			self.unlink(victim);
			self.uncache(victim);
			self.arena.remove(victim);
		} else if let Some(victim) = self.tail_of(MruList::Referenced) {
			trace!("color cache full: uncaching referenced entry");
			self.unlink(victim);
			self.uncache(victim);
		}
	}

	// ── Public lifecycle ─────────────────────────────────────────────────

	/// Interns a color, returning a counted handle.
	///
	/// A byte-equal cached color whose reference count has room is reused
	/// (resurrected from the unreferenced list when needed); otherwise the
	/// scratch color is copied into the arena and indexed.
	pub fn intern(&mut self, packed: &PackedColor) -> Result<DlColor, ColorError> {
		let hash = content_hash(packed, self.buckets.len());

		let hit = self.buckets[hash]
			.iter()
			.copied()
			.find(|&k| self.arena[k].refs < MAX_REFCOUNT && self.arena[k].packed == *packed);

		if let Some(key) = hit {
			if self.arena[key].refs == 0 {
				self.unlink(key);
				self.push_head(MruList::Referenced, key);
			}
			self.arena[key].refs += 1;
			return Ok(DlColor::new(key));
		}

		self.make_room();
		let key = self.arena.insert(CacheEntry {
			packed: packed.clone(),
			refs: 1,
			in_cache: true,
			bucket: hash,
			list: None,
			prev: None,
			next: None,
		});
		self.buckets[hash].push(key);
		self.cached += 1;
		self.push_head(MruList::Referenced, key);
		Ok(DlColor::new(key))
	}

	/// Takes another reference to the same color.
	///
	/// At refcount saturation this degrades to a fresh intern, so the
	/// returned handle may name a different (byte-equal) entry.
	pub fn add_reference(&mut self, dlc: &DlColor) -> Result<DlColor, ColorError> {
		if self.is_constant(dlc.key) {
			return Ok(DlColor::new(dlc.key));
		}
		let entry = self.arena.get_mut(dlc.key).ok_or(ColorError::StaleHandle)?;
		if entry.refs < MAX_REFCOUNT {
			entry.refs += 1;
			return Ok(DlColor::new(dlc.key));
		}
		let packed = entry.packed.clone();
		self.intern(&packed)
	}

	/// Releases one reference.
	///
	/// A color at refcount zero moves to the unreferenced list and keeps
	/// its memory until a purge or recycling claims it; a color already
	/// pushed out of the index is freed immediately.
	pub fn release(&mut self, dlc: DlColor) -> Result<(), ColorError> {
		if self.is_constant(dlc.key) {
			return Ok(());
		}
		let (refs, in_cache) = {
			let entry = self.arena.get_mut(dlc.key).ok_or(ColorError::StaleHandle)?;
			debug_assert!(entry.refs > 0, "releasing a color with no references");
			entry.refs -= 1;
			(entry.refs, entry.in_cache)
		};
		if refs == 0 {
			if in_cache {
				self.unlink(dlc.key);
				self.push_head(MruList::Unreferenced, dlc.key);
			} else {
				self.arena.remove(dlc.key);
			}
		}
		Ok(())
	}

	/// Frees every unreferenced cached color.
	///
	/// Called after a partial paint to give the display-list arena its
	/// memory back; afterwards the index holds only colors with a positive
	/// reference count.
	pub fn purge(&mut self) {
		let mut freed = 0usize;
		while let Some(key) = self.mru_unref.head {
			debug_assert_eq!(self.arena[key].refs, 0, "referenced color on unreferenced list");
			self.unlink(key);
			self.uncache(key);
			self.arena.remove(key);
			freed += 1;
		}
		debug!("color cache purge freed {freed} entries, {} remain", self.cached);
	}

	// ── Derived colors ───────────────────────────────────────────────────

	/// Merges the colors behind two handles and interns the result.
	pub fn merge(
		&mut self,
		a: &DlColor,
		b: &DlColor,
		action: MergeAction,
	) -> Result<DlColor, ColorError> {
		let merged = PackedColor::merge(self.get(a)?, self.get(b)?, action)?;
		self.intern(&merged)
	}

	/// Interpolates across the colors behind several handles.
	pub fn interpolate(
		&mut self,
		weights: &[f32],
		srcs: &[&DlColor],
	) -> Result<DlColor, ColorError> {
		let packed: Vec<&PackedColor> =
			srcs.iter().map(|d| self.get(d)).collect::<Result<_, _>>()?;
		let out = PackedColor::interpolate(weights, &packed)?;
		self.intern(&out)
	}

	/// Rebuilds the color behind a handle without one colorant.
	pub fn remove_colorant(
		&mut self,
		dlc: &DlColor,
		ci: ColorantIndex,
	) -> Result<DlColor, ColorError> {
		let out = self.get(dlc)?.remove_colorant(ci)?;
		self.intern(&out)
	}

	/// Strips channels holding the transparent sentinel.
	pub fn remove_overprinted(&mut self, dlc: &DlColor) -> Result<DlColor, ColorError> {
		let out = self.get(dlc)?.remove_overprinted()?;
		self.intern(&out)
	}
}

#[cfg(test)]
mod tests;
