//! A single image's block store.

use bitflags::bitflags;
use log::trace;
use ripple_types::sample::SampleStyle;
use ripple_types::IBBox;

use crate::bitvec::BitVec;
use crate::blist::BlistPool;
use crate::block::{Block, BlockStorage};
use crate::error::StoreError;
use crate::pagefile::PageFile;
use crate::plane::Plane;

/// Default block geometry: 128 bytes wide, 128 rows high.
pub(crate) const BLOCK_DEFAULT_WIDTH: usize = 128;
/// Default block height in rows.
pub(crate) const BLOCK_DEFAULT_HEIGHT: usize = 128;
/// Default block payload size in bytes.
pub(crate) const BLOCK_DEFAULT_SIZE: usize = BLOCK_DEFAULT_WIDTH * BLOCK_DEFAULT_HEIGHT;

/// Blocks below this size are not worth compressing.
pub(crate) const MIN_COMPRESSION_SIZE: usize = 4096;
/// Blocks below this size are not worth paging to disk.
pub(crate) const MIN_WRITETODISK_SIZE: usize = 4096;

bitflags! {
	/// Behaviour flags fixed at store open.
	#[derive(Debug, Clone, Copy, PartialEq, Eq)]
	pub struct StoreFlags: u32 {
		/// Coordinates arrive transposed; written in columns.
		const XY_SWAP = 0x01;
		/// Track exact row repeats.
		const ROW_REPEATS = 0x02;
		/// Track nearly-identical rows; runs are decimated at close.
		const ROW_REPEATS_NEAR = 0x04;
		/// Cap nearly-same runs at two rows instead of four.
		const ROW_REPEATS_2ROWS = 0x08;
		/// Recycled for image adjustment rather than freshly opened.
		const RECYCLED = 0x10;
	}
}

/// The next eviction step a store is eligible for.
///
/// Close advances `OpenForWriting` to the first applicable eviction
/// action; memory pressure then walks the rest of the progression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(usize)]
pub enum StoreAction {
	/// Still accepting sample writes.
	OpenForWriting = 0,
	/// Rows can still be compressed in memory.
	Compression = 1,
	/// Compression exhausted; staging buffers can migrate to the pool.
	ShareBlists1 = 2,
	/// Rows can be paged out to the scratch file.
	WriteToDisk = 3,
	/// Disk purge exhausted; remaining buffers can migrate.
	ShareBlists2 = 4,
	/// Nothing left to reclaim.
	NothingMore = 5,
}

/// Number of action states (list slots in the shared buckets).
pub(crate) const N_ACTIONS: usize = 6;

impl StoreAction {
	/// Rank for merging two stores' actions: a store that still has
	/// eviction potential dominates one that has none.
	pub(crate) fn merge_rank(self) -> u8 {
		match self {
			StoreAction::OpenForWriting => 0,
			StoreAction::NothingMore => 1,
			StoreAction::Compression => 2,
			StoreAction::ShareBlists1 => 3,
			StoreAction::WriteToDisk => 4,
			StoreAction::ShareBlists2 => 5,
		}
	}
}

/// Which purge work a low-memory tier performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PurgeKind {
	Compress,
	WriteToDisk,
}

/// A paged, compressing store for one image's sample data.
#[derive(Debug)]
pub struct Store {
	pub(crate) flags: StoreFlags,
	pub(crate) style: SampleStyle,
	pub(crate) bpp: u8,
	pub(crate) bpps: u8,

	/// Original image-space bounding box.
	pub(crate) obbox: IBBox,
	/// Trimmed bounding box; only ever tightens.
	pub(crate) tbbox: IBBox,

	/// Block width in bytes.
	pub(crate) block_width: usize,
	/// Block height in rows.
	pub(crate) block_height: usize,
	pub(crate) xblock: usize,
	pub(crate) yblock: usize,
	pub(crate) nblocks: usize,
	/// Full-block payload bytes; the shared bucket key.
	pub(crate) abytes: usize,

	pub(crate) planes: Vec<Option<Plane>>,
	pub(crate) row_repeats: Option<BitVec>,

	pub(crate) action: StoreAction,
	pub(crate) open_for_writing: bool,
	/// Some data was evicted at least once.
	pub(crate) purged: bool,
	/// In low memory: purge each row as soon as it completes.
	pub(crate) blist_purge_row: bool,

	/// Reserved pool chunks guaranteeing preconversion can't fail mid-render.
	pub(crate) reserves: Vec<Vec<u8>>,
	/// Staging buffer for transposed writes.
	pub(crate) swapmem: Option<Vec<u8>>,
}

impl Store {
	/// Lays out a store for the given image-space bbox and depth.
	pub(crate) fn new(bbox: IBBox, nplanes: usize, bpp: u8, flags: StoreFlags) -> Self {
		debug_assert!(!bbox.is_empty(), "store bbox must not be empty");
		debug_assert!(nplanes > 0, "store needs at least one plane");
		debug_assert!(
			matches!(bpp, 1 | 2 | 4 | 8 | 16 | 32),
			"unsupported bits per pixel"
		);

		let bpps = bpp.trailing_zeros() as u8;
		let xsize_bytes = Self::to_bytes_with(bpps, bbox.width() as usize);
		let ysize = bbox.height() as usize;

		let block_width = BLOCK_DEFAULT_WIDTH;
		let block_height = BLOCK_DEFAULT_HEIGHT;
		let xblock = xsize_bytes.div_ceil(block_width);
		let yblock = ysize.div_ceil(block_height);
		// Stores narrower or shorter than a block allocate truncated
		// payloads; the shared context buckets them by this size.
		let abytes = block_width.min(xsize_bytes) * block_height.min(ysize);

		let style = match bpp {
			32 => SampleStyle::Flt0To1,
			_ => SampleStyle::Bytes,
		};

		// Transposed stores receive columns, so row repeats cannot be
		// tested as the data arrives.
		let track_repeats = flags
			.intersects(StoreFlags::ROW_REPEATS | StoreFlags::ROW_REPEATS_NEAR)
			&& !flags.contains(StoreFlags::XY_SWAP);
		let row_repeats = track_repeats.then(|| {
			let mut bv = BitVec::ones(ysize);
			// The first row of each block row can't repeat across the block
			// boundary; clearing it confines testing to rows of blocks.
			let mut y = 0;
			while y < ysize {
				bv.clear(y);
				y += block_height;
			}
			bv
		});

		let swapmem = flags
			.contains(StoreFlags::XY_SWAP)
			.then(|| vec![0u8; block_width * block_height]);

		Self {
			flags,
			style,
			bpp,
			bpps,
			obbox: bbox,
			tbbox: bbox,
			block_width,
			block_height,
			xblock,
			yblock,
			nblocks: xblock * yblock,
			abytes,
			planes: (0..nplanes).map(|_| None).collect(),
			row_repeats,
			// Nothing purgeable until data has been written.
			action: StoreAction::NothingMore,
			open_for_writing: true,
			purged: false,
			blist_purge_row: false,
			reserves: Vec::new(),
			swapmem,
		}
	}

	// ── Geometry ─────────────────────────────────────────────────────────

	fn to_bytes_with(bpps: u8, pixels: usize) -> usize {
		((pixels << bpps) + 7) >> 3
	}

	/// Pixel x to byte x.
	pub(crate) fn x_to_bytes(&self, x: usize) -> usize {
		(x << self.bpps) >> 3
	}

	fn bytes_to_pixels(&self, bytes: usize) -> usize {
		(bytes << 3) >> self.bpps
	}

	pub(crate) fn index_bx(&self, xb: usize) -> usize {
		xb / self.block_width
	}

	pub(crate) fn index_by(&self, y: usize) -> usize {
		y / self.block_height
	}

	fn index_xi(&self, xb: usize) -> usize {
		xb % self.block_width
	}

	fn index_yi(&self, y: usize) -> usize {
		y % self.block_height
	}

	fn block_index(&self, bx: usize, by: usize) -> usize {
		debug_assert!(bx < self.xblock && by < self.yblock, "block out of range");
		by * self.xblock + bx
	}

	/// Geometry of the block at grid position, truncated at the edges.
	fn block_geometry(&self, bx: usize, by: usize) -> (usize, usize) {
		let xsize_bytes = self.x_to_bytes(self.obbox.width() as usize);
		let ysize = self.obbox.height() as usize;
		let width = self.block_width.min(xsize_bytes - bx * self.block_width);
		let height = self.block_height.min(ysize - by * self.block_height);
		(width, height)
	}

	/// Full row length in bytes.
	pub(crate) fn row_bytes(&self) -> usize {
		self.x_to_bytes(self.obbox.width() as usize)
	}

	/// The original bounding box.
	pub fn bbox_original(&self) -> IBBox {
		self.obbox
	}

	/// The current trimmed bounding box.
	pub fn bbox_trimmed(&self) -> IBBox {
		self.tbbox
	}

	/// Bits per pixel.
	pub fn bpp(&self) -> u8 {
		self.bpp
	}

	/// Number of plane slots.
	pub fn nplanes(&self) -> usize {
		self.planes.len()
	}

	/// True when the plane holds data (recombine knockout test).
	pub fn plane_exists(&self, planei: usize) -> bool {
		planei < self.planes.len() && self.planes[planei].is_some()
	}

	/// The store's behaviour flags.
	pub fn flags(&self) -> StoreFlags {
		self.flags
	}

	/// The current eviction action.
	pub fn action(&self) -> StoreAction {
		self.action
	}

	/// Blocks per plane.
	pub fn nblocks(&self) -> usize {
		self.nblocks
	}

	/// Bytes of sample data currently resident across all planes.
	pub fn resident_bytes(&self) -> usize {
		self.planes.iter().flatten().map(Plane::resident_bytes).sum()
	}

	/// True when any data has ever been evicted from this store.
	pub fn was_purged(&self) -> bool {
		self.purged
	}

	// ── Planes and blocks ────────────────────────────────────────────────

	pub(crate) fn ensure_plane(&mut self, planei: usize) -> Result<&mut Plane, StoreError> {
		if planei >= self.planes.len() {
			return Err(StoreError::NoSuchPlane(planei));
		}
		if self.planes[planei].is_none() {
			let mut plane = Plane::new(self.nblocks);
			plane.n_desired_blists = self.xblock.min(self.nblocks);
			self.planes[planei] = Some(plane);
		}
		Ok(self.planes[planei].as_mut().expect("plane just created"))
	}

	fn ensure_block(
		&mut self,
		planei: usize,
		bx: usize,
		by: usize,
		pool: Option<&mut BlistPool>,
	) -> Result<(), StoreError> {
		let (width, height) = self.block_geometry(bx, by);
		let bb = self.block_index(bx, by);
		let plane = self.ensure_plane(planei)?;
		if plane.blocks[bb].is_none() {
			let block = match pool {
				Some(pool) => Block::from_buffer(width, height, pool.take(width * height)),
				None => Block::new(width, height),
			};
			plane.blocks[bb] = Some(block);
		}
		Ok(())
	}

	/// Pre-allocates the first row of blocks for a plane (or all planes),
	/// so the hot interpret-and-write loop takes no allocation faults for
	/// its initial scanline batch.
	pub(crate) fn prealloc(
		&mut self,
		planei: Option<usize>,
		n_samples: usize,
		mut pool: Option<&mut BlistPool>,
	) -> Result<(), StoreError> {
		let mut nbytes = Self::to_bytes_with(self.bpps, n_samples);
		let planes: Vec<usize> = match planei {
			Some(p) => vec![p],
			None => (0..self.planes.len()).collect(),
		};
		let mut bx = 0;
		while bx < self.xblock {
			for &p in &planes {
				self.ensure_block(p, bx, 0, pool.as_deref_mut())?;
			}
			let (width, _) = self.block_geometry(bx, 0);
			nbytes = nbytes.saturating_sub(width);
			if nbytes == 0 {
				break;
			}
			bx += 1;
		}
		Ok(())
	}

	// ── Writing ──────────────────────────────────────────────────────────

	/// Writes one full image row of a plane.
	///
	/// `y` is in image space; `data` holds the row's bytes after depth
	/// scaling. Completes blocks as their last rows land and performs
	/// row-repeat testing against the previous row. Returns true when the
	/// write completed the final row of a block row.
	pub(crate) fn write_row(
		&mut self,
		planei: usize,
		y: i32,
		data: &[u8],
		mut pool: Option<&mut BlistPool>,
	) -> Result<bool, StoreError> {
		if !self.open_for_writing {
			return Err(StoreError::NotWritable);
		}
		if y < self.obbox.y1 || y > self.obbox.y2 {
			return Err(StoreError::OutOfBounds {
				x: self.obbox.x1,
				y,
			});
		}
		let row_bytes = self.row_bytes();
		debug_assert_eq!(data.len(), row_bytes, "row length mismatch");

		let yy = (y - self.obbox.y1) as usize;
		let by = self.index_by(yy);
		let yi = self.index_yi(yy);

		// Repeat testing first, against the still-resident previous row.
		if self.row_repeats.is_some() && yi != 0 {
			let mut repeat = true;
			if let Ok(prev) = self.read_row_resident(planei, yy - 1) {
				repeat = prev == data;
			}
			if !repeat
				&& let Some(bv) = &mut self.row_repeats
			{
				bv.clear(yy);
			}
		}

		let mut offset = 0usize;
		let mut completed = false;
		for bx in 0..self.xblock {
			self.ensure_block(planei, bx, by, pool.as_deref_mut())?;
			let bb = self.block_index(bx, by);
			let (width, height) = self.block_geometry(bx, by);
			let plane = self.planes[planei].as_mut().expect("plane ensured above");
			let block = plane.blocks[bb].as_mut().expect("block ensured above");
			let BlockStorage::Memory(buf) = &mut block.storage else {
				// A block already purged cannot take more writes; fault it
				// back first. Open stores only purge completed rows, so
				// this indicates a writer revisiting old rows.
				return Err(StoreError::NotWritable);
			};
			let chunk = &data[offset..offset + width];
			buf[yi * width..(yi + 1) * width].copy_from_slice(chunk);
			offset += width;
			if yi + 1 == height {
				block.write_complete = true;
				completed = true;
			}
		}
		Ok(completed)
	}

	/// Writes one byte-column of a transposed (`XY_SWAP`) plane.
	///
	/// `x` is the column in image space, `data` one byte per image row.
	/// The column is staged through the swap buffer a block at a time and
	/// scattered into the block rows; writing the final column of a block
	/// completes it. Returns true when this column completed blocks.
	pub(crate) fn write_column(
		&mut self,
		planei: usize,
		x: i32,
		data: &[u8],
		mut pool: Option<&mut BlistPool>,
	) -> Result<bool, StoreError> {
		if !self.open_for_writing {
			return Err(StoreError::NotWritable);
		}
		debug_assert!(
			self.flags.contains(StoreFlags::XY_SWAP),
			"column writes are for transposed stores"
		);
		if x < self.obbox.x1 || x > self.obbox.x2 {
			return Err(StoreError::OutOfBounds {
				x,
				y: self.obbox.y1,
			});
		}
		debug_assert_eq!(data.len(), self.obbox.height() as usize, "column length mismatch");

		let xb = self.x_to_bytes((x - self.obbox.x1) as usize);
		let bx = self.index_bx(xb);
		let xi = self.index_xi(xb);
		let mut completed = false;

		for by in 0..self.yblock {
			self.ensure_block(planei, bx, by, pool.as_deref_mut())?;
			let bb = self.block_index(bx, by);
			let (_, height) = self.block_geometry(bx, by);
			let segment = &data[by * self.block_height..by * self.block_height + height];

			let swap = self.swapmem.as_mut().expect("transposed store has a swap buffer");
			swap[..height].copy_from_slice(segment);

			let plane = self.planes[planei].as_mut().expect("plane ensured above");
			let block = plane.blocks[bb].as_mut().expect("block ensured above");
			let width = block.width;
			let BlockStorage::Memory(buf) = &mut block.storage else {
				return Err(StoreError::NotWritable);
			};
			for (yi, &byte) in swap[..height].iter().enumerate() {
				buf[yi * width + xi] = byte;
			}
			if xi + 1 == width {
				block.write_complete = true;
				completed = true;
			}
		}
		Ok(completed)
	}

	/// A resident row, for repeat testing; fails if any block is evicted.
	fn read_row_resident(&self, planei: usize, yy: usize) -> Result<Vec<u8>, StoreError> {
		let plane = self.planes[planei].as_ref().ok_or(StoreError::NoSuchPlane(planei))?;
		let by = self.index_by(yy);
		let yi = self.index_yi(yy);
		let mut row = Vec::with_capacity(self.row_bytes());
		for bx in 0..self.xblock {
			let bb = self.block_index(bx, by);
			let (width, _) = self.block_geometry(bx, by);
			match plane.blocks[bb].as_ref().map(Block::storage) {
				Some(BlockStorage::Memory(buf)) => {
					row.extend_from_slice(&buf[yi * width..(yi + 1) * width]);
				}
				_ => return Err(StoreError::NotWritable),
			}
		}
		Ok(row)
	}

	// ── Reading ──────────────────────────────────────────────────────────

	/// Reads a run of samples at `(x, y)` within a plane.
	///
	/// Faults the containing block back into memory when needed and
	/// returns the bytes from `x` to the end of the block row, plus the
	/// number of pixels they cover.
	pub(crate) fn read_run(
		&mut self,
		planei: usize,
		x: i32,
		y: i32,
		file: &mut PageFile,
		pool: Option<&mut BlistPool>,
	) -> Result<(&[u8], usize), StoreError> {
		if !self.tbbox.contains_point(x, y) {
			return Err(StoreError::OutOfBounds {
				x,
				y,
			});
		}

		let xb = self.x_to_bytes((x - self.obbox.x1) as usize);
		let yy = (y - self.obbox.y1) as usize;
		let bx = self.index_bx(xb);
		let by = self.index_by(yy);
		let xi = self.index_xi(xb);
		let yi = self.index_yi(yy);

		self.ensure_block(planei, bx, by, pool)?;
		let bb = self.block_index(bx, by);
		let bpp = self.bpp;
		let bpps = self.bpps;
		let plane = self.planes[planei].as_mut().expect("plane ensured above");
		let block = plane.blocks[bb].as_mut().expect("block ensured above");
		block.fault_in(bpp, Some(file))?;

		let width = block.width;
		let BlockStorage::Memory(buf) = block.storage() else {
			unreachable!("fault_in leaves the block in memory");
		};
		let run = &buf[yi * width + xi..(yi + 1) * width];
		let pixels = (run.len() << 3) >> bpps;
		Ok((run, pixels))
	}

	/// Number of consecutive rows equal to row `y`, itself included.
	pub fn read_nrows(&self, y: i32) -> usize {
		debug_assert!(y >= self.obbox.y1 && y <= self.obbox.y2);
		let mut nrows = 1;
		if let Some(bv) = &self.row_repeats {
			let mut yy = (y - self.obbox.y1) as usize;
			while yy + 1 < bv.len() && bv.is_set(yy + 1) {
				yy += 1;
				nrows += 1;
			}
		}
		nrows
	}

	/// True when row `y` repeats row `y - 1`.
	pub fn is_row_repeat(&self, y: i32) -> bool {
		debug_assert!(y >= self.obbox.y1 && y <= self.obbox.y2);
		self.row_repeats
			.as_ref()
			.is_some_and(|bv| bv.is_set((y - self.obbox.y1) as usize))
	}

	// ── Close ────────────────────────────────────────────────────────────

	/// Eligibility tests for the two eviction tiers.
	pub(crate) fn can_compress(&self, compress_allowed: bool) -> bool {
		self.abytes >= MIN_COMPRESSION_SIZE
			&& compress_allowed
			&& matches!(self.bpp, 8 | 32)
	}

	pub(crate) fn can_write_to_disk(&self, disk_allowed: bool) -> bool {
		self.abytes >= MIN_WRITETODISK_SIZE && disk_allowed
	}

	/// Advances the action, either at close or when a tier is exhausted.
	pub(crate) fn set_action(&mut self, close: bool, compress_allowed: bool, disk_allowed: bool) {
		if close {
			if self.can_compress(compress_allowed) {
				self.action = StoreAction::Compression;
			} else if self.can_write_to_disk(disk_allowed) {
				self.action = StoreAction::WriteToDisk;
			}
		} else if self.action == StoreAction::Compression {
			self.action = if self.can_write_to_disk(disk_allowed) {
				StoreAction::WriteToDisk
			} else {
				StoreAction::NothingMore
			};
		} else if self.action == StoreAction::NothingMore {
			if self.can_compress(compress_allowed) {
				self.action = StoreAction::ShareBlists1;
			} else if self.can_write_to_disk(disk_allowed) {
				self.action = StoreAction::ShareBlists2;
			}
		}
	}

	/// Marks remaining blocks complete and applies repeat-run decimation.
	///
	/// Returns true when some blocks never saw their final row (incomplete
	/// image data; rendered as-is).
	pub(crate) fn finish_writing(&mut self) -> bool {
		let mut incomplete = false;
		for plane in self.planes.iter_mut().flatten() {
			for block in plane.blocks.iter_mut().flatten() {
				if !block.write_complete {
					incomplete = true;
					block.write_complete = true;
				}
			}
		}
		self.open_for_writing = false;
		self.blist_purge_row = false;

		// Nearly-the-same-rows mode caps run lengths so small per-row
		// differences cannot accumulate.
		if self.flags.contains(StoreFlags::ROW_REPEATS_NEAR)
			&& let Some(bv) = &mut self.row_repeats
		{
			let cap = if self.flags.contains(StoreFlags::ROW_REPEATS_2ROWS) { 2 } else { 4 };
			let mut run = 0;
			for y in 0..bv.len() {
				if bv.is_set(y) {
					run += 1;
					if run >= cap {
						bv.clear(y);
						run = 0;
					}
				} else {
					run = 0;
				}
			}
		}
		incomplete
	}

	// ── Eviction ─────────────────────────────────────────────────────────

	/// Purges rows of blocks for one tier.
	///
	/// Processes each plane from its tier cursor, at least `min_per_plane`
	/// blocks per plane when possible. Returns blocks purged.
	pub(crate) fn purge_rows(
		&mut self,
		kind: PurgeKind,
		min_per_plane: usize,
		file: &mut PageFile,
		released: &mut Vec<Vec<u8>>,
	) -> Result<usize, StoreError> {
		let mut purged_total = 0usize;
		let style = self.style;
		let bpp = self.bpp;
		let yblock = self.yblock;
		let xblock = self.xblock;

		for plane in self.planes.iter_mut().flatten() {
			let mut purged_this_plane = 0usize;
			let mut y = match kind {
				PurgeKind::Compress => plane.y_compressed,
				PurgeKind::WriteToDisk => plane.y_purged,
			};

			while y < yblock && purged_this_plane < min_per_plane {
				let mut row_fully_done = true;
				let range = y * xblock..(y + 1) * xblock;
				for block in plane.blocks[range].iter_mut().flatten() {
					if !block.purgeable() {
						row_fully_done = false;
						continue;
					}
					let freed = match kind {
						PurgeKind::Compress => {
							if matches!(block.storage(), BlockStorage::Memory(_)) {
								block.compress(style, bpp)?
							} else {
								None
							}
						}
						PurgeKind::WriteToDisk => match block.storage() {
							BlockStorage::Memory(_) | BlockStorage::Compressed(_) => {
								block.write_to_disk(file)?
							}
							_ => None,
						},
					};
					let moved = freed.is_some();
					if let Some(buf) = freed {
						released.push(buf);
					}
					if moved {
						purged_this_plane += 1;
					}
					match (kind, block.storage()) {
						(PurgeKind::Compress, BlockStorage::Memory(_)) => {
							if !block.incompressible {
								row_fully_done = false;
							}
						}
						(PurgeKind::WriteToDisk, BlockStorage::Memory(_))
						| (PurgeKind::WriteToDisk, BlockStorage::Compressed(_)) => {
							row_fully_done = false;
						}
						_ => {}
					}
				}
				if row_fully_done {
					match kind {
						PurgeKind::Compress => plane.y_compressed = y + 1,
						PurgeKind::WriteToDisk => plane.y_purged = y + 1,
					}
				}
				y += 1;
			}
			purged_total += purged_this_plane;
		}

		if purged_total > 0 {
			self.purged = true;
			trace!("store purged {purged_total} blocks ({kind:?})");
		}
		Ok(purged_total)
	}

	// ── Trimming ─────────────────────────────────────────────────────────

	/// Tightens the trimmed bbox, freeing only whole block columns and
	/// rows that fall completely outside the new box.
	pub(crate) fn trim(&mut self, ibbox: IBBox) {
		debug_assert!(self.tbbox.contains(&ibbox), "trim box outside current trim");
		debug_assert!(!ibbox.is_empty(), "trim box is empty");

		if ibbox.x1 > self.tbbox.x1 || ibbox.x2 < self.tbbox.x2 {
			self.trim_x(ibbox.x1, ibbox.x2);
		}
		if ibbox.y1 > self.tbbox.y1 || ibbox.y2 < self.tbbox.y2 {
			self.trim_y(ibbox.x1, ibbox.x2, ibbox.y1, ibbox.y2);
		}
	}

	fn free_block_column(&mut self, bx: usize) {
		for by in 0..self.yblock {
			let bb = self.block_index(bx, by);
			for plane in self.planes.iter_mut().flatten() {
				plane.blocks[bb] = None;
			}
		}
	}

	fn free_block_row(&mut self, by: usize, bx1: usize, bx2: usize) {
		for bx in bx1..=bx2 {
			let bb = self.block_index(bx, by);
			for plane in self.planes.iter_mut().flatten() {
				plane.blocks[bb] = None;
			}
		}
	}

	fn trim_x(&mut self, x1: i32, x2: i32) {
		let bx1 = self.index_bx(self.x_to_bytes((x1 - self.obbox.x1) as usize));
		let bx2 = self.index_bx(self.x_to_bytes((x2 - self.obbox.x1) as usize));
		let tx1 = self.index_bx(self.x_to_bytes((self.tbbox.x1 - self.obbox.x1) as usize));
		let tx2 = self.index_bx(self.x_to_bytes((self.tbbox.x2 - self.obbox.x1) as usize));

		// Whole columns left of x1 not already trimmed.
		for bx in tx1..bx1 {
			self.free_block_column(bx);
			let (width, _) = self.block_geometry(bx, 0);
			self.tbbox.x1 += self.bytes_to_pixels(width) as i32;
		}
		// Whole columns right of x2.
		if bx2 < tx2 {
			for bx in bx2 + 1..=tx2 {
				self.free_block_column(bx);
				let (width, _) = self.block_geometry(bx, 0);
				self.tbbox.x2 -= self.bytes_to_pixels(width) as i32;
			}
		}
		debug_assert!(!self.tbbox.is_empty(), "image trimmed completely away");
	}

	fn trim_y(&mut self, x1: i32, x2: i32, y1: i32, y2: i32) {
		let by1 = self.index_by((y1 - self.obbox.y1) as usize);
		let by2 = self.index_by((y2 - self.obbox.y1) as usize);
		let ty1 = self.index_by((self.tbbox.y1 - self.obbox.y1) as usize);
		let ty2 = self.index_by((self.tbbox.y2 - self.obbox.y1) as usize);

		let bx1 = self.index_bx(self.x_to_bytes((x1 - self.obbox.x1) as usize));
		let bx2 = self.index_bx(self.x_to_bytes((x2 - self.obbox.x1) as usize));

		for by in ty1..by1 {
			self.free_block_row(by, bx1, bx2);
			let (_, height) = self.block_geometry(0, by);
			self.tbbox.y1 += height as i32;
		}
		if by2 < ty2 {
			for by in by2 + 1..=ty2 {
				self.free_block_row(by, bx1, bx2);
				let (_, height) = self.block_geometry(0, by);
				self.tbbox.y2 -= height as i32;
			}
		}
		debug_assert!(!self.tbbox.is_empty(), "image trimmed completely away");
	}

	// ── Uniform detection ────────────────────────────────────────────────

	/// Tests whether an entire plane is one color.
	///
	/// Block buffers are retained: image adjustment may still reuse the
	/// store, which needs the sample data present.
	pub fn plane_uniform_color(&mut self, planei: usize) -> Option<u16> {
		let bpp = self.bpp;
		let plane = self.planes.get_mut(planei)?.as_mut()?;
		let mut uniform: Option<u16> = None;
		for block in plane.blocks.iter_mut() {
			// Null blocks result from trimming.
			let Some(block) = block else { continue };
			let cv = block.uniform(bpp, false)?;

			// Sub-byte depths pack several samples per byte; every sample
			// within the packed byte must match.
			let cv = if bpp < 8 {
				let single = cv & ((1 << bpp) - 1);
				let mut repack = single;
				let mut width = bpp;
				while width < 8 {
					repack = repack << width | repack;
					width *= 2;
				}
				if repack != cv {
					return None;
				}
				single
			} else {
				cv
			};

			match uniform {
				None => uniform = Some(cv),
				Some(prev) if prev != cv => return None,
				Some(_) => {}
			}
		}
		uniform
	}

	/// Uniform state of every block of a single-plane store, with each
	/// block's image-space box.
	pub fn uniform_boxes(&mut self) -> Vec<(IBBox, Option<u16>)> {
		debug_assert_eq!(self.planes.len(), 1, "uniform boxes expect one plane");
		let bpp = self.bpp;
		let mut out = Vec::with_capacity(self.nblocks);
		for bb in 0..self.nblocks {
			let bx = bb % self.xblock;
			let by = bb / self.xblock;
			let (width, height) = self.block_geometry(bx, by);
			let bbox = IBBox::new(
				self.obbox.x1 + self.bytes_to_pixels(bx * self.block_width) as i32,
				self.obbox.y1 + (by * self.block_height) as i32,
				self.obbox.x1
					+ self.bytes_to_pixels(bx * self.block_width + width) as i32
					- 1,
				self.obbox.y1 + (by * self.block_height + height) as i32 - 1,
			);
			let uniform = self.planes[0]
				.as_mut()
				.and_then(|p| p.blocks[bb].as_mut())
				.and_then(|b| b.uniform(bpp, false));
			out.push((bbox, uniform));
		}
		out
	}

	// ── Reserves ─────────────────────────────────────────────────────────

	/// Reserves pool memory so preconversion cannot fail mid-render:
	/// one block handle plus one block payload per block, in chunks.
	pub(crate) fn preconvert_reserve(&mut self) -> Result<(), StoreError> {
		let total = (std::mem::size_of::<Block>() + self.abytes) * self.nblocks;
		let mut remaining = total;
		while remaining > 0 {
			let chunk = remaining.min(BLOCK_DEFAULT_SIZE * 4);
			self.reserves.push(vec![0u8; chunk]);
			remaining -= chunk;
		}
		Ok(())
	}

	/// Releases the preconversion reserves.
	pub(crate) fn release_reserves(&mut self) {
		self.reserves.clear();
	}

	/// True when reserves are installed.
	pub fn have_reserves(&self) -> bool {
		!self.reserves.is_empty()
	}
}
