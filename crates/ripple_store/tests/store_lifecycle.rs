//! Image store lifecycle tests: write/read round trips, row repeats,
//! trimming, merging and the low-memory tiers.

use test_log::test;

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use ripple_store::{
	ImageStoreSet, MemoryTier, StoreAction, StoreFlags, StoreKey, StorePolicy,
};
use ripple_types::IBBox;

fn set() -> ImageStoreSet {
	ImageStoreSet::new(StorePolicy::default(), None)
}

/// Fills a one-plane 8bpp store with deterministic rows.
fn fill_store(set: &ImageStoreSet, bbox: IBBox, seed: u64) -> (StoreKey, Vec<Vec<u8>>) {
	let mut rng = SmallRng::seed_from_u64(seed);
	let mut shared = set.lock();
	let key = shared.open(bbox, 1, 8, StoreFlags::ROW_REPEATS).unwrap();

	let width = bbox.width() as usize;
	let mut rows = Vec::new();
	for y in bbox.y1..=bbox.y2 {
		let row: Vec<u8> = (0..width).map(|_| rng.random()).collect();
		shared.write_row(key, 0, y, &row).unwrap();
		rows.push(row);
	}
	shared.close(key).unwrap();
	(key, rows)
}

fn read_row(set: &ImageStoreSet, key: StoreKey, y: i32, width: usize) -> Vec<u8> {
	let mut shared = set.lock();
	let mut out = Vec::with_capacity(width);
	let mut x = 0i32;
	while (x as usize) < width {
		let (run, pixels) = shared.read_run(key, 0, x, y).unwrap();
		out.extend_from_slice(run);
		x += pixels as i32;
	}
	out.truncate(width);
	out
}

#[test]
fn test_write_then_read_back() {
	let set = set();
	let bbox = IBBox::new(0, 0, 255, 255);
	let (key, rows) = fill_store(&set, bbox, 0xBEEF);

	for (i, row) in rows.iter().enumerate() {
		assert_eq!(&read_row(&set, key, i as i32, 256), row, "row {i}");
	}
}

#[test]
fn test_row_repeat_detection() {
	let set = set();
	let bbox = IBBox::new(0, 0, 127, 63);
	let mut shared = set.lock();
	let key = shared.open(bbox, 1, 8, StoreFlags::ROW_REPEATS).unwrap();

	// Rows 0..32 identical, rows 32..64 alternating.
	let flat = vec![0x55u8; 128];
	for y in 0..32 {
		shared.write_row(key, 0, y, &flat).unwrap();
	}
	for y in 32..64 {
		let row = vec![y as u8; 128];
		shared.write_row(key, 0, y, &row).unwrap();
	}
	shared.close(key).unwrap();

	let store = shared.store(key).unwrap();
	// Repeats inside the flat run (row 0 is a block-row start).
	assert!(!store.is_row_repeat(0));
	for y in 1..32 {
		assert!(store.is_row_repeat(y), "row {y} should repeat");
	}
	for y in 32..64 {
		assert!(!store.is_row_repeat(y), "row {y} should not repeat");
	}
	assert_eq!(store.read_nrows(0), 32);
	assert_eq!(store.read_nrows(40), 1);
}

#[test]
fn test_close_advances_action() {
	let set = set();
	let bbox = IBBox::new(0, 0, 255, 255);
	let (key, _) = fill_store(&set, bbox, 1);

	let shared = set.lock();
	assert_eq!(shared.store(key).unwrap().action(), StoreAction::Compression);
	assert!(shared.blocks_at_action(StoreAction::Compression) > 0);
}

#[test]
fn test_lowmem_ram_tier_compresses_and_preserves_data() {
	let set = set();
	let bbox = IBBox::new(0, 0, 255, 255);

	// Compressible content: constant rows.
	let key = {
		let mut shared = set.lock();
		let key = shared.open(bbox, 1, 8, StoreFlags::empty()).unwrap();
		for y in 0..=255 {
			let row = vec![(y / 8) as u8; 256];
			shared.write_row(key, 0, y, &row).unwrap();
		}
		shared.close(key).unwrap();
		key
	};

	let blocks_before = set.lock().blocks_at_action(StoreAction::Compression);
	assert!(blocks_before > 0);

	// Solicit then release one megabyte.
	let estimate = set.lowmem_solicit(MemoryTier::Ram).unwrap();
	assert!(estimate > 0);
	let resident_before = set.lock().store(key).unwrap().resident_bytes();
	assert!(set.lowmem_release(MemoryTier::Ram, 1 << 20).unwrap());
	let resident_after = set.lock().store(key).unwrap().resident_bytes();
	assert!(resident_after < resident_before, "release must shrink residency");

	// Reads still return the written values.
	for y in [0, 100, 255] {
		let row = read_row(&set, key, y, 256);
		assert!(row.iter().all(|&b| b == (y / 8) as u8));
	}
}

#[test]
fn test_lowmem_disk_tier_pages_out() {
	let set = set();
	let bbox = IBBox::new(0, 0, 255, 255);
	let (key, rows) = fill_store(&set, bbox, 0xD15C);

	// Random data will not compress; the RAM tier exhausts into the disk
	// progression, then the disk tier pages blocks out.
	set.lowmem_release(MemoryTier::Ram, 1 << 20).unwrap();
	assert!(set.lowmem_release(MemoryTier::Disk, 1 << 20).unwrap());

	{
		let shared = set.lock();
		let store = shared.store(key).unwrap();
		assert!(store.resident_bytes() < 256 * 256);
	}

	// Reads fault blocks back in from the scratch file.
	for (i, row) in rows.iter().enumerate().step_by(37) {
		assert_eq!(&read_row(&set, key, i as i32, 256), row, "row {i}");
	}
}

#[test]
fn test_trim_monotonic_and_reads_inside() {
	let set = set();
	let bbox = IBBox::new(0, 0, 511, 511);
	let (key, rows) = fill_store(&set, bbox, 0x7217);

	let mut shared = set.lock();
	let before = shared.store(key).unwrap().bbox_trimmed();
	let trim_to = IBBox::new(130, 130, 380, 380);
	shared.trim(key, trim_to).unwrap();
	let after = shared.store(key).unwrap().bbox_trimmed();

	assert!(before.contains(&after));
	assert!(after.contains(&trim_to));

	// A second, tighter trim stays monotonic.
	shared.trim(key, IBBox::new(260, 260, 380, 380)).unwrap();
	let tighter = shared.store(key).unwrap().bbox_trimmed();
	assert!(after.contains(&tighter));
	drop(shared);

	// Reads inside the trimmed box still work.
	let y = 300usize;
	let mut shared = set.lock();
	let (run, _) = shared.read_run(key, 0, 300, y as i32).unwrap();
	let expected = &rows[y][300..300 + run.len()];
	assert_eq!(run, expected);
}

#[test]
fn test_merge_moves_planes() {
	let set = set();
	let bbox = IBBox::new(0, 0, 127, 127);
	let mut shared = set.lock();

	let a = shared.open(bbox, 2, 8, StoreFlags::empty()).unwrap();
	let b = shared.open(bbox, 2, 8, StoreFlags::empty()).unwrap();
	let row0 = vec![0x11u8; 128];
	let row1 = vec![0x22u8; 128];
	for y in 0..128 {
		shared.write_row(a, 0, y, &row0).unwrap();
		shared.write_row(b, 1, y, &row1).unwrap();
	}
	shared.close(a).unwrap();
	shared.close(b).unwrap();

	shared.merge(b, a).unwrap();
	assert!(shared.store(a).unwrap().plane_exists(0));
	assert!(shared.store(a).unwrap().plane_exists(1));
	assert!(shared.store(b).is_err());

	let (run, _) = shared.read_run(a, 1, 0, 5).unwrap();
	assert!(run.iter().all(|&v| v == 0x22));
}

#[test]
fn test_recycle_reopens_for_writing() {
	let set = set();
	let bbox = IBBox::new(0, 0, 127, 127);
	let mut shared = set.lock();

	let key = shared.open(bbox, 1, 8, StoreFlags::empty()).unwrap();
	let row = vec![0x0Fu8; 128];
	for y in 0..128 {
		shared.write_row(key, 0, y, &row).unwrap();
	}
	shared.close(key).unwrap();

	// All blocks in memory: recycling succeeds and adds a plane.
	assert!(shared.recycle(key, 2).unwrap());
	assert!(shared.store(key).unwrap().flags().contains(StoreFlags::RECYCLED));

	let row2 = vec![0xF0u8; 128];
	for y in 0..128 {
		shared.write_row(key, 1, y, &row2).unwrap();
	}
	shared.close(key).unwrap();

	let (run, _) = shared.read_run(key, 1, 0, 64).unwrap();
	assert!(run.iter().all(|&v| v == 0xF0));
}

#[test]
fn test_recycle_refused_when_purged() {
	let set = set();
	let bbox = IBBox::new(0, 0, 255, 255);
	let (key, _) = fill_store(&set, bbox, 3);

	set.lowmem_release(MemoryTier::Ram, 1 << 20).unwrap();
	set.lowmem_release(MemoryTier::Disk, 1 << 20).unwrap();

	let mut shared = set.lock();
	let on_disk = {
		let store = shared.store(key).unwrap();
		store.resident_bytes() < 256 * 256
	};
	assert!(on_disk);
	assert!(!shared.recycle(key, 1).unwrap());
}

#[test]
fn test_transposed_store_round_trips() {
	let set = set();
	let bbox = IBBox::new(0, 0, 199, 149);
	let mut shared = set.lock();
	let key = shared.open(bbox, 1, 8, StoreFlags::XY_SWAP).unwrap();

	// Columns arrive in x order, one byte per image row.
	for x in 0..200 {
		let column: Vec<u8> = (0..150).map(|y| (x ^ y) as u8).collect();
		shared.write_column(key, 0, x as i32, &column).unwrap();
	}
	shared.close(key).unwrap();

	for y in [0, 73, 149] {
		let mut x = 0i32;
		while x < 200 {
			let (run, pixels) = shared.read_run(key, 0, x, y).unwrap();
			for (offset, &value) in run.iter().enumerate() {
				let xx = x as usize + offset;
				if xx < 200 {
					assert_eq!(value, ((xx ^ y as usize) & 0xFF) as u8, "({xx}, {y})");
				}
			}
			x += pixels as i32;
		}
	}
}

#[test]
fn test_uniform_plane_detection() {
	let set = set();
	let bbox = IBBox::new(0, 0, 127, 127);
	let mut shared = set.lock();

	let key = shared.open(bbox, 1, 8, StoreFlags::empty()).unwrap();
	let row = vec![0x2Au8; 128];
	for y in 0..128 {
		shared.write_row(key, 0, y, &row).unwrap();
	}
	shared.close(key).unwrap();

	let store = shared.store_mut(key).unwrap();
	assert_eq!(store.plane_uniform_color(0), Some(0x2A));

	// Uniform collapse keeps the data retained for adjustment.
	let plane_resident = store.resident_bytes();
	assert!(plane_resident > 0);
}

#[test]
fn test_prealloc_first_block_row() {
	let set = set();
	let bbox = IBBox::new(0, 0, 399, 399);
	let mut shared = set.lock();
	let key = shared.open(bbox, 1, 8, StoreFlags::empty()).unwrap();
	shared.prealloc(key, Some(0), 400).unwrap();

	let store = shared.store(key).unwrap();
	assert!(store.resident_bytes() >= 400 * 128);
}

#[test]
fn test_reserves_install_and_release() {
	let set = set();
	let bbox = IBBox::new(0, 0, 255, 255);
	let (key, _) = fill_store(&set, bbox, 9);

	let mut shared = set.lock();
	shared.preconvert_reserve(key).unwrap();
	assert!(shared.store(key).unwrap().have_reserves());
	shared.release_reserves(key).unwrap();
	assert!(!shared.store(key).unwrap().have_reserves());
}

#[test]
fn test_block_states_observable() {
	let set = set();
	let bbox = IBBox::new(0, 0, 255, 255);
	let key = {
		let mut shared = set.lock();
		let key = shared.open(bbox, 1, 8, StoreFlags::empty()).unwrap();
		for y in 0..=255 {
			shared.write_row(key, 0, y, &vec![1u8; 256]).unwrap();
		}
		shared.close(key).unwrap();
		key
	};

	set.lowmem_release(MemoryTier::Ram, 1 << 20).unwrap();

	// Compression ran dry, so the store advanced to blist sharing;
	// reading a compressed block faults it back.
	let mut shared = set.lock();
	{
		let store = shared.store(key).unwrap();
		assert_eq!(store.action(), StoreAction::ShareBlists1);
	}
	let (run, pixels) = shared.read_run(key, 0, 0, 0).unwrap();
	assert_eq!(pixels, 128);
	assert!(run.iter().all(|&b| b == 1));
}
