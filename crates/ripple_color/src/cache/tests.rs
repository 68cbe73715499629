//! Unit tests for the color cache lifecycle.

use ripple_types::{ColorValue, ColorantIndex};
use test_log::test;

use super::*;
use crate::{CombineOp, OverprintsType};

fn store() -> ColorStore {
	ColorStore::new(ColorStoreConfig::default())
}

fn sample(store: &ColorStore, a: f32, b: f32) -> PackedColor {
	store
		.build(
			&[ColorantIndex(4), ColorantIndex(7)],
			&[ColorValue::from_unit(a), ColorValue::from_unit(b)],
			ColorValue::ONE,
		)
		.unwrap()
}

#[test]
fn test_intern_same_content_same_handle() {
	let mut store = store();
	let packed = sample(&store, 0.25, 0.75);

	let first = store.intern(&packed).unwrap();
	let second = store.intern(&packed).unwrap();
	assert_eq!(first.key(), second.key());
	assert_eq!(store.refcount(&first).unwrap(), 2);

	// Interned content matches what went in.
	assert_eq!(store.get(&first).unwrap(), &packed);
}

#[test]
fn test_scenario_b_wire_bytes() {
	let mut store = store();
	let packed = sample(&store, 0.25, 0.75);
	let handle = store.intern(&packed).unwrap();

	let stored = store.get(&handle).unwrap();
	assert_eq!(stored.pm(), &[0x84, 0x40]);
	let wire: Vec<u8> = stored.values().iter().flat_map(|v| v.to_be_bytes()).collect();
	assert_eq!(wire, [0x40, 0x00, 0xC0, 0x00]);

	// Unordered colorant arrays are rejected before they reach the cache.
	assert!(
		store
			.build(
				&[ColorantIndex(7), ColorantIndex(4)],
				&[ColorValue::from_unit(0.75), ColorValue::from_unit(0.25)],
				ColorValue::ONE,
			)
			.is_err()
	);
}

#[test]
fn test_release_retains_then_resurrects() {
	let mut store = store();
	let packed = sample(&store, 0.1, 0.9);

	let handle = store.intern(&packed).unwrap();
	let key = handle.key();
	store.release(handle).unwrap();

	// Still cached at refcount zero; re-interning resurrects it.
	assert_eq!(store.cached_len(), 1);
	let again = store.intern(&packed).unwrap();
	assert_eq!(again.key(), key);
	assert_eq!(store.refcount(&again).unwrap(), 1);
}

#[test]
fn test_purge_leaves_only_referenced() {
	let mut store = store();

	let kept = store.intern(&sample(&store, 0.2, 0.4)).unwrap();
	let dropped = store.intern(&sample(&store, 0.6, 0.8)).unwrap();
	store.release(dropped).unwrap();

	store.purge();
	assert_eq!(store.cached_len(), 1);
	assert_eq!(store.refcount(&kept).unwrap(), 1);

	// The purged color interns as a brand-new entry.
	let fresh = store.intern(&sample(&store, 0.6, 0.8)).unwrap();
	assert_eq!(store.refcount(&fresh).unwrap(), 1);
}

#[test]
fn test_add_reference_and_saturation() {
	let mut store = store();
	let packed = sample(&store, 0.3, 0.7);
	let first = store.intern(&packed).unwrap();

	let second = store.add_reference(&first).unwrap();
	assert_eq!(second.key(), first.key());
	assert_eq!(store.refcount(&first).unwrap(), 2);

	// Force saturation and observe copy-on-max.
	while store.refcount(&first).unwrap() < MAX_REFCOUNT {
		store.add_reference(&first).unwrap();
	}
	let copy = store.add_reference(&first).unwrap();
	assert_ne!(copy.key(), first.key());
	assert_eq!(store.get(&copy).unwrap(), store.get(&first).unwrap());
}

#[test]
fn test_constants_are_singletons() {
	let mut store = store();
	let black = store.black();
	let white = store.white();
	assert_ne!(black.key(), white.key());

	// Reference operations on constants are no-ops.
	let again = store.add_reference(&black).unwrap();
	assert_eq!(again.key(), black.key());
	store.release(again).unwrap();
	store.release(store.black()).unwrap();
	assert_eq!(store.refcount(&store.black()).unwrap(), 1);

	assert_eq!(
		store.get(&white).unwrap().colorant_value(ColorantIndex(3)),
		Some(ColorValue::ONE)
	);
}

#[test]
fn test_cache_overflow_recycles_unreferenced_first() {
	let mut store = ColorStore::new(ColorStoreConfig {
		low_memory: true,
	});
	let capacity = store.max_cached;

	// Fill the cache with released colors, then overflow it.
	for i in 0..capacity {
		let packed = store
			.build(
				&[ColorantIndex(0)],
				&[ColorValue(i as u16 + 1)],
				ColorValue::ONE,
			)
			.unwrap();
		let h = store.intern(&packed).unwrap();
		store.release(h).unwrap();
	}
	assert_eq!(store.cached_len(), capacity);

	let packed = store
		.build(&[ColorantIndex(1)], &[ColorValue(7)], ColorValue::ONE)
		.unwrap();
	let kept = store.intern(&packed).unwrap();
	assert_eq!(store.cached_len(), capacity);
	assert_eq!(store.refcount(&kept).unwrap(), 1);
}

#[test]
fn test_referenced_color_survives_uncaching() {
	let mut store = ColorStore::new(ColorStoreConfig {
		low_memory: true,
	});
	let capacity = store.max_cached;

	// Every entry referenced: overflow must push one out of the index but
	// keep it readable through its handle.
	let mut handles = Vec::new();
	for i in 0..=capacity {
		let packed = store
			.build(
				&[ColorantIndex(0)],
				&[ColorValue(i as u16 + 1)],
				ColorValue::ONE,
			)
			.unwrap();
		handles.push(store.intern(&packed).unwrap());
	}
	assert_eq!(store.cached_len(), capacity);
	for handle in &handles {
		assert!(store.get(handle).is_ok());
	}

	// The uncached one frees for real on release.
	for handle in handles {
		store.release(handle).unwrap();
	}
}

#[test]
fn test_handle_lookup_cache() {
	let mut store = store();
	let packed = sample(&store, 0.25, 0.75);
	let mut handle = store.intern(&packed).unwrap();

	let v1 = handle.colorant_value(&store, ColorantIndex(4)).unwrap();
	let v2 = handle.colorant_value(&store, ColorantIndex(4)).unwrap();
	assert_eq!(v1, Some(ColorValue::from_unit(0.25)));
	assert_eq!(v1, v2);
	let v3 = handle.colorant_value(&store, ColorantIndex(5)).unwrap();
	assert_eq!(v3, None);
}

#[test]
fn test_apply_and_combine_overprints() {
	let mut store = store();
	let base = store.intern(&sample(&store, 0.25, 0.75)).unwrap();

	let op = store
		.apply_overprints(&base, OverprintsType::Overprinted, &[ColorantIndex(4)])
		.unwrap();
	assert!(store.colorant_is_overprinted(&op, ColorantIndex(4)).unwrap());
	assert!(!store.colorant_is_overprinted(&op, ColorantIndex(7)).unwrap());

	// Knockout form flags the complement.
	let ko = store
		.apply_overprints(&base, OverprintsType::Knockedout, &[ColorantIndex(4)])
		.unwrap();
	assert!(!store.colorant_is_overprinted(&ko, ColorantIndex(4)).unwrap());
	assert!(store.colorant_is_overprinted(&ko, ColorantIndex(7)).unwrap());

	// Union combines both masks; None clears.
	let both = store.combine_overprints(&op, Some(&ko), CombineOp::Union).unwrap();
	assert!(store.colorant_is_overprinted(&both, ColorantIndex(4)).unwrap());
	assert!(store.colorant_is_overprinted(&both, ColorantIndex(7)).unwrap());

	let cleared = store.combine_overprints(&both, None, CombineOp::Union).unwrap();
	assert!(!store.doing_maxblt_overprints(&cleared).unwrap());

	let narrowed = store.combine_overprints(&both, Some(&op), CombineOp::Intersect).unwrap();
	assert!(store.colorant_is_overprinted(&narrowed, ColorantIndex(4)).unwrap());
	assert!(!store.colorant_is_overprinted(&narrowed, ColorantIndex(7)).unwrap());
}

#[test]
fn test_hash_equal_content_same_bucket() {
	let store = store();
	let a = sample(&store, 0.25, 0.75);
	let b = sample(&store, 0.25, 0.75);
	assert_eq!(content_hash(&a, 2039), content_hash(&b, 2039));

	// Command colors hash to bucket zero.
	let black = PackedColor::build_cmd(ripple_types::paintmask::PmCommand::All0);
	assert_eq!(content_hash(&black, 2039), 0);
}
