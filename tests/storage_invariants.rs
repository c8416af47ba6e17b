use std::collections::HashMap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use pulse_ecs::{ArrayStorage, Slot, SparseStorage, Storage};

// Drives a storage through a random allocate/release sequence against a
// model map, checking after every step that the live-slot set, the
// count, and the payloads agree.
fn exercise<S: Storage<u64>>(mut storage: S, seed: u64, steps: usize) {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut model: HashMap<Slot, u64> = HashMap::new();
    let mut released: Vec<Slot> = Vec::new();

    for step in 0..steps {
        if model.is_empty() || rng.gen_bool(0.6) {
            let value = rng.gen::<u64>();
            let slot = storage.allocate_with(value);
            assert!(storage.is_valid(slot));
            assert!(!model.contains_key(&slot), "slot handed out twice");
            model.insert(slot, value);
        } else {
            let victim = *model
                .keys()
                .nth(rng.gen_range(0..model.len()))
                .expect("model is non-empty");
            let value = storage.release(victim).expect("victim is valid");
            assert_eq!(value, model.remove(&victim).expect("victim tracked"));
            assert!(!storage.is_valid(victim));
            released.push(victim);
        }

        assert_eq!(storage.count(), model.len(), "count diverged at step {step}");

        let slots = storage.slots();
        assert_eq!(slots.len(), model.len());
        for slot in &slots {
            assert!(model.contains_key(slot), "enumerated slot not in model");
            assert!(storage.is_valid(*slot));
        }
        for (slot, value) in &model {
            assert_eq!(storage.get(*slot).expect("live slot"), value);
        }
        for slot in &released {
            assert!(!storage.is_valid(*slot), "released slot still valid");
            assert!(storage.get(*slot).is_err());
        }
    }
}

#[test]
fn array_storage_random_invariants() {
    exercise(ArrayStorage::<u64>::new(), 0x5eed, 400);
}

#[test]
fn sparse_storage_random_invariants() {
    exercise(SparseStorage::<u64>::new(), 0x5eed, 400);
    exercise(SparseStorage::<u64>::with_page_size(4), 0xbeef, 400);
}

#[test]
fn stale_slot_is_rejected_after_reuse() {
    let mut storage = ArrayStorage::<u32>::new();
    let first = storage.allocate_with(1);
    storage.release(first).unwrap();
    let second = storage.allocate_with(2);

    // The index is recycled under a new generation.
    assert_eq!(first.index, second.index);
    assert_ne!(first.generation, second.generation);
    assert!(!storage.is_valid(first));
    assert!(storage.is_valid(second));
    assert!(storage.get(first).is_err());
    assert!(storage.release(first).is_err());
    assert_eq!(*storage.get(second).unwrap(), 2);
}

#[test]
fn allocate_zero_initialises_the_cell() {
    let mut storage = SparseStorage::<(u32, f64)>::new();
    let slot = storage.allocate();
    assert_eq!(*storage.get(slot).unwrap(), (0, 0.0));
}

#[test]
fn payload_mutation_sticks_until_release() {
    let mut storage = ArrayStorage::<u32>::new();
    let slot = storage.allocate_with(7);
    *storage.get_mut(slot).unwrap() = 19;
    assert_eq!(*storage.get(slot).unwrap(), 19);
    assert_eq!(storage.release(slot).unwrap(), 19);
}

#[test]
fn sparse_payload_addresses_survive_unrelated_allocations() {
    let mut storage = SparseStorage::<u64>::with_page_size(8);
    let slot = storage.allocate_with(42);
    let before = storage.get(slot).unwrap() as *const u64 as usize;

    // Force several new pages into existence.
    let mut others = Vec::new();
    for i in 0..64 {
        others.push(storage.allocate_with(i));
    }

    let after = storage.get(slot).unwrap() as *const u64 as usize;
    assert_eq!(before, after, "page memory moved");
    assert_eq!(*storage.get(slot).unwrap(), 42);
}

#[test]
fn fetch_and_write_back_are_inverses() {
    let mut storage = ArrayStorage::<i32>::new();
    let slots: Vec<Slot> = (0..10).map(|i| storage.allocate_with(i)).collect();

    let mut snapshot = Vec::new();
    storage.fetch(&slots, &mut snapshot).unwrap();
    assert_eq!(snapshot, (0..10).collect::<Vec<_>>());

    for value in &mut snapshot {
        *value *= 2;
    }
    storage.write_back(&slots, &snapshot).unwrap();
    for (i, &slot) in slots.iter().enumerate() {
        assert_eq!(*storage.get(slot).unwrap(), i as i32 * 2);
    }
}

#[test]
fn write_back_rejects_mismatched_lengths_without_mutating() {
    let mut storage = ArrayStorage::<i32>::new();
    let slots: Vec<Slot> = (0..4).map(|i| storage.allocate_with(i)).collect();

    assert!(storage.write_back(&slots, &[1, 2]).is_err());
    let mut stale = slots.clone();
    stale.push(Slot::new(99, 0));
    assert!(storage.write_back(&stale, &[9, 9, 9, 9, 9]).is_err());

    for (i, &slot) in slots.iter().enumerate() {
        assert_eq!(*storage.get(slot).unwrap(), i as i32, "storage mutated");
    }
}

#[test]
fn sibling_storage_keeps_shape_parameters() {
    let sparse = SparseStorage::<u64>::with_page_size(32);
    let sibling: SparseStorage<String> = sparse.create_sibling();
    assert_eq!(sibling.page_size(), 32);
    assert_eq!(sibling.count(), 0);

    let array = ArrayStorage::<u64>::with_capacity(16);
    let mut sibling: ArrayStorage<u8> = array.create_sibling();
    let slot = sibling.allocate_with(3);
    assert_eq!(*sibling.get(slot).unwrap(), 3);
}
