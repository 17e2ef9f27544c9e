//! Property-based tests: codec round-trip laws and protocol invariants
//! under random operation sequences.

use proptest::prelude::*;
use ringfile::{Ring, RingError};
use std::collections::VecDeque;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

fn scratch(wrap: bool, tot_words: u64) -> (tempfile::TempDir, Ring) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ring");
    Ring::create(wrap, tot_words, &path).unwrap();
    let ring = Ring::load(&path).unwrap();
    (dir, ring)
}

proptest! {
    /// Every fixed-width value reads back identically, both inside the
    /// producer transaction and after crossing the queue.
    #[test]
    fn prop_u32_roundtrip(v: u32, word in 0usize..15) {
        let (_dir, ring) = scratch(false, 64);
        let mut tx = ring.reserve(64).unwrap();
        tx.write_u32(word * 4, v);
        prop_assert_eq!(tx.read_u32(word * 4), v);
        tx.commit(0.0, 0.0);

        let tx = ring.dequeue_reserve().unwrap();
        prop_assert_eq!(tx.read_u32(word * 4), v);
        tx.release();
    }

    #[test]
    fn prop_u64_roundtrip(v: u64, word in 0usize..14) {
        let (_dir, ring) = scratch(false, 64);
        let mut tx = ring.reserve(64).unwrap();
        tx.write_u64(word * 4, v);
        tx.commit(0.0, 0.0);

        let tx = ring.dequeue_reserve().unwrap();
        prop_assert_eq!(tx.read_u64(word * 4), v);
        tx.release();
    }

    #[test]
    fn prop_i128_roundtrip(v: i128, word in 0usize..12) {
        let (_dir, ring) = scratch(false, 64);
        let mut tx = ring.reserve(64).unwrap();
        tx.write_i128(word * 4, v);
        tx.commit(0.0, 0.0);

        let tx = ring.dequeue_reserve().unwrap();
        prop_assert_eq!(tx.read_i128(word * 4), v);
        tx.release();
    }

    #[test]
    fn prop_u48_roundtrip(v in 0u64..(1 << 48), word in 0usize..14) {
        let (_dir, ring) = scratch(false, 64);
        let mut tx = ring.reserve(64).unwrap();
        tx.write_u48(word * 4, v);
        tx.commit(0.0, 0.0);

        let tx = ring.dequeue_reserve().unwrap();
        prop_assert_eq!(tx.read_u48(word * 4), v);
        tx.release();
    }

    /// Floats round-trip bit-for-bit, NaN payloads included.
    #[test]
    fn prop_float_roundtrip(bits: u64, word in 0usize..14) {
        let v = f64::from_bits(bits);
        let (_dir, ring) = scratch(false, 64);
        let mut tx = ring.reserve(64).unwrap();
        tx.write_float(word * 4, v);
        tx.commit(0.0, 0.0);

        let tx = ring.dequeue_reserve().unwrap();
        prop_assert_eq!(tx.read_float(word * 4).to_bits(), bits);
        tx.release();
    }

    #[test]
    fn prop_str_roundtrip(bytes in prop::collection::vec(any::<u8>(), 0..200)) {
        // Reserve the length prefix plus the payload, rounded up to words.
        let slot = (4 + bytes.len() + 3) & !3;
        let (_dir, ring) = scratch(false, 256);
        let mut tx = ring.reserve(slot).unwrap();
        tx.write_str(0, &bytes);
        tx.commit(0.0, 0.0);

        let tx = ring.dequeue_reserve().unwrap();
        prop_assert_eq!(tx.read_str(0), bytes);
        tx.release();
    }

    #[test]
    fn prop_ip_roundtrip(v4: u32, v6: u128) {
        let (_dir, ring) = scratch(false, 64);
        let mut tx = ring.reserve(32).unwrap();
        let a = IpAddr::V4(Ipv4Addr::from(v4));
        let b = IpAddr::V6(Ipv6Addr::from(v6));
        tx.write_ip(0, a);
        tx.write_ip(8, b);
        tx.commit(0.0, 0.0);

        let tx = ring.dequeue_reserve().unwrap();
        prop_assert_eq!(tx.read_ip(0).unwrap(), a);
        prop_assert_eq!(tx.read_ip(8).unwrap(), b);
        tx.release();
    }

    /// Setting a bit affects that bit and nothing else.
    #[test]
    fn prop_nullmask_bits(bits in prop::collection::btree_set(0usize..64, 0..20)) {
        let (_dir, ring) = scratch(false, 64);
        let mut tx = ring.reserve(8).unwrap();
        tx.zero_bytes(0, 8);
        for &bit in &bits {
            tx.set_bit(bit);
        }
        tx.commit(0.0, 0.0);

        let tx = ring.dequeue_reserve().unwrap();
        for bit in 0..64 {
            prop_assert_eq!(tx.get_bit(bit), bits.contains(&bit), "bit {}", bit);
        }
        tx.release();
    }
}

proptest! {
    /// Random enqueue/dequeue sequences preserve FIFO order, the cursor
    /// ordering and the live-record count, with `Empty` raised exactly when
    /// the model queue is empty.
    #[test]
    fn prop_fifo_and_cursor_order(
        ops in prop::collection::vec((any::<bool>(), 0usize..8, any::<u8>()), 1..200)
    ) {
        let (_dir, ring) = scratch(false, 32);
        let mut model: VecDeque<Vec<u8>> = VecDeque::new();
        let mut sent = 0u8;

        for (is_enqueue, words, fill) in ops {
            if is_enqueue {
                let payload = [fill, sent, fill ^ sent, 0].repeat(words);
                match ring.enqueue(&payload, 0.0, 0.0) {
                    Ok(()) => {
                        model.push_back(payload);
                        sent = sent.wrapping_add(1);
                    }
                    Err(RingError::NoMoreRoom) => {
                        // Full is only legal when live data occupies space.
                        prop_assert!(!model.is_empty());
                    }
                    Err(e) => panic!("enqueue failed: {e}"),
                }
            } else {
                match ring.dequeue() {
                    Ok(got) => {
                        let want = model.pop_front();
                        prop_assert_eq!(Some(got), want, "FIFO violation");
                    }
                    Err(RingError::Empty) => prop_assert!(model.is_empty()),
                    Err(e) => panic!("dequeue failed: {e}"),
                }
            }

            let stats = ring.stats();
            prop_assert!(stats.cons_tail <= stats.cons_head);
            prop_assert!(stats.cons_head <= stats.prod_tail);
            prop_assert!(stats.prod_tail <= stats.prod_head);
            prop_assert!(stats.prod_head - stats.cons_tail <= stats.nb_words);
            prop_assert_eq!(stats.nb_entries, model.len() as u64);
        }

        // Drain and verify the leftovers in order.
        while let Some(want) = model.pop_front() {
            let got = ring.dequeue().unwrap();
            prop_assert_eq!(got, want);
        }
        prop_assert!(matches!(ring.dequeue(), Err(RingError::Empty)));
    }
}
