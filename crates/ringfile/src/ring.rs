//! The lock-free reservation / commit protocol.
//!
//! Both sides of the queue use the same two-cursor discipline: a *head* that
//! reservations claim by CAS and a *tail* that commits publish in
//! reservation order. A record only becomes visible once `prod_tail` has
//! moved past its last word (release store, matched by acquire loads on the
//! consumer side), and is only recycled once `cons_tail` has done the same.
//!
//! Records are contiguous in the physical data area. A reservation that
//! would cross the physical end first covers the tail gap with a skip
//! marker, then places the record at word 0; the marker is published by the
//! same commit, so readers never observe an unpublished skip.

use crate::error::RingError;
use crate::file::{self, Mapping, Stats, WORD_BYTES};
use crate::invariants::{debug_assert_bounded_occupancy, debug_assert_monotonic};
use crate::tx::{Tx, TxKind};
use crossbeam_utils::Backoff;
use std::path::Path;
use std::ptr;
use std::sync::atomic::Ordering;

/// Largest payload a single record may carry, in bytes.
pub const MAX_MSG_SIZE: usize = 8096;

/// A length prefix with this bit set marks end-of-buffer padding: the low
/// 31 bits give the number of words to jump (the marker itself included),
/// and no payload follows.
const SKIP_FLAG: u32 = 1 << 31;

/// A handle on a mapped ring file.
///
/// Any number of handles may map the same file, from one process or many;
/// all coordination goes through the atomics in the shared header. The
/// mapping is released when the handle is dropped (or via [`Ring::unload`]);
/// the file itself persists.
pub struct Ring {
    map: Mapping,
    // Write-once header fields, cached at load time.
    nb_words: u64,
    wrap: bool,
}

impl Ring {
    // ---------------------------------------------------------------------
    // LIFECYCLE
    // ---------------------------------------------------------------------

    /// Creates a ring file of `tot_words` data words at `path`.
    ///
    /// With `wrap` set, producers overwrite unread data when the ring is
    /// full; otherwise they fail with [`RingError::NoMoreRoom`] (archive
    /// mode). The file appears atomically: it is populated under a
    /// temporary name and renamed into place. Fails if `path` exists.
    pub fn create(wrap: bool, tot_words: u64, path: impl AsRef<Path>) -> Result<(), RingError> {
        file::create_file(wrap, tot_words, path.as_ref())
    }

    /// Maps an existing ring file read/write.
    ///
    /// Validates that the file length matches the capacity declared in the
    /// header. A file left behind by a crashed producer loads fine but
    /// needs [`Ring::repair`] before producers may use it again.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, RingError> {
        let map = Mapping::open(path.as_ref())?;
        let header = map.header();
        let nb_words = header.nb_words;
        let wrap = header.wrap != 0;
        Ok(Self { map, nb_words, wrap })
    }

    /// Unmaps the ring. Equivalent to dropping the handle; the backing file
    /// persists and can be loaded again at any time.
    pub fn unload(self) {
        drop(self);
    }

    /// Capacity of the data area, in 32-bit words.
    #[inline]
    pub fn capacity(&self) -> u64 {
        self.nb_words
    }

    /// Whether producers overwrite the consumer when full.
    #[inline]
    pub fn wrap(&self) -> bool {
        self.wrap
    }

    /// Takes a racy snapshot of the header counters.
    ///
    /// Individual fields are read without cross-field synchronization, so
    /// the snapshot need not be consistent while the ring is active.
    pub fn stats(&self) -> Stats {
        let header = self.map.header();
        let nb_allocs = header.nb_allocs.load(Ordering::Relaxed);
        let first_seq = header.first_seq.load(Ordering::Relaxed);
        Stats {
            nb_words: self.nb_words,
            wrap: self.wrap,
            nb_entries: nb_allocs.saturating_sub(first_seq),
            nb_allocs,
            tmin: f64::from_bits(header.tmin.load(Ordering::Relaxed)),
            tmax: f64::from_bits(header.tmax.load(Ordering::Relaxed)),
            mmapped_size: self.map.len(),
            prod_head: header.prod_head.load(Ordering::Relaxed),
            prod_tail: header.prod_tail.load(Ordering::Relaxed),
            cons_head: header.cons_head.load(Ordering::Relaxed),
            cons_tail: header.cons_tail.load(Ordering::Relaxed),
            first_seq,
        }
    }

    /// Discards uncommitted reservations left behind by crashed holders,
    /// resetting `prod_head` to `prod_tail` and `cons_head` to `cons_tail`.
    ///
    /// Returns `true` if anything changed. The caller must ensure no
    /// producer or consumer is active on this ring while repairing.
    pub fn repair(&self) -> bool {
        let header = self.map.header();
        let mut changed = false;

        let prod_tail = header.prod_tail.load(Ordering::Acquire);
        if header.prod_head.load(Ordering::Acquire) != prod_tail {
            header.prod_head.store(prod_tail, Ordering::Release);
            changed = true;
        }
        let cons_tail = header.cons_tail.load(Ordering::Acquire);
        if header.cons_head.load(Ordering::Acquire) != cons_tail {
            header.cons_head.store(cons_tail, Ordering::Release);
            changed = true;
        }
        changed
    }

    // ---------------------------------------------------------------------
    // PRODUCER SIDE
    // ---------------------------------------------------------------------

    /// Reserves a slot of `size` bytes for writing.
    ///
    /// The slot stays invisible to consumers until [`Tx::commit`]. A
    /// reservation dropped without committing leaves `prod_head` ahead of
    /// `prod_tail` until [`Ring::repair`] is run.
    ///
    /// # Panics
    ///
    /// Panics if `size` is not a multiple of 4 or exceeds [`MAX_MSG_SIZE`].
    pub fn reserve(&self, size: usize) -> Result<Tx<'_>, RingError> {
        assert_eq!(size & 3, 0, "record size {size} is not a multiple of 4 bytes");
        assert!(size <= MAX_MSG_SIZE, "record size {size} exceeds {MAX_MSG_SIZE} bytes");
        let n_words = (size / WORD_BYTES) as u64;
        let need = n_words + 1; // length prefix word

        let header = self.map.header();
        let backoff = Backoff::new();
        loop {
            let head = header.prod_head.load(Ordering::Acquire);
            let phys = head % self.nb_words;
            // Pad to word 0 if the record would cross the physical end.
            let pad = if phys + need > self.nb_words {
                self.nb_words - phys
            } else {
                0
            };
            let total = pad + need;
            if total > self.nb_words {
                // No placement can ever fit this record, wrap mode included.
                return Err(RingError::NoMoreRoom);
            }
            if !self.wrap {
                // cons_tail only grows, so a stale load underestimates free
                // space and the check stays conservative.
                let free = self.nb_words - (head - header.cons_tail.load(Ordering::Acquire));
                if total > free {
                    return Err(RingError::NoMoreRoom);
                }
            }

            let new_head = head + total;
            if header
                .prod_head
                .compare_exchange_weak(head, new_head, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                if pad > 0 {
                    self.store_word(head, SKIP_FLAG | pad as u32);
                }
                self.store_word(head + pad, n_words as u32);
                if !self.wrap {
                    debug_assert_bounded_occupancy!(
                        new_head - header.cons_tail.load(Ordering::Relaxed),
                        self.nb_words
                    );
                }
                return Ok(Tx::new(
                    self,
                    TxKind::Produce,
                    head,
                    head + pad + 1,
                    new_head,
                    size,
                ));
            }
            backoff.spin();
        }
    }

    /// Reserves, copies `bytes` in and commits in one call.
    ///
    /// # Panics
    ///
    /// Panics if `bytes.len()` is not a multiple of 4 or exceeds
    /// [`MAX_MSG_SIZE`].
    pub fn enqueue(&self, bytes: &[u8], tmin: f64, tmax: f64) -> Result<(), RingError> {
        let mut tx = self.reserve(bytes.len())?;
        tx.fill(bytes);
        tx.commit(tmin, tmax);
        Ok(())
    }

    /// Producer commit: waits for earlier reservations to publish, folds
    /// the record's timestamps into the envelope, then makes the record
    /// visible.
    pub(crate) fn commit_produce(&self, start: u64, next: u64, tmin: f64, tmax: f64) {
        let header = self.map.header();

        // Records are published in reservation order.
        let backoff = Backoff::new();
        while header.prod_tail.load(Ordering::Acquire) != start {
            backoff.snooze();
        }

        // Racy envelope update; stale reads are tolerated.
        let cur = f64::from_bits(header.tmin.load(Ordering::Relaxed));
        if tmin < cur {
            header.tmin.store(tmin.to_bits(), Ordering::Relaxed);
        }
        let cur = f64::from_bits(header.tmax.load(Ordering::Relaxed));
        if tmax > cur {
            header.tmax.store(tmax.to_bits(), Ordering::Relaxed);
        }
        header.nb_allocs.fetch_add(1, Ordering::Relaxed);

        debug_assert_monotonic!("prod_tail", start, next);
        header.prod_tail.store(next, Ordering::Release);
        self.debug_check_order();
    }

    // ---------------------------------------------------------------------
    // CONSUMER SIDE
    // ---------------------------------------------------------------------

    /// Reserves the oldest committed record for reading.
    ///
    /// The record is released (and its words recycled) by [`Tx::release`];
    /// a reservation dropped without releasing leaves the record claimed
    /// until [`Ring::repair`] rolls `cons_head` back.
    pub fn dequeue_reserve(&self) -> Result<Tx<'_>, RingError> {
        let header = self.map.header();
        let backoff = Backoff::new();
        loop {
            let head = header.cons_head.load(Ordering::Acquire);
            let tail = header.prod_tail.load(Ordering::Acquire);
            if head == tail {
                return Err(RingError::Empty);
            }
            let (record_start, n_words, next) = self.locate_record(head, tail)?;
            if header
                .cons_head
                .compare_exchange_weak(head, next, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                self.debug_check_order();
                return Ok(Tx::new(
                    self,
                    TxKind::Consume,
                    head,
                    record_start,
                    next,
                    n_words as usize * WORD_BYTES,
                ));
            }
            backoff.spin();
        }
    }

    /// Dequeues the oldest committed record and returns its payload.
    pub fn dequeue(&self) -> Result<Vec<u8>, RingError> {
        let tx = self.dequeue_reserve()?;
        let bytes = tx.copy_out();
        tx.release();
        Ok(bytes)
    }

    /// Consumer commit: waits for earlier dequeues to release in order,
    /// then moves the release cursor past the record.
    pub(crate) fn commit_consume(&self, start: u64, next: u64) {
        let header = self.map.header();
        let backoff = Backoff::new();
        while header.cons_tail.load(Ordering::Acquire) != start {
            backoff.snooze();
        }
        header.first_seq.fetch_add(1, Ordering::Relaxed);
        debug_assert_monotonic!("cons_tail", start, next);
        header.cons_tail.store(next, Ordering::Release);
        self.debug_check_order();
    }

    // ---------------------------------------------------------------------
    // STREAMING READS
    // ---------------------------------------------------------------------

    /// Starts a non-destructive cursor at the oldest live record.
    ///
    /// The consumer cursors do not move; advance with [`Tx::read_next`].
    pub fn read_first(&self) -> Result<Tx<'_>, RingError> {
        let header = self.map.header();
        let start = header.cons_tail.load(Ordering::Acquire);
        let tail = header.prod_tail.load(Ordering::Acquire);
        if start == tail {
            return Err(RingError::Empty);
        }
        let (record_start, n_words, next) = self.locate_record(start, tail)?;
        Ok(Tx::new(
            self,
            TxKind::Read,
            start,
            record_start,
            next,
            n_words as usize * WORD_BYTES,
        ))
    }

    /// Continues a streaming cursor at logical position `pos`.
    ///
    /// At `prod_tail` this is [`RingError::Empty`] while some producer holds
    /// an open reservation (more data is coming) and
    /// [`RingError::EndOfStream`] otherwise.
    pub(crate) fn read_next_at(&self, pos: u64) -> Result<Tx<'_>, RingError> {
        let header = self.map.header();
        let tail = header.prod_tail.load(Ordering::Acquire);
        if pos == tail {
            if header.prod_head.load(Ordering::Acquire) != tail {
                return Err(RingError::Empty);
            }
            return Err(RingError::EndOfStream);
        }
        if pos > tail {
            return Err(RingError::InvalidBuffer("read cursor past committed data"));
        }
        let (record_start, n_words, next) = self.locate_record(pos, tail)?;
        Ok(Tx::new(
            self,
            TxKind::Read,
            pos,
            record_start,
            next,
            n_words as usize * WORD_BYTES,
        ))
    }

    /// Returns an inert transaction: zero-sized, not tied to any record.
    /// Every typed access panics and it cannot be committed.
    pub fn empty_tx(&self) -> Tx<'_> {
        Tx::new(self, TxKind::Empty, 0, 0, 0, 0)
    }

    // ---------------------------------------------------------------------
    // RECORD LAYOUT
    // ---------------------------------------------------------------------

    /// Resolves the record at logical position `at`, stepping over one
    /// leading skip marker. Returns `(payload_start, payload_words, next)`.
    ///
    /// `tail` is the committed bound; anything inconsistent with it means
    /// the mapped content is corrupt (or this reader has been lapped in
    /// wrap mode).
    fn locate_record(&self, at: u64, tail: u64) -> Result<(u64, u32, u64), RingError> {
        let mut rec = at;
        let mut prefix = self.load_word(rec);
        if prefix & SKIP_FLAG != 0 {
            let jump = u64::from(prefix & !SKIP_FLAG);
            if jump == 0 || jump > self.nb_words {
                return Err(RingError::InvalidBuffer("skip marker out of range"));
            }
            rec += jump;
            if rec >= tail {
                return Err(RingError::InvalidBuffer("skip marker past committed data"));
            }
            prefix = self.load_word(rec);
            if prefix & SKIP_FLAG != 0 {
                return Err(RingError::InvalidBuffer("consecutive skip markers"));
            }
        }
        let n_words = prefix;
        if u64::from(n_words) + 1 > self.nb_words {
            return Err(RingError::InvalidBuffer("length prefix exceeds capacity"));
        }
        let next = rec + u64::from(n_words) + 1;
        if next > tail {
            return Err(RingError::InvalidBuffer("length prefix past committed data"));
        }
        Ok((rec + 1, n_words, next))
    }

    /// Base address of the record payload starting at `record_start`.
    ///
    /// Records are contiguous (reservation padding guarantees it), so one
    /// base pointer covers the whole slot.
    #[inline]
    pub(crate) fn record_base(&self, record_start: u64) -> *mut u8 {
        self.word_ptr(record_start).cast()
    }

    #[inline]
    fn word_ptr(&self, pos: u64) -> *mut u32 {
        // Safety: pos % nb_words is within the data area.
        unsafe { self.map.data().add((pos % self.nb_words) as usize) }
    }

    #[inline]
    fn load_word(&self, pos: u64) -> u32 {
        // Safety: word_ptr stays inside the mapping. Reads are only issued
        // for positions below an acquired `prod_tail`, so the word was
        // published by a release store.
        unsafe { ptr::read(self.word_ptr(pos)) }
    }

    #[inline]
    fn store_word(&self, pos: u64, value: u32) {
        // Safety: the word belongs to a reservation this thread owns.
        unsafe { ptr::write(self.word_ptr(pos), value) }
    }

    /// Cursor-order sanity check, debug builds and archive mode only.
    ///
    /// Cursors only grow and `cons_tail <= cons_head <= prod_tail <=
    /// prod_head` holds at every instant, so loading them in that order can
    /// never report a transient violation.
    #[inline]
    fn debug_check_order(&self) {
        #[cfg(debug_assertions)]
        if !self.wrap {
            let header = self.map.header();
            let cons_tail = header.cons_tail.load(Ordering::Relaxed);
            let cons_head = header.cons_head.load(Ordering::Relaxed);
            let prod_tail = header.prod_tail.load(Ordering::Relaxed);
            let prod_head = header.prod_head.load(Ordering::Relaxed);
            crate::invariants::debug_assert_cursor_order!(cons_tail, cons_head, prod_tail, prod_head);
        }
    }
}
