//! Backing file layout and mapping management.
//!
//! A ring file is a fixed header followed by a data area of `nb_words`
//! 32-bit words. The header holds the four protocol cursors as atomics that
//! every process sharing the mapping operates on directly. All fields are
//! little-endian and the data area starts 8-byte aligned.

use crate::error::RingError;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::mem::offset_of;
use std::os::unix::io::AsRawFd;
use std::path::Path;
use std::ptr;
use std::sync::atomic::AtomicU64;

/// Size of one data-area word in bytes. All record offsets and sizes are
/// expressed in these words.
pub(crate) const WORD_BYTES: usize = 4;

/// Byte size of the on-file header.
pub(crate) const HEADER_BYTES: usize = std::mem::size_of::<Header>();

/// The shared header at the start of every ring file.
///
/// The cursors are unbounded logical word counters; the physical word index
/// is `cursor % nb_words`. `tmin`/`tmax` store `f64` bits and are updated
/// racily (stale envelope reads are tolerated by design).
#[repr(C)]
pub(crate) struct Header {
    /// Capacity of the data area, in words. Written once at creation.
    pub nb_words: u64,
    /// 1 if producers overwrite unread data when full, 0 if they fail.
    pub wrap: u32,
    _pad: u32,
    /// Next word a producer will reserve.
    pub prod_head: AtomicU64,
    /// First word not yet committed by a producer.
    pub prod_tail: AtomicU64,
    /// Next word a consumer will reserve.
    pub cons_head: AtomicU64,
    /// First word not yet released by a consumer.
    pub cons_tail: AtomicU64,
    /// Total producer commits since creation.
    pub nb_allocs: AtomicU64,
    /// Lower bound of the live time envelope (f64 bits).
    pub tmin: AtomicU64,
    /// Upper bound of the live time envelope (f64 bits).
    pub tmax: AtomicU64,
    /// Sequence number of the oldest live record.
    pub first_seq: AtomicU64,
}

/// Snapshot of a ring's header, as returned by [`crate::Ring::stats`].
///
/// The fields are read individually without synchronization; the snapshot is
/// not guaranteed to be consistent across fields while the ring is active.
#[derive(Debug, Clone, Copy)]
pub struct Stats {
    /// Capacity of the data area, in words.
    pub nb_words: u64,
    /// Whether producers overwrite the consumer when full.
    pub wrap: bool,
    /// Number of live records (committed, not yet released).
    pub nb_entries: u64,
    /// Total producer commits since creation.
    pub nb_allocs: u64,
    /// Lower bound of the live time envelope.
    pub tmin: f64,
    /// Upper bound of the live time envelope.
    pub tmax: f64,
    /// Actual size of the mapping in bytes.
    pub mmapped_size: usize,
    /// Raw producer reservation cursor.
    pub prod_head: u64,
    /// Raw producer visibility cursor.
    pub prod_tail: u64,
    /// Raw consumer reservation cursor.
    pub cons_head: u64,
    /// Raw consumer release cursor.
    pub cons_tail: u64,
    /// Sequence number of the oldest live record.
    pub first_seq: u64,
}

/// Initial header image for a freshly created file.
///
/// Cursors and counters start at zero; the time envelope starts inverted
/// (`tmin = +inf`, `tmax = -inf`) so the first commit sets both bounds.
fn header_image(wrap: bool, tot_words: u64) -> [u8; HEADER_BYTES] {
    let mut img = [0u8; HEADER_BYTES];
    let mut put = |at: usize, bytes: &[u8]| img[at..at + bytes.len()].copy_from_slice(bytes);
    put(offset_of!(Header, nb_words), &tot_words.to_le_bytes());
    put(offset_of!(Header, wrap), &u32::from(wrap).to_le_bytes());
    put(
        offset_of!(Header, tmin),
        &f64::INFINITY.to_bits().to_le_bytes(),
    );
    put(
        offset_of!(Header, tmax),
        &f64::NEG_INFINITY.to_bits().to_le_bytes(),
    );
    img
}

/// Creates a ring file of `tot_words` data words at `path`.
///
/// The file is populated under a temporary name and renamed into place, so
/// an external observer either sees no file or a fully initialized one.
/// Fails if `path` already exists.
pub(crate) fn create_file(wrap: bool, tot_words: u64, path: &Path) -> Result<(), RingError> {
    if tot_words == 0 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "ring capacity must be at least one word",
        )
        .into());
    }
    let data_bytes = tot_words.checked_mul(WORD_BYTES as u64).ok_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidInput, "ring capacity overflows the file size")
    })?;
    if path.exists() {
        return Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("ring file {} already exists", path.display()),
        )
        .into());
    }

    let tmp = tmp_path(path)?;
    let result = (|| {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&tmp)?;
        // set_len zero-fills the data area
        file.set_len(HEADER_BYTES as u64 + data_bytes)?;
        file.write_all(&header_image(wrap, tot_words))?;
        file.sync_all()?;
        fs::rename(&tmp, path)
    })();
    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result.map_err(RingError::from)
}

fn tmp_path(path: &Path) -> io::Result<std::path::PathBuf> {
    let name = path.file_name().ok_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidInput, "ring file path has no file name")
    })?;
    let mut tmp_name = name.to_os_string();
    tmp_name.push(".tmp");
    Ok(path.with_file_name(tmp_name))
}

/// A shared read/write mapping of a ring file.
///
/// Unmapped on drop; the underlying file persists.
#[derive(Debug)]
pub(crate) struct Mapping {
    ptr: *mut u8,
    len: usize,
    _file: File,
}

// Safety: the mapping is shared mutable state, but every mutation goes
// through the atomics in `Header` or through a data-area range that a single
// reservation owns. See the protocol notes in `ring.rs`.
unsafe impl Send for Mapping {}
unsafe impl Sync for Mapping {}

impl Mapping {
    /// Maps an existing ring file read/write and validates its header
    /// against the file length.
    pub(crate) fn open(path: &Path) -> Result<Self, RingError> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let len = file.metadata()?.len() as usize;
        if len < HEADER_BYTES {
            return Err(RingError::InvalidBuffer("file shorter than the ring header"));
        }

        let ptr = unsafe {
            let ptr = libc::mmap(
                ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                file.as_raw_fd(),
                0,
            );
            if ptr == libc::MAP_FAILED {
                return Err(io::Error::last_os_error().into());
            }
            ptr.cast::<u8>()
        };
        // From here on, dropping `mapping` unmaps on any validation failure.
        let mapping = Self { ptr, len, _file: file };

        let header = mapping.header();
        if header.wrap > 1 {
            return Err(RingError::InvalidBuffer("wrap flag out of range"));
        }
        let expected = header
            .nb_words
            .checked_mul(WORD_BYTES as u64)
            .and_then(|data| data.checked_add(HEADER_BYTES as u64));
        if header.nb_words == 0 || expected != Some(len as u64) {
            return Err(RingError::InvalidBuffer(
                "file length does not match the declared capacity",
            ));
        }
        Ok(mapping)
    }

    #[inline]
    pub(crate) fn header(&self) -> &Header {
        // Safety: open() validated that the mapping covers at least the
        // header, and the file offset 0 is page aligned.
        unsafe { &*self.ptr.cast::<Header>() }
    }

    /// Base of the data area.
    #[inline]
    pub(crate) fn data(&self) -> *mut u32 {
        // Safety: the mapping covers HEADER_BYTES + nb_words words.
        unsafe { self.ptr.add(HEADER_BYTES).cast::<u32>() }
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.len
    }
}

impl Drop for Mapping {
    fn drop(&mut self) {
        // Safety: ptr/len are the values returned by mmap in open().
        unsafe {
            libc::munmap(self.ptr.cast(), self.len);
        }
    }
}
