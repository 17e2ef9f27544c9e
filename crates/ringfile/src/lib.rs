//! Persistent lock-free ring buffers over memory-mapped files.
//!
//! A ring file is a message queue shared by cooperating processes on one
//! host: a fixed header holding four atomic cursors, followed by a circular
//! data area of 32-bit words. Contents survive process restarts; producers
//! and consumers coordinate purely through CAS and release/acquire stores
//! on the mapped header, with no locks anywhere.
//!
//! # Key features
//!
//! - Reserve / commit protocol on both sides: records become visible (and
//!   are recycled) strictly in reservation order
//! - Typed random access into a reserved slot: fixed-width integers,
//!   floats, length-prefixed strings, tagged IPs, nullmask bits
//! - Archive mode (producers fail when full) or wrap mode (producers lap
//!   the consumer)
//! - A time envelope (`tmin`/`tmax`) maintained over the live records
//! - Crash repair: uncommitted reservations of a dead producer are
//!   discarded by [`Ring::repair`]
//!
//! # Example
//!
//! ```
//! use ringfile::Ring;
//!
//! let dir = tempfile::tempdir().unwrap();
//! let path = dir.path().join("queue.ring");
//! Ring::create(false, 1024, &path).unwrap();
//! let ring = Ring::load(&path).unwrap();
//!
//! // Typed write into a reserved slot
//! let mut tx = ring.reserve(8).unwrap();
//! tx.write_u32(0, 7);
//! tx.write_u32(4, 11);
//! tx.commit(1.0, 2.0);
//!
//! // Typed read back
//! let tx = ring.dequeue_reserve().unwrap();
//! assert_eq!(tx.read_u32(0), 7);
//! assert_eq!(tx.read_u32(4), 11);
//! tx.release();
//! ```
//!
//! Unix only: the mapping layer relies on `mmap(MAP_SHARED)`.

mod error;
mod file;
mod invariants;
mod parse;
mod ring;
mod tx;

pub use error::RingError;
pub use file::Stats;
pub use parse::parse_float;
pub use ring::{Ring, MAX_MSG_SIZE};
pub use tx::Tx;
