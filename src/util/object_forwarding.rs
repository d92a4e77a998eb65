//! Forwarding state kept in the mark word.
//!
//! An object goes from unforwarded to forwarded exactly once per cycle, through
//! [`forward_to_atomic`]. Everything else only reads the header.

use crate::util::object_model::{self, MarkWord};
use crate::util::ObjectReference;
use std::sync::atomic::{AtomicUsize, Ordering};

/// The forwarding state of an object as decoded from one load of its header.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum HeaderState {
    /// The header still holds the object's own mark word.
    Unforwarded(MarkWord),
    /// The object has been claimed. The destination equals the object itself when its
    /// promotion failed and it stays in place.
    Forwarded(ObjectReference),
}

/// Load the header once, with acquire ordering so that a forwardee read from it is safe to
/// dereference.
pub fn header_state(object: ObjectReference) -> HeaderState {
    let raw = unsafe {
        object_model::header_address(object).atomic_load::<AtomicUsize>(Ordering::Acquire)
    };
    let mark = MarkWord::from_raw(raw);
    if mark.is_forwarded() {
        HeaderState::Forwarded(mark.forwardee())
    } else {
        HeaderState::Unforwarded(mark)
    }
}

/// Attempt the single unforwarded to forwarded transition. `expected` must be the mark word
/// observed in an earlier [`header_state`] call. On success every later reader sees `dest`.
/// On failure the winning destination is returned.
pub fn forward_to_atomic(
    object: ObjectReference,
    expected: MarkWord,
    dest: ObjectReference,
) -> Result<(), ObjectReference> {
    debug_assert!(!expected.is_forwarded());
    let new = MarkWord::encode_forwarded(dest);
    let result = unsafe {
        object_model::header_address(object).compare_exchange::<AtomicUsize>(
            expected.raw(),
            new.raw(),
            Ordering::AcqRel,
            Ordering::Acquire,
        )
    };
    match result {
        Ok(_) => Ok(()),
        Err(current) => {
            let current = MarkWord::from_raw(current);
            // The header of an unforwarded object never changes during a cycle.
            assert!(
                current.is_forwarded(),
                "Header of {} changed under us: expected {:?}, found {:?}",
                object,
                expected,
                current
            );
            Err(current.forwardee())
        }
    }
}

/// Claim an object in place: forward it to itself. Used when promotion fails.
pub fn forward_to_self(object: ObjectReference, expected: MarkWord) -> Result<(), ObjectReference> {
    forward_to_atomic(object, expected, object)
}

pub fn is_forwarded(object: ObjectReference) -> bool {
    matches!(header_state(object), HeaderState::Forwarded(_))
}

/// Whether the object failed promotion and was claimed in place.
pub fn is_self_forwarded(object: ObjectReference) -> bool {
    header_state(object) == HeaderState::Forwarded(object)
}

/// The recorded destination of a forwarded object.
pub fn forwardee(object: ObjectReference) -> ObjectReference {
    match header_state(object) {
        HeaderState::Forwarded(to) => to,
        HeaderState::Unforwarded(mark) => {
            panic!("{} is not forwarded: {:?}", object, mark)
        }
    }
}

/// Put a preserved mark word back. Only valid outside the parallel phase.
pub fn restore_mark(object: ObjectReference, mark: MarkWord) {
    debug_assert!(!mark.is_forwarded());
    unsafe {
        object_model::header_address(object)
            .atomic_store::<AtomicUsize>(mark.raw(), Ordering::Release)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::constants::BYTES_IN_PAGE;
    use crate::util::memory::MmapRegion;
    use crate::util::object_model::initialize_instance;
    use crate::util::Address;
    use std::sync::{Arc, Barrier};

    #[test]
    fn forward_once() {
        let region = MmapRegion::new(BYTES_IN_PAGE).unwrap();
        let obj = initialize_instance(region.start(), 1, 0);
        let copy = initialize_instance(region.start() + 256usize, 1, 0);
        let other = initialize_instance(region.start() + 512usize, 1, 0);

        let mark = match header_state(obj) {
            HeaderState::Unforwarded(m) => m,
            s => panic!("unexpected {:?}", s),
        };
        assert_eq!(forward_to_atomic(obj, mark, copy), Ok(()));
        assert_eq!(forward_to_atomic(obj, mark, other), Err(copy));
        assert_eq!(forwardee(obj), copy);
        assert!(!is_self_forwarded(obj));
    }

    #[test]
    fn self_forward_and_restore() {
        let region = MmapRegion::new(BYTES_IN_PAGE).unwrap();
        let obj = initialize_instance(region.start(), 0, 1);
        let mark = object_model::read_mark(obj).with_hash(77);
        object_model::write_mark(obj, mark);
        assert_eq!(forward_to_self(obj, mark), Ok(()));
        assert!(is_self_forwarded(obj));
        restore_mark(obj, mark);
        assert_eq!(header_state(obj), HeaderState::Unforwarded(mark));
    }

    #[test]
    fn racing_threads_agree_on_one_forwardee() {
        const THREADS: usize = 8;
        let region = MmapRegion::new(BYTES_IN_PAGE).unwrap();
        let obj = initialize_instance(region.start(), 0, 0);
        let mark = object_model::read_mark(obj);
        let base = region.start().as_usize();
        let barrier = Arc::new(Barrier::new(THREADS));

        let results: Vec<(ObjectReference, ObjectReference)> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..THREADS)
                .map(|i| {
                    let barrier = barrier.clone();
                    s.spawn(move || {
                        let obj =
                            ObjectReference::from_raw_address(unsafe { Address::from_usize(base) });
                        let mine = ObjectReference::from_raw_address(unsafe {
                            Address::from_usize(base + 64 * (i + 1))
                        });
                        barrier.wait();
                        let winner = match forward_to_atomic(obj, mark, mine) {
                            Ok(()) => mine,
                            Err(w) => w,
                        };
                        (mine, winner)
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        let winners: Vec<_> = results.iter().filter(|(mine, w)| mine == w).collect();
        assert_eq!(winners.len(), 1);
        let recorded = forwardee(obj);
        assert!(results.iter().all(|(_, w)| *w == recorded));
        for _ in 0..100 {
            assert_eq!(forwardee(obj), recorded);
        }
    }
}
