//! The heap object layout.
//!
//! Every object starts with two header words:
//!
//! ```text
//! word 0: mark word   [ hash (upper bits) | age (4 bits) | unused (1 bit) | tag (2 bits) ]
//! word 1: shape word  [ payload description                               | kind (2 bits) ]
//! word 2..: payload, reference fields first
//! ```
//!
//! The mark word doubles as the forwarding pointer once an object has been copied: the
//! destination address with both tag bits set. Objects start and end on
//! [`OBJECT_ALIGNMENT`], so the low tag bits of any object address are free.

use crate::util::constants::*;
use crate::util::conversions;
use crate::util::{Address, ObjectReference};

use static_assertions::const_assert;

/// Number of header words in front of every object's payload.
pub const HEADER_WORDS: usize = 2;
/// The smallest object is a bare header. Any aligned gap can therefore hold a filler.
pub const MIN_OBJECT_SIZE: usize = HEADER_WORDS << LOG_BYTES_IN_WORD;

const_assert!(MIN_OBJECT_SIZE <= OBJECT_ALIGNMENT);
const_assert!(OBJECT_ALIGNMENT % MIN_OBJECT_SIZE == 0);

const TAG_BITS: usize = 2;
const TAG_MASK: usize = (1 << TAG_BITS) - 1;
const TAG_NEUTRAL: usize = 0b01;
const TAG_FORWARDED: usize = 0b11;

const AGE_SHIFT: usize = 3;
const AGE_BITS: usize = 4;
const AGE_MASK: usize = (1 << AGE_BITS) - 1;
/// The largest age a mark word can record.
pub const MAX_AGE: usize = AGE_MASK;

const HASH_SHIFT: usize = AGE_SHIFT + AGE_BITS + 1;
const HASH_BITS: usize = 31;
const HASH_MASK: usize = (1 << HASH_BITS) - 1;

const_assert!(HASH_SHIFT + HASH_BITS <= BITS_IN_WORD);
const_assert!(OBJECT_ALIGNMENT > TAG_MASK);

/// The first header word of an object, as a value.
#[repr(transparent)]
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct MarkWord(usize);

impl MarkWord {
    /// The mark word of a freshly allocated object: age zero, no hash.
    pub const fn prototype() -> Self {
        MarkWord(TAG_NEUTRAL)
    }

    pub const fn from_raw(raw: usize) -> Self {
        MarkWord(raw)
    }

    pub const fn raw(self) -> usize {
        self.0
    }

    /// Encode a forwarding pointer to `dest`.
    pub fn encode_forwarded(dest: ObjectReference) -> Self {
        debug_assert!(
            dest.to_raw_address().is_aligned_to(OBJECT_ALIGNMENT),
            "forwarding target {} is not object aligned",
            dest
        );
        MarkWord(dest.value() | TAG_FORWARDED)
    }

    pub const fn is_forwarded(self) -> bool {
        self.0 & TAG_MASK == TAG_FORWARDED
    }

    /// The destination recorded in a forwarded mark word.
    pub fn forwardee(self) -> ObjectReference {
        debug_assert!(self.is_forwarded());
        ObjectReference::from_raw_address(unsafe { Address::from_usize(self.0 & !TAG_MASK) })
    }

    pub const fn age(self) -> usize {
        (self.0 >> AGE_SHIFT) & AGE_MASK
    }

    pub const fn with_age(self, age: usize) -> Self {
        MarkWord((self.0 & !(AGE_MASK << AGE_SHIFT)) | ((age & AGE_MASK) << AGE_SHIFT))
    }

    /// One more survived cycle. Saturates at [`MAX_AGE`].
    pub fn incr_age(self) -> Self {
        if self.age() == MAX_AGE {
            self
        } else {
            self.with_age(self.age() + 1)
        }
    }

    pub const fn hash(self) -> usize {
        (self.0 >> HASH_SHIFT) & HASH_MASK
    }

    pub const fn with_hash(self, hash: usize) -> Self {
        MarkWord((self.0 & !(HASH_MASK << HASH_SHIFT)) | ((hash & HASH_MASK) << HASH_SHIFT))
    }
}

impl std::fmt::Debug for MarkWord {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        if self.is_forwarded() {
            write!(f, "MarkWord(forwarded -> {})", self.forwardee())
        } else {
            write!(f, "MarkWord(age={}, hash={:#x})", self.age(), self.hash())
        }
    }
}

const KIND_BITS: usize = 2;
const KIND_MASK: usize = (1 << KIND_BITS) - 1;
const KIND_INSTANCE: usize = 1;
const KIND_OBJ_ARRAY: usize = 2;
const KIND_FILLER: usize = 3;
const INSTANCE_REFS_BITS: usize = 28;
const INSTANCE_REFS_MASK: usize = (1 << INSTANCE_REFS_BITS) - 1;

/// What an object looks like beyond its header. Recorded in the second header word.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Shape {
    /// A plain object with `refs` reference fields followed by `data_words` words of raw data.
    Instance { refs: usize, data_words: usize },
    /// An array whose elements are all references.
    ObjArray { length: usize },
    /// A dead object covering `words` words (header included), keeping the heap parseable.
    Filler { words: usize },
}

impl Shape {
    pub fn encode(self) -> usize {
        match self {
            Shape::Instance { refs, data_words } => {
                debug_assert!(refs <= INSTANCE_REFS_MASK);
                (data_words << (KIND_BITS + INSTANCE_REFS_BITS))
                    | (refs << KIND_BITS)
                    | KIND_INSTANCE
            }
            Shape::ObjArray { length } => (length << KIND_BITS) | KIND_OBJ_ARRAY,
            Shape::Filler { words } => (words << KIND_BITS) | KIND_FILLER,
        }
    }

    pub fn decode(raw: usize) -> Self {
        let payload = raw >> KIND_BITS;
        match raw & KIND_MASK {
            KIND_INSTANCE => Shape::Instance {
                refs: payload & INSTANCE_REFS_MASK,
                data_words: payload >> INSTANCE_REFS_BITS,
            },
            KIND_OBJ_ARRAY => Shape::ObjArray { length: payload },
            KIND_FILLER => Shape::Filler { words: payload },
            _ => panic!("Corrupt shape word {:#x}", raw),
        }
    }

    /// Number of reference slots in the payload.
    pub fn num_refs(self) -> usize {
        match self {
            Shape::Instance { refs, .. } => refs,
            Shape::ObjArray { length } => length,
            Shape::Filler { .. } => 0,
        }
    }

    /// The object size in bytes, rounded up to the object alignment.
    pub fn size_in_bytes(self) -> usize {
        let words = match self {
            Shape::Instance { refs, data_words } => HEADER_WORDS + refs + data_words,
            Shape::ObjArray { length } => HEADER_WORDS + length,
            Shape::Filler { words } => return conversions::words_to_bytes(words),
        };
        conversions::align_object_size(conversions::words_to_bytes(words))
    }
}

fn mark_word_address(object: ObjectReference) -> Address {
    object.to_raw_address()
}

fn shape_word_address(object: ObjectReference) -> Address {
    object.to_raw_address().plus_words(1)
}

/// Address of the header word that holds the mark word, which is what forwarding races on.
pub fn header_address(object: ObjectReference) -> Address {
    mark_word_address(object)
}

pub fn shape(object: ObjectReference) -> Shape {
    Shape::decode(unsafe { shape_word_address(object).load::<usize>() })
}

/// The size of the object in bytes.
pub fn object_size(object: ObjectReference) -> usize {
    shape(object).size_in_bytes()
}

/// The address of the `index`-th reference slot of the object.
pub fn ref_slot(object: ObjectReference, index: usize) -> Address {
    debug_assert!(index < shape(object).num_refs());
    object.to_raw_address().plus_words(HEADER_WORDS + index)
}

/// The address of the `index`-th raw data word of an instance.
pub fn data_word(object: ObjectReference, index: usize) -> Address {
    match shape(object) {
        Shape::Instance { refs, data_words } => {
            debug_assert!(index < data_words);
            object.to_raw_address().plus_words(HEADER_WORDS + refs + index)
        }
        s => panic!("{} is not an instance: {:?}", object, s),
    }
}

/// Call `f` on every reference slot of the object.
pub fn for_each_ref_slot<F: FnMut(Address)>(object: ObjectReference, mut f: F) {
    let first = object.to_raw_address().plus_words(HEADER_WORDS);
    for i in 0..shape(object).num_refs() {
        f(first.plus_words(i));
    }
}

/// Load the reference held in a slot.
pub fn load_slot(slot: Address) -> ObjectReference {
    ObjectReference::from_raw_address(unsafe { slot.load::<Address>() })
}

/// Store a reference into a slot.
pub fn store_slot(slot: Address, value: ObjectReference) {
    unsafe { slot.store::<Address>(value.to_raw_address()) }
}

/// Non-atomic read of the mark word. Only for single threaded phases.
pub fn read_mark(object: ObjectReference) -> MarkWord {
    MarkWord::from_raw(unsafe { mark_word_address(object).load::<usize>() })
}

/// Non-atomic write of the mark word. Only for objects no other thread can see yet, or for
/// single threaded phases.
pub fn write_mark(object: ObjectReference, mark: MarkWord) {
    unsafe { mark_word_address(object).store::<usize>(mark.raw()) }
}

fn write_header(start: Address, mark: MarkWord, shape: Shape) -> ObjectReference {
    debug_assert!(start.is_aligned_to(OBJECT_ALIGNMENT), "{} is not object aligned", start);
    unsafe {
        start.store::<usize>(mark.raw());
        start.plus_words(1).store::<usize>(shape.encode());
    }
    ObjectReference::from_raw_address(start)
}

/// Format `start` as an instance with null reference fields and zeroed data.
pub fn initialize_instance(start: Address, refs: usize, data_words: usize) -> ObjectReference {
    let shape = Shape::Instance { refs, data_words };
    let object = write_header(start, MarkWord::prototype(), shape);
    crate::util::memory::zero(
        start.plus_words(HEADER_WORDS),
        shape.size_in_bytes() - MIN_OBJECT_SIZE,
    );
    object
}

/// Format `start` as an object array of `length` null elements.
pub fn initialize_array(start: Address, length: usize) -> ObjectReference {
    let shape = Shape::ObjArray { length };
    let object = write_header(start, MarkWord::prototype(), shape);
    crate::util::memory::zero(
        start.plus_words(HEADER_WORDS),
        shape.size_in_bytes() - MIN_OBJECT_SIZE,
    );
    object
}

/// Overwrite `[start, start + bytes)` with a single inert filler object.
pub fn fill_with_object(start: Address, bytes: usize) {
    if bytes == 0 {
        return;
    }
    assert!(
        bytes >= MIN_OBJECT_SIZE && conversions::raw_is_aligned(bytes, OBJECT_ALIGNMENT),
        "Cannot fill {} bytes at {}",
        bytes,
        start
    );
    write_header(
        start,
        MarkWord::prototype(),
        Shape::Filler {
            words: conversions::bytes_to_words(bytes),
        },
    );
}

pub fn is_filler(object: ObjectReference) -> bool {
    matches!(shape(object), Shape::Filler { .. })
}

/// Copy `bytes` bytes of the object at `from` to `to`. The regions must not overlap.
pub fn copy_object_words(from: ObjectReference, to: Address, bytes: usize) {
    unsafe {
        std::ptr::copy_nonoverlapping(
            from.to_raw_address().to_ptr::<usize>(),
            to.to_mut_ptr::<usize>(),
            conversions::bytes_to_words(bytes),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::memory::MmapRegion;

    #[test]
    fn mark_word_fields_are_independent() {
        let m = MarkWord::prototype().with_hash(0x1234).with_age(5);
        assert_eq!(m.age(), 5);
        assert_eq!(m.hash(), 0x1234);
        assert!(!m.is_forwarded());
        let m = m.incr_age();
        assert_eq!(m.age(), 6);
        assert_eq!(m.hash(), 0x1234);
    }

    #[test]
    fn age_saturates() {
        let m = MarkWord::prototype().with_age(MAX_AGE);
        assert_eq!(m.incr_age().age(), MAX_AGE);
    }

    #[test]
    fn forwarded_mark_word() {
        let dest = ObjectReference::from_raw_address(unsafe { Address::from_usize(0x7f00_0010) });
        let m = MarkWord::encode_forwarded(dest);
        assert!(m.is_forwarded());
        assert_eq!(m.forwardee(), dest);
    }

    #[test]
    fn shape_round_trips_through_header() {
        for s in [
            Shape::Instance { refs: 3, data_words: 5 },
            Shape::ObjArray { length: 1000 },
            Shape::Filler { words: 8 },
        ] {
            assert_eq!(Shape::decode(s.encode()), s);
        }
    }

    #[test]
    fn sizes_are_aligned() {
        assert_eq!(Shape::Instance { refs: 0, data_words: 0 }.size_in_bytes(), MIN_OBJECT_SIZE);
        assert_eq!(
            Shape::Instance { refs: 1, data_words: 0 }.size_in_bytes(),
            2 * OBJECT_ALIGNMENT
        );
        assert_eq!(
            Shape::ObjArray { length: 2 }.size_in_bytes(),
            2 * OBJECT_ALIGNMENT
        );
    }

    #[test]
    fn initialize_and_fill() {
        let region = MmapRegion::new(BYTES_IN_PAGE).unwrap();
        let start = region.start();
        let obj = initialize_instance(start, 2, 1);
        assert_eq!(object_size(obj), Shape::Instance { refs: 2, data_words: 1 }.size_in_bytes());
        assert!(load_slot(ref_slot(obj, 0)).is_null());
        store_slot(ref_slot(obj, 1), obj);
        let mut slots = vec![];
        for_each_ref_slot(obj, |s| slots.push(load_slot(s)));
        assert_eq!(slots, vec![ObjectReference::NULL, obj]);

        let gap = start + object_size(obj);
        fill_with_object(gap, 4 * OBJECT_ALIGNMENT);
        let filler = ObjectReference::from_raw_address(gap);
        assert!(is_filler(filler));
        assert_eq!(object_size(filler), 4 * OBJECT_ALIGNMENT);
        assert!(!read_mark(filler).is_forwarded());
    }
}
