use crate::util::object_forwarding;
use crate::util::object_model::MarkWord;
use crate::util::ObjectReference;

/// Original mark words of objects that were self-forwarded because they could not be
/// promoted.
#[derive(Debug, Default)]
pub struct PreservedMarks {
    entries: Vec<(ObjectReference, MarkWord)>,
}

impl PreservedMarks {
    pub fn push(&mut self, object: ObjectReference, mark: MarkWord) {
        debug_assert!(!mark.is_forwarded());
        self.entries.push((object, mark));
    }

    /// Put every preserved mark back in its object's header and empty the table. Returns
    /// the number of objects restored.
    pub fn restore_all(&mut self) -> usize {
        let n = self.entries.len();
        for (object, mark) in self.entries.drain(..) {
            debug_assert!(object_forwarding::is_self_forwarded(object));
            object_forwarding::restore_mark(object, mark);
        }
        n
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
