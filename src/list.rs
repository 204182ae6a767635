use crate::chunk::Chunk;

/// Intrusive doubly linked list of free chunks.
///
/// The list never allocates: the links live inside the headers of the
/// chunks it holds (see [`crate::chunk::Header`]), so a chunk can only be
/// in one list at a time.
///
/// ```text
///        head
///         |
///   +-----v-----+  next   +-----------+  next   +-----------+
///   |   Chunk   | ------> |   Chunk   | ------> |   Chunk   | -> None
///   |  (free)   | <------ |  (free)   | <------ |  (free)   |
///   +-----------+  prev   +-----------+  prev   +-----------+
/// ```
pub(crate) struct List {
    head: Option<Chunk>,
    len: usize,
}

pub(crate) struct Iter {
    current: Option<Chunk>,
    remaining: usize,
}

impl List {
    pub const fn new() -> Self {
        Self { head: None, len: 0 }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Pushes `chunk` at the front of the list in O(1).
    ///
    /// **SAFETY**: `chunk` must be a valid chunk which is not linked in any list.
    pub unsafe fn push_front(&mut self, chunk: Chunk) {
        unsafe {
            chunk.set_prev_free(None);
            chunk.set_next_free(self.head);

            if let Some(head) = self.head {
                head.set_prev_free(Some(chunk));
            }
        }

        self.head = Some(chunk);
        self.len += 1;
    }

    /// Unlinks `chunk` in O(1).
    ///
    /// **SAFETY**: `chunk` must currently be linked in this list.
    pub unsafe fn remove(&mut self, chunk: Chunk) {
        unsafe {
            let next = chunk.next_free();
            let prev = chunk.prev_free();

            match prev {
                Some(prev) => prev.set_next_free(next),
                None => {
                    debug_assert_eq!(self.head, Some(chunk));
                    self.head = next;
                }
            }

            if let Some(next) = next {
                next.set_prev_free(prev);
            }

            chunk.set_next_free(None);
            chunk.set_prev_free(None);
        }

        self.len -= 1;
    }

    pub fn iter(&self) -> Iter {
        Iter {
            current: self.head,
            remaining: self.len,
        }
    }
}

impl Iterator for Iter {
    type Item = Chunk;

    fn next(&mut self) -> Option<Self::Item> {
        // `remaining` bounds the walk even if the links were corrupted into a cycle.
        if self.remaining == 0 {
            return None;
        }

        let chunk = self.current?;

        unsafe {
            self.current = chunk.next_free();
        }
        self.remaining -= 1;

        Some(chunk)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.remaining))
    }
}

impl<'a> IntoIterator for &'a List {
    type Item = Chunk;
    type IntoIter = Iter;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
