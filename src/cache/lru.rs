// Recency order over a fixed set of cache slots.
//
// An index-linked doubly-linked list over a fixed array: links are
// `Option<SlotId>` indices, never pointers. Every slot is linked at all
// times, so the list is never empty and its length never changes.

use std::num::NonZeroUsize;

use super::SlotId;

#[derive(Debug, Clone, Copy, Default)]
struct Link {
    prev: Option<SlotId>,
    next: Option<SlotId>,
}

/// Front is least recently used, back is most recently used.
#[derive(Debug, Clone)]
pub struct LruDirectory {
    links: Vec<Link>,
    head: SlotId,
    tail: SlotId,
}

impl LruDirectory {
    /// All slots, linked in index order: slot 0 is evicted first.
    pub fn new(capacity: NonZeroUsize) -> Self {
        let n = capacity.get();
        let links = (0..n)
            .map(|i| Link {
                prev: i.checked_sub(1),
                next: (i + 1 < n).then_some(i + 1),
            })
            .collect();
        Self {
            links,
            head: 0,
            tail: n - 1,
        }
    }

    /// Number of slots tracked; every slot stays linked.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.links.len()
    }

    /// The least recently used slot.
    #[inline]
    pub fn lru(&self) -> SlotId {
        self.head
    }

    /// The most recently used slot.
    #[inline]
    pub fn mru(&self) -> SlotId {
        self.tail
    }

    /// Move `id` to the back.
    pub fn touch(&mut self, id: SlotId) {
        if self.tail == id {
            return;
        }
        self.unlink(id);
        let old_tail = self.tail;
        self.links[old_tail].next = Some(id);
        self.links[id] = Link {
            prev: Some(old_tail),
            next: None,
        };
        self.tail = id;
    }

    /// Move `id` to the front, making it the next eviction candidate.
    pub fn demote(&mut self, id: SlotId) {
        if self.head == id {
            return;
        }
        self.unlink(id);
        let old_head = self.head;
        self.links[old_head].prev = Some(id);
        self.links[id] = Link {
            prev: None,
            next: Some(old_head),
        };
        self.head = id;
    }

    /// Slots from least to most recently used.
    pub fn iter(&self) -> Iter<'_> {
        Iter {
            dir: self,
            current: Some(self.head),
        }
    }

    // Detach `id` from its neighbours. Only called when `id` is neither the
    // only slot nor at the end it is about to be relinked to, so the list
    // keeps at least one other slot for `head`/`tail`.
    fn unlink(&mut self, id: SlotId) {
        let Link { prev, next } = self.links[id];
        match prev {
            Some(p) => self.links[p].next = next,
            None => {
                if let Some(n) = next {
                    self.head = n;
                }
            }
        }
        match next {
            Some(n) => self.links[n].prev = prev,
            None => {
                if let Some(p) = prev {
                    self.tail = p;
                }
            }
        }
    }
}

pub struct Iter<'a> {
    dir: &'a LruDirectory,
    current: Option<SlotId>,
}

impl Iterator for Iter<'_> {
    type Item = SlotId;

    fn next(&mut self) -> Option<SlotId> {
        let id = self.current?;
        self.current = self.dir.links[id].next;
        Some(id)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.dir.capacity()))
    }
}
