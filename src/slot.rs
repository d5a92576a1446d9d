use crate::entry::{SlotRef, TimerEntry};
use parking_lot::Mutex;
use std::sync::Arc;

const NIL: usize = usize::MAX;

enum Node {
    Occupied {
        entry: Arc<TimerEntry>,
        prev: usize, // NIL at the list head
        next: usize, // NIL at the list tail
    },
    Free(usize), // next free node, NIL terminated
}

/// Doubly-linked list of entries over a free-list arena.
///
/// Keys are arena indices and stay stable while an entry is linked, which is
/// what gives erase its O(1) cost. Vacated nodes are threaded onto a free
/// list and reused by later pushes, so a slot stops allocating once it has
/// seen its high-water mark.
struct EntryList {
    nodes: Vec<Node>,
    free_head: usize,
    head: usize,
    tail: usize,
    len: usize,
}

impl EntryList {
    fn new() -> Self {
        Self {
            nodes: Vec::new(),
            free_head: NIL,
            head: NIL,
            tail: NIL,
            len: 0,
        }
    }

    /// Link an entry at the tail. Returns its arena key.
    fn push(&mut self, entry: Arc<TimerEntry>) -> usize {
        let node = Node::Occupied {
            entry,
            prev: self.tail,
            next: NIL,
        };

        let key = if self.free_head != NIL {
            let key = self.free_head;
            match self.nodes[key] {
                Node::Free(next_free) => self.free_head = next_free,
                Node::Occupied { .. } => panic!("corrupted free list"),
            }
            self.nodes[key] = node;
            key
        } else {
            self.nodes.push(node);
            self.nodes.len() - 1
        };

        if self.tail != NIL {
            if let Node::Occupied { next, .. } = &mut self.nodes[self.tail] {
                *next = key;
            }
        } else {
            self.head = key;
        }
        self.tail = key;
        self.len += 1;
        key
    }

    /// Unlink the entry at `key`, but only if it is `expected` itself.
    ///
    /// The identity check is what makes a stale back-reference safe: after a
    /// cascade has moved the entry elsewhere, `key` may point at a vacant
    /// node or at some other entry that reused it, and both cases refuse.
    fn erase(&mut self, key: usize, expected: &Arc<TimerEntry>) -> Option<Arc<TimerEntry>> {
        let (prev, next) = match self.nodes.get(key) {
            Some(Node::Occupied { entry, prev, next }) if Arc::ptr_eq(entry, expected) => {
                (*prev, *next)
            }
            _ => return None,
        };

        if prev != NIL {
            if let Node::Occupied { next: n, .. } = &mut self.nodes[prev] {
                *n = next;
            }
        } else {
            self.head = next;
        }
        if next != NIL {
            if let Node::Occupied { prev: p, .. } = &mut self.nodes[next] {
                *p = prev;
            }
        } else {
            self.tail = prev;
        }

        let old = std::mem::replace(&mut self.nodes[key], Node::Free(self.free_head));
        self.free_head = key;
        self.len -= 1;
        match old {
            Node::Occupied { entry, .. } => Some(entry),
            Node::Free(_) => unreachable!(),
        }
    }

    /// Empty the whole list into `out`, head first.
    fn drain_into(&mut self, out: &mut Vec<Arc<TimerEntry>>) {
        let mut idx = self.head;
        while idx != NIL {
            let old = std::mem::replace(&mut self.nodes[idx], Node::Free(self.free_head));
            self.free_head = idx;
            match old {
                Node::Occupied { entry, next, .. } => {
                    out.push(entry);
                    idx = next;
                }
                Node::Free(_) => panic!("corrupted entry list"),
            }
        }
        self.head = NIL;
        self.tail = NIL;
        self.len = 0;
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.len
    }
}

/// One bucket of a level: entries whose remaining time currently shares the
/// same radix digit.
///
/// Pushed by arming threads, drained by the driver, erased by canceling
/// threads; a short-held mutex covers each of those against the others.
pub(crate) struct Slot {
    list: Mutex<EntryList>,
}

impl Slot {
    pub fn new() -> Self {
        Self {
            list: Mutex::new(EntryList::new()),
        }
    }

    /// Link `entry` into this slot and record the back-reference while the
    /// lock is held, so no observer can see the entry linked but unlocatable.
    pub fn push(&self, entry: &Arc<TimerEntry>, level: usize, slot: usize) {
        let mut list = self.list.lock();
        let key = list.push(entry.clone());
        entry.link(SlotRef { level, slot, key });
    }

    /// O(1) erase by identity. Returns the slot's ownership share of the
    /// entry on success; `None` means the entry is no longer here (a
    /// concurrent drain got to it first) and somebody else owns its release.
    pub fn erase(&self, key: usize, expected: &Arc<TimerEntry>) -> Option<Arc<TimerEntry>> {
        let mut list = self.list.lock();
        let owned = list.erase(key, expected)?;
        owned.unlink();
        Some(owned)
    }

    /// Take every linked entry, in FIFO order, clearing back-references
    /// before the lock drops.
    pub fn drain(&self, out: &mut Vec<Arc<TimerEntry>>) {
        let start = out.len();
        let mut list = self.list.lock();
        list.drain_into(out);
        for entry in &out[start..] {
            entry.unlink();
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.list.lock().len()
    }
}
