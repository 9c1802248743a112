//! Binary min-heap timer keyed by connection id, with a side index for
//! O(1) id-to-heap-position lookup.
//!
//! Ported from the original server's `heapTimer`. The `sift_up` here
//! fixes the unsigned-loop-variable bug in the original: `parent =
//! (i - 1) / 2` underflows to `usize::MAX` once `i` reaches the root
//! under unsigned arithmetic, looping forever. We stop the loop
//! explicitly on `i == 0` instead of trusting the computed parent index.

use std::collections::HashMap;
use std::time::{Duration, Instant};

pub type ConnId = usize;

struct TimerNode {
    id: ConnId,
    expires: Instant,
    callback: Box<dyn FnOnce() + Send>,
}

pub struct TimerHeap {
    heap: Vec<TimerNode>,
    index: HashMap<ConnId, usize>,
}

impl Default for TimerHeap {
    fn default() -> Self {
        TimerHeap::new()
    }
}

impl TimerHeap {
    pub fn new() -> Self {
        TimerHeap {
            heap: Vec::with_capacity(64),
            index: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Adds a new timer, or reschedules and replaces the callback for
    /// an id that already has one.
    pub fn add(&mut self, id: ConnId, timeout: Duration, callback: impl FnOnce() + Send + 'static) {
        if let Some(&i) = self.index.get(&id) {
            self.heap[i].expires = Instant::now() + timeout;
            self.heap[i].callback = Box::new(callback);
            if !self.sift_down(i, self.heap.len()) {
                self.sift_up(i);
            }
        } else {
            let n = self.heap.len();
            self.index.insert(id, n);
            self.heap.push(TimerNode {
                id,
                expires: Instant::now() + timeout,
                callback: Box::new(callback),
            });
            self.sift_up(n);
        }
    }

    /// Reschedules an existing id's expiry without touching its
    /// callback. The new deadline may land earlier or later than
    /// before, so both directions must be tried.
    pub fn adjust(&mut self, id: ConnId, timeout: Duration) {
        let Some(&i) = self.index.get(&id) else { return };
        self.heap[i].expires = Instant::now() + timeout;
        if !self.sift_down(i, self.heap.len()) {
            self.sift_up(i);
        }
    }

    /// Runs and removes every node whose deadline has passed.
    pub fn tick(&mut self) {
        while let Some(node) = self.heap.first() {
            if node.expires > Instant::now() {
                break;
            }
            let node = self.delete(0);
            (node.callback)();
        }
    }

    /// Removes `id` immediately, running its callback, regardless of
    /// whether it has expired yet.
    pub fn remove_target(&mut self, id: ConnId) {
        let Some(&i) = self.index.get(&id) else { return };
        let node = self.delete(i);
        (node.callback)();
    }

    pub fn clear(&mut self) {
        self.heap.clear();
        self.index.clear();
    }

    /// Milliseconds until the next expiry, running `tick` first so an
    /// already-due node never reports a nonzero wait.
    pub fn next_tick_ms(&mut self) -> Option<u64> {
        self.tick();
        self.heap.first().map(|node| {
            let remaining = node.expires.saturating_duration_since(Instant::now());
            remaining.as_millis() as u64
        })
    }

    fn delete(&mut self, i: usize) -> TimerNode {
        let last = self.heap.len() - 1;
        if i < last {
            self.swap(i, last);
            if !self.sift_down(i, last) {
                self.sift_up(i);
            }
        }
        let node = self.heap.pop().expect("delete called on empty heap");
        self.index.remove(&node.id);
        node
    }

    fn sift_up(&mut self, mut i: usize) {
        while i > 0 {
            let parent = (i - 1) / 2;
            if self.heap[parent].expires > self.heap[i].expires {
                self.swap(i, parent);
                i = parent;
            } else {
                break;
            }
        }
    }

    /// Returns whether the node actually moved down.
    fn sift_down(&mut self, mut i: usize, n: usize) -> bool {
        let start = i;
        loop {
            let mut child = i * 2 + 1;
            if child >= n {
                break;
            }
            if child + 1 < n && self.heap[child + 1].expires < self.heap[child].expires {
                child += 1;
            }
            if self.heap[child].expires < self.heap[i].expires {
                self.swap(i, child);
                i = child;
            } else {
                break;
            }
        }
        i > start
    }

    fn swap(&mut self, i: usize, j: usize) {
        self.heap.swap(i, j);
        self.index.insert(self.heap[i].id, i);
        self.index.insert(self.heap[j].id, j);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn earliest_expiry_fires_first() {
        let fired = Arc::new(std::sync::Mutex::new(Vec::new()));
        let mut heap = TimerHeap::new();
        for (id, ms) in [(1, 30), (2, 10), (3, 20)] {
            let fired = fired.clone();
            heap.add(id, Duration::from_millis(ms), move || fired.lock().unwrap().push(id));
        }
        std::thread::sleep(Duration::from_millis(40));
        heap.tick();
        assert_eq!(*fired.lock().unwrap(), vec![2, 3, 1]);
        assert!(heap.is_empty());
    }

    #[test]
    fn adjust_reschedules_without_running_callback() {
        let fired = Arc::new(AtomicUsize::new(0));
        let mut heap = TimerHeap::new();
        {
            let fired = fired.clone();
            heap.add(1, Duration::from_millis(5), move || {
                fired.fetch_add(1, Ordering::SeqCst);
            });
        }
        heap.adjust(1, Duration::from_millis(500));
        std::thread::sleep(Duration::from_millis(20));
        heap.tick();
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert_eq!(heap.len(), 1);
    }

    #[test]
    fn adjust_sifts_up_when_deadline_shrinks_below_parent() {
        let mut heap = TimerHeap::new();
        heap.add(1, Duration::from_millis(100), || {});
        heap.add(2, Duration::from_millis(200), || {});
        heap.add(3, Duration::from_millis(300), || {});
        // id 3 starts as a leaf; shrinking its deadline below its
        // ancestors must bubble it back up, not just sift down in place.
        heap.adjust(3, Duration::from_millis(1));
        assert_eq!(heap.heap[0].id, 3);
    }

    #[test]
    fn remove_target_runs_callback_immediately() {
        let fired = Arc::new(AtomicUsize::new(0));
        let mut heap = TimerHeap::new();
        let f2 = fired.clone();
        heap.add(1, Duration::from_secs(60), move || {
            f2.fetch_add(1, Ordering::SeqCst);
        });
        heap.remove_target(1);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(heap.is_empty());
    }

    #[test]
    fn sift_up_does_not_loop_forever_when_new_min_reaches_root() {
        let mut heap = TimerHeap::new();
        for id in 0..50usize {
            heap.add(id, Duration::from_secs(100 - id as u64), || {});
        }
        // id 49 has the smallest timeout and must bubble all the way
        // to the root without the unsigned-underflow infinite loop.
        assert_eq!(heap.heap[0].id, 49);
    }
}
