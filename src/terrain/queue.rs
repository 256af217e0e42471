//! Bounded append lists and the two-role work queue pair
//!
//! These mirror the GPU append buffers: a push always bumps the counter
//! but only stores when there is room, so overruns are visible afterwards
//! as `peak > capacity` instead of corrupting memory.

use std::fmt;

/// Bounded list with saturate-and-report semantics
#[derive(Clone, Debug)]
pub struct AppendList<T> {
    items: Vec<T>,
    count: u32,
    peak: u32,
    capacity: u32,
}

impl<T> AppendList<T> {
    pub fn new(capacity: u32) -> Self {
        Self { items: Vec::with_capacity(capacity as usize), count: 0, peak: 0, capacity }
    }

    /// List pre-filled with `items`, capacity equal to its length
    pub fn seeded(items: Vec<T>) -> Self {
        let count = items.len() as u32;
        Self { items, count, peak: count, capacity: count }
    }

    /// Returns false when the item was dropped for lack of room
    pub fn push(&mut self, item: T) -> bool {
        let index = self.count;
        self.count += 1;
        self.peak = self.peak.max(self.count);
        if index < self.capacity {
            self.items.push(item);
            true
        } else {
            false
        }
    }

    /// Reset the live count, keeping the frame's peak
    pub fn reset_count(&mut self) {
        self.items.clear();
        self.count = 0;
    }

    /// Reset both count and peak (start of frame)
    pub fn clear(&mut self) {
        self.reset_count();
        self.peak = 0;
    }

    /// Stored items: `min(count, capacity)` of them
    pub fn items(&self) -> &[T] {
        &self.items
    }

    pub fn into_items(self) -> Vec<T> {
        self.items
    }

    pub fn len(&self) -> u32 {
        self.count.min(self.capacity)
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Attempted appends since the last reset
    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn peak(&self) -> u32 {
        self.peak
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn overflowed(&self) -> bool {
        self.peak > self.capacity
    }

    /// Report when the list ran out of room this frame
    pub fn report(&self, list: ListKind) -> Option<CapacityReport> {
        self.overflowed().then(|| CapacityReport { list, peak: self.peak, capacity: self.capacity })
    }
}

/// Two buffers alternating between the consume and append roles.
/// `swap` only relabels; contents never move.
#[derive(Clone, Debug)]
pub struct PingPong<T> {
    buffers: [T; 2],
    consume: usize,
}

impl<T> PingPong<T> {
    pub fn new(first: T, second: T) -> Self {
        Self { buffers: [first, second], consume: 0 }
    }

    pub fn consume(&self) -> &T {
        &self.buffers[self.consume]
    }

    pub fn append(&self) -> &T {
        &self.buffers[1 - self.consume]
    }

    pub fn append_mut(&mut self) -> &mut T {
        &mut self.buffers[1 - self.consume]
    }

    /// Both roles at once: (consume, append)
    pub fn split_mut(&mut self) -> (&mut T, &mut T) {
        let [a, b] = &mut self.buffers;
        if self.consume == 0 { (a, b) } else { (b, a) }
    }

    pub fn swap(&mut self) {
        self.consume = 1 - self.consume;
    }

    pub fn both(&self) -> &[T; 2] {
        &self.buffers
    }
}

/// Which bounded list a report refers to
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ListKind {
    WorkQueue,
    FinalNodes,
    Patches,
    Bounds,
}

impl fmt::Display for ListKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::WorkQueue => "work queue",
            Self::FinalNodes => "final node list",
            Self::Patches => "patch list",
            Self::Bounds => "bounds list",
        };
        f.write_str(name)
    }
}

/// A list whose append attempts exceeded its capacity
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CapacityReport {
    pub list: ListKind,
    pub peak: u32,
    pub capacity: u32,
}

impl CapacityReport {
    /// Next power of two that holds the observed peak
    pub fn suggested_capacity(&self) -> u32 {
        self.peak.checked_next_power_of_two().unwrap_or(u32::MAX)
    }
}

impl fmt::Display for CapacityReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} overflowed: {} appends for {} slots (suggest {})",
            self.list,
            self.peak,
            self.capacity,
            self.suggested_capacity()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_saturates() {
        let mut list = AppendList::new(2);
        assert!(list.push(1));
        assert!(list.push(2));
        assert!(!list.push(3));
        assert_eq!(list.items(), &[1, 2]);
        assert_eq!(list.len(), 2);
        assert_eq!(list.count(), 3);
        assert!(list.overflowed());

        let report = list.report(ListKind::Patches).unwrap();
        assert_eq!(report.peak, 3);
        assert_eq!(report.suggested_capacity(), 4);
    }

    #[test]
    fn test_peak_survives_count_reset() {
        let mut list = AppendList::new(1);
        list.push('a');
        list.push('b');
        list.reset_count();
        assert_eq!(list.count(), 0);
        assert_eq!(list.peak(), 2);
        list.clear();
        assert!(list.report(ListKind::WorkQueue).is_none());
    }

    #[test]
    fn test_ping_pong_swap_relabels() {
        let mut queues = PingPong::new(vec![1], vec![2]);
        assert_eq!(queues.consume(), &vec![1]);
        queues.append_mut().push(3);
        queues.swap();
        assert_eq!(queues.consume(), &vec![2, 3]);
        assert_eq!(queues.append(), &vec![1]);

        let (consume, append) = queues.split_mut();
        append.extend(consume.drain(..));
        assert_eq!(queues.append(), &vec![1, 2, 3]);
    }

    #[test]
    fn test_seeded_list_is_full() {
        let list = AppendList::seeded(vec![5, 6, 7]);
        assert_eq!(list.capacity(), 3);
        assert!(!list.overflowed());
    }
}
