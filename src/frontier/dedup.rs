use crate::url::Fingerprint;
use std::collections::{HashSet, VecDeque};

/// Bounded set of recently accepted URL fingerprints
///
/// When full, the oldest insertion is forgotten. Forgetting can only make a
/// known URL look new again (the store catches it); it can never make a new
/// URL look known.
#[derive(Debug)]
pub struct DedupFilter {
    seen: HashSet<Fingerprint>,
    order: VecDeque<Fingerprint>,
    capacity: usize,
}

impl DedupFilter {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            seen: HashSet::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn seen(&self, fingerprint: Fingerprint) -> bool {
        self.seen.contains(&fingerprint)
    }

    pub fn record(&mut self, fingerprint: Fingerprint) {
        if !self.seen.insert(fingerprint) {
            return;
        }

        self.order.push_back(fingerprint);
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_seen() {
        let mut filter = DedupFilter::new(4);
        assert!(!filter.seen(Fingerprint(1)));
        filter.record(Fingerprint(1));
        assert!(filter.seen(Fingerprint(1)));
        assert!(!filter.seen(Fingerprint(2)));
    }

    #[test]
    fn test_duplicate_record_does_not_grow() {
        let mut filter = DedupFilter::new(4);
        filter.record(Fingerprint(7));
        filter.record(Fingerprint(7));
        assert_eq!(filter.len(), 1);
    }

    #[test]
    fn test_oldest_evicted_at_capacity() {
        let mut filter = DedupFilter::new(3);
        for n in 1..=4 {
            filter.record(Fingerprint(n));
        }

        assert_eq!(filter.len(), 3);
        assert!(!filter.seen(Fingerprint(1)));
        assert!(filter.seen(Fingerprint(2)));
        assert!(filter.seen(Fingerprint(4)));
    }

    #[test]
    fn test_never_reports_unrecorded_fingerprint() {
        let mut filter = DedupFilter::new(16);
        for n in 0..1000u64 {
            filter.record(Fingerprint(n * 2));
        }

        // Odd fingerprints were never recorded
        for n in 0..1000u64 {
            assert!(!filter.seen(Fingerprint(n * 2 + 1)));
        }
        assert_eq!(filter.len(), 16);
    }
}
