// src/common/ids.rs

use std::sync::atomic::{AtomicU64, Ordering};

use uuid::Uuid;

pub trait IdGenerator: Send + Sync {
    fn next_id(&self) -> String;
}

/// Random UUIDv4 identifiers, hyphenated.
#[derive(Debug, Default, Clone, Copy)]
pub struct UuidGenerator;

impl IdGenerator for UuidGenerator {
    fn next_id(&self) -> String {
        Uuid::new_v4().to_string()
    }
}

/// Zero-padded counter, so identifiers sort in creation order.
#[derive(Debug, Default)]
pub struct SequentialIds {
    next: AtomicU64,
}

impl IdGenerator for SequentialIds {
    fn next_id(&self) -> String {
        format!("{:08}", self.next.fetch_add(1, Ordering::SeqCst))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uuids_are_distinct_and_parse_back() {
        let ids = UuidGenerator;
        let (a, b) = (ids.next_id(), ids.next_id());
        assert_ne!(a, b);
        assert_eq!(Uuid::parse_str(&a).unwrap().get_version_num(), 4);
    }

    #[test]
    fn sequential_ids_sort_in_creation_order() {
        let ids = SequentialIds::default();
        let generated: Vec<_> = (0..12).map(|_| ids.next_id()).collect();
        let mut sorted = generated.clone();
        sorted.sort();
        assert_eq!(generated, sorted);
    }
}
