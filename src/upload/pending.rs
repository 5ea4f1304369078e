//! Objects still waiting for upload

use std::collections::HashSet;

use crate::data::{EditObject, ObjectId};

/// Ordered set of objects still to be uploaded for one layer.
///
/// The set only shrinks: objects leave it when the server confirmed them or
/// when they turn out to be deleted already. Nothing is ever added back.
#[derive(Debug, Clone, Default)]
pub struct PendingObjectSet {
    objects: Vec<EditObject>,
    ids: HashSet<ObjectId>,
}

impl PendingObjectSet {
    /// Build the set, keeping the first occurrence of duplicated ids
    pub fn new(objects: impl IntoIterator<Item = EditObject>) -> Self {
        let mut set = Self::default();
        for object in objects {
            if set.ids.insert(object.id) {
                set.objects.push(object);
            }
        }
        set
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn contains(&self, id: ObjectId) -> bool {
        self.ids.contains(&id)
    }

    pub fn ids(&self) -> Vec<ObjectId> {
        self.objects.iter().map(|o| o.id).collect()
    }

    pub fn objects(&self) -> &[EditObject] {
        &self.objects
    }

    /// The first `len` pending objects
    pub fn next_batch(&self, len: usize) -> &[EditObject] {
        &self.objects[..len.min(self.objects.len())]
    }

    /// Drop the given ids, returning how many were actually pending
    pub fn remove(&mut self, ids: &[ObjectId]) -> usize {
        let before = self.objects.len();
        let mut removed = 0;
        for id in ids {
            if self.ids.remove(id) {
                removed += 1;
            }
        }
        if removed > 0 {
            let ids = &self.ids;
            self.objects.retain(|o| ids.contains(&o.id));
        }
        debug_assert_eq!(before - self.objects.len(), removed);
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set_of(n: i64) -> PendingObjectSet {
        PendingObjectSet::new((1..=n).map(|id| EditObject::modified(ObjectId::node(id), 1)))
    }

    #[test]
    fn test_duplicates_are_dropped() {
        let set = PendingObjectSet::new(vec![
            EditObject::modified(ObjectId::node(1), 1),
            EditObject::modified(ObjectId::node(1), 2),
            EditObject::modified(ObjectId::way(1), 1),
        ]);
        assert_eq!(set.len(), 2);
        assert_eq!(set.objects()[0].version, 1);
    }

    #[test]
    fn test_next_batch_is_a_prefix() {
        let set = set_of(5);
        let batch: Vec<ObjectId> = set.next_batch(2).iter().map(|o| o.id).collect();
        assert_eq!(batch, vec![ObjectId::node(1), ObjectId::node(2)]);
        assert_eq!(set.next_batch(99).len(), 5);
    }

    #[test]
    fn test_remove_only_counts_pending_ids() {
        let mut set = set_of(4);
        let removed = set.remove(&[ObjectId::node(2), ObjectId::node(9), ObjectId::node(2)]);
        assert_eq!(removed, 1);
        assert_eq!(set.len(), 3);
        assert!(!set.contains(ObjectId::node(2)));
        assert_eq!(
            set.ids(),
            vec![ObjectId::node(1), ObjectId::node(3), ObjectId::node(4)]
        );
    }
}
