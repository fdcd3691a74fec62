//! Implicit tier: fallback over the iterator interface.
//!
//! Anything collectable from `T` whose shared reference iterates `&T` can be
//! sent this way. The element count is not known up front, so it is found
//! by walking the container once before the elements are written.

use std::collections::{BTreeMap, BTreeSet, BinaryHeap, LinkedList};
use std::sync::Arc;

use crate::resolver::{Binding, Resolvable, ResolverKind};
use crate::resolvers::dynamic::{MapResolver, SeqResolver};
use crate::Registry;

/// Sequence resolver that counts by scanning.
pub type ImplicitSeqResolver<C, T> = SeqResolver<C, T>;

/// Map resolver that counts by scanning.
pub type ImplicitMapResolver<C, K, V> = MapResolver<C, K, V>;

/// Builds an implicit sequence binding for any `C` collectable from `T`.
pub fn implicit_seq<C, T>(registry: &Registry) -> Binding
where
    C: FromIterator<T> + Resolvable,
    for<'a> &'a C: IntoIterator<Item = &'a T>,
    T: Resolvable,
{
    let item = registry.resolve::<T>()?;
    let resolver = ImplicitSeqResolver::<C, T>::new(item, ResolverKind::Implicit, |c| {
        IntoIterator::into_iter(c).count()
    });
    Ok(Some(Arc::new(resolver)))
}

/// Builds an implicit map binding for any `C` collectable from `(K, V)`.
pub fn implicit_map<C, K, V>(registry: &Registry) -> Binding
where
    C: FromIterator<(K, V)> + Resolvable,
    for<'a> &'a C: IntoIterator<Item = (&'a K, &'a V)>,
    K: Resolvable,
    V: Resolvable,
{
    let resolver = ImplicitMapResolver::<C, K, V>::new(registry, ResolverKind::Implicit, |m| {
        IntoIterator::into_iter(m).count()
    })?;
    Ok(Some(Arc::new(resolver)))
}

impl<T: Resolvable + Ord> Resolvable for BTreeSet<T> {
    fn implicit(registry: &Registry) -> Binding {
        implicit_seq::<Self, T>(registry)
    }
}

impl<T: Resolvable> Resolvable for LinkedList<T> {
    fn implicit(registry: &Registry) -> Binding {
        implicit_seq::<Self, T>(registry)
    }
}

impl<T: Resolvable + Ord> Resolvable for BinaryHeap<T> {
    fn implicit(registry: &Registry) -> Binding {
        implicit_seq::<Self, T>(registry)
    }
}

impl<K: Resolvable + Ord, V: Resolvable> Resolvable for BTreeMap<K, V> {
    fn implicit(registry: &Registry) -> Binding {
        implicit_map::<Self, K, V>(registry)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, BTreeSet, BinaryHeap, LinkedList};

    use crate::{Registry, ResolverKind};

    #[test]
    fn test_btree_set_resolves_implicitly() {
        let registry = Registry::with_defaults();
        let r = registry.resolve::<BTreeSet<u16>>().unwrap();
        assert_eq!(r.kind(), ResolverKind::Implicit);

        let set: BTreeSet<u16> = [3, 1, 2].into_iter().collect();
        let bytes = registry.to_bytes(&set).unwrap();
        assert_eq!(bytes[..2], [4, 0]);
        assert_eq!(registry.from_bytes::<BTreeSet<u16>>(&bytes).unwrap(), set);
    }

    #[test]
    fn test_linked_list_and_heap_round_trip() {
        let registry = Registry::with_defaults();
        let list: LinkedList<String> = ["a", "bc"].into_iter().map(String::from).collect();
        let bytes = registry.to_bytes(&list).unwrap();
        assert_eq!(registry.from_bytes::<LinkedList<String>>(&bytes).unwrap(), list);

        let heap: BinaryHeap<i32> = [5, -1, 9].into_iter().collect();
        let bytes = registry.to_bytes(&heap).unwrap();
        let back = registry.from_bytes::<BinaryHeap<i32>>(&bytes).unwrap();
        assert_eq!(back.into_sorted_vec(), vec![-1, 5, 9]);
    }

    #[test]
    fn test_btree_map_matches_hash_map_wire_shape() {
        let registry = Registry::with_defaults();
        let map: BTreeMap<u8, bool> = [(1, true)].into_iter().collect();
        let bytes = registry.to_bytes(&map).unwrap();
        assert_eq!(bytes, vec![2, 0, 1, 1]);
        let hashed = registry
            .from_bytes::<std::collections::HashMap<u8, bool>>(&bytes)
            .unwrap();
        assert_eq!(hashed.get(&1), Some(&true));
    }
}
