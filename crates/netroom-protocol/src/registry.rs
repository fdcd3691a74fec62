//! The type-indexed resolver registry.
//!
//! Lookup order for a type `T`, first hit wins:
//!
//! 1. the explicit table (built once, never mutated afterwards),
//! 2. the derived cache,
//! 3. derivative matchers, in registration order,
//! 4. `T::dynamic`,
//! 5. `T::implicit`.
//!
//! Whatever steps 3 to 5 produce is stored in the derived cache. Two rooms
//! racing to derive the same novel type both build a resolver; the first
//! insert wins and both walk away with the winner.

use std::any::{Any, TypeId, type_name};
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use dashmap::DashMap;

use crate::resolver::{FnResolver, ReadFn, Resolvable, Resolver, WriteFn, take};
use crate::resolvers::explicit;
use crate::{NetReader, NetWriter, SerdeError, StreamPool};

/// A derivative matcher: binds whole families of types by identity.
pub type Matcher = fn(TypeId) -> Option<Arc<dyn Resolver>>;

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Collects explicit bindings and matchers before the registry is frozen.
pub struct RegistryBuilder {
    explicit: HashMap<TypeId, Arc<dyn Resolver>>,
    matchers: Vec<Matcher>,
    pool: Option<Arc<StreamPool>>,
}

impl RegistryBuilder {
    /// A builder with no bindings at all.
    pub fn empty() -> Self {
        Self {
            explicit: HashMap::new(),
            matchers: Vec::new(),
            pool: None,
        }
    }

    /// A builder pre-loaded with the built-in explicit bindings and the
    /// string matcher.
    pub fn with_defaults() -> Self {
        let mut builder = Self::empty();
        explicit::install(&mut builder);
        builder
    }

    /// Binds `resolver` to exactly `T`, replacing any earlier binding.
    pub fn explicit<T: Any>(&mut self, resolver: Arc<dyn Resolver>) -> &mut Self {
        if self.explicit.insert(TypeId::of::<T>(), resolver).is_some() {
            tracing::debug!(ty = type_name::<T>(), "explicit binding replaced");
        }
        self
    }

    /// Binds a pair of functions to exactly `T`.
    pub fn explicit_fn<T: Any + Send>(
        &mut self,
        write: WriteFn<T>,
        read: ReadFn<T>,
    ) -> &mut Self {
        self.explicit::<T>(Arc::new(FnResolver::new(write, read)))
    }

    /// Appends a derivative matcher. Matchers run after the explicit table
    /// and before the derived tiers.
    pub fn matcher(&mut self, matcher: Matcher) -> &mut Self {
        self.matchers.push(matcher);
        self
    }

    /// Uses `pool` for [`Registry::to_bytes`] instead of the global pool.
    pub fn pool(&mut self, pool: Arc<StreamPool>) -> &mut Self {
        self.pool = Some(pool);
        self
    }

    pub fn build(self) -> Registry {
        tracing::debug!(
            explicit = self.explicit.len(),
            matchers = self.matchers.len(),
            "resolver registry built"
        );
        Registry {
            explicit: self.explicit,
            matchers: self.matchers,
            derived: DashMap::new(),
            pool: self.pool.unwrap_or_else(StreamPool::global),
        }
    }
}

impl Default for RegistryBuilder {
    fn default() -> Self {
        Self::with_defaults()
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Maps types to resolvers and drives encoding through them.
pub struct Registry {
    explicit: HashMap<TypeId, Arc<dyn Resolver>>,
    matchers: Vec<Matcher>,
    derived: DashMap<TypeId, Arc<dyn Resolver>>,
    pool: Arc<StreamPool>,
}

impl Registry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::with_defaults()
    }

    /// A registry with the built-in bindings only.
    pub fn with_defaults() -> Self {
        RegistryBuilder::with_defaults().build()
    }

    /// The process-wide registry with the built-in bindings.
    pub fn global() -> Arc<Registry> {
        static GLOBAL: OnceLock<Arc<Registry>> = OnceLock::new();
        GLOBAL
            .get_or_init(|| Arc::new(Registry::with_defaults()))
            .clone()
    }

    pub fn pool(&self) -> &Arc<StreamPool> {
        &self.pool
    }

    /// Number of resolvers derived so far.
    pub fn derived_len(&self) -> usize {
        self.derived.len()
    }

    /// Finds or derives the resolver for `T`.
    ///
    /// # Errors
    /// [`SerdeError::UnsupportedType`] when no tier can handle `T`, or any
    /// error raised while deriving a component resolver.
    pub fn resolve<T: Resolvable>(&self) -> Result<Arc<dyn Resolver>, SerdeError> {
        let id = TypeId::of::<T>();
        if let Some(found) = self.explicit.get(&id) {
            return Ok(found.clone());
        }
        if let Some(found) = self.derived.get(&id) {
            return Ok(found.value().clone());
        }

        let built = match self.matchers.iter().find_map(|m| m(id)) {
            Some(found) => found,
            None => match T::dynamic(self)? {
                Some(found) => found,
                None => T::implicit(self)?
                    .ok_or(SerdeError::UnsupportedType(type_name::<T>()))?,
            },
        };
        tracing::trace!(
            ty = type_name::<T>(),
            kind = ?built.kind(),
            "resolver derived"
        );
        // The guard is dropped before returning; no lock is held while
        // other resolvers are being derived.
        let winner = self.derived.entry(id).or_insert(built).value().clone();
        Ok(winner)
    }

    /// Looks a resolver up by runtime type identity.
    ///
    /// Only the explicit table and resolvers already derived are visited.
    /// Call [`Registry::resolve`] once for a type before relying on this.
    pub fn resolve_id(&self, id: TypeId) -> Result<Arc<dyn Resolver>, SerdeError> {
        if let Some(found) = self.explicit.get(&id) {
            return Ok(found.clone());
        }
        if let Some(found) = self.derived.get(&id) {
            return Ok(found.value().clone());
        }
        self.matchers
            .iter()
            .find_map(|m| m(id))
            .ok_or(SerdeError::UnsupportedType("<type resolved by id>"))
    }

    pub fn serialize<T: Resolvable>(
        &self,
        writer: &mut NetWriter,
        value: &T,
    ) -> Result<(), SerdeError> {
        self.resolve::<T>()?.write(self, writer, value)
    }

    pub fn deserialize<T: Resolvable>(
        &self,
        reader: &mut NetReader<'_>,
    ) -> Result<T, SerdeError> {
        take(self.resolve::<T>()?.read(self, reader)?)
    }

    /// Type-erased [`serialize`](Self::serialize).
    pub fn serialize_any(
        &self,
        writer: &mut NetWriter,
        value: &dyn Any,
        id: TypeId,
    ) -> Result<(), SerdeError> {
        self.resolve_id(id)?.write(self, writer, value)
    }

    /// Type-erased [`deserialize`](Self::deserialize).
    pub fn deserialize_any(
        &self,
        reader: &mut NetReader<'_>,
        id: TypeId,
    ) -> Result<Box<dyn Any + Send>, SerdeError> {
        self.resolve_id(id)?.read(self, reader)
    }

    /// Encodes `value` into a fresh byte vector using a pooled writer.
    pub fn to_bytes<T: Resolvable>(&self, value: &T) -> Result<Vec<u8>, SerdeError> {
        let mut lease = self.pool.writer();
        self.serialize(&mut lease, value)?;
        Ok(lease.to_vec())
    }

    /// Decodes one `T` from the front of `bytes`.
    pub fn from_bytes<T: Resolvable>(&self, bytes: &[u8]) -> Result<T, SerdeError> {
        self.deserialize(&mut NetReader::new(bytes))
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("explicit", &self.explicit.len())
            .field("matchers", &self.matchers.len())
            .field("derived", &self.derived.len())
            .finish()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ResolverKind;

    struct Opaque;
    impl Resolvable for Opaque {}

    #[test]
    fn test_unbound_type_is_unsupported() {
        let registry = Registry::with_defaults();
        match registry.resolve::<Opaque>() {
            Err(SerdeError::UnsupportedType(name)) => assert!(name.ends_with("Opaque")),
            other => panic!("expected UnsupportedType, got {other:?}"),
        }
    }

    #[test]
    fn test_explicit_binding_wins_over_derived() {
        let registry = Registry::with_defaults();
        let r = registry.resolve::<Vec<u8>>().unwrap();
        assert_eq!(r.kind(), ResolverKind::Explicit);
        assert_eq!(registry.derived_len(), 0);

        let r = registry.resolve::<Vec<u16>>().unwrap();
        assert_eq!(r.kind(), ResolverKind::Dynamic);
        assert_eq!(registry.derived_len(), 1);
    }

    #[test]
    fn test_derived_resolver_is_cached() {
        let registry = Registry::with_defaults();
        let a = registry.resolve::<Option<u32>>().unwrap();
        let b = registry.resolve::<Option<u32>>().unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_resolve_id_only_sees_known_types() {
        let registry = Registry::with_defaults();
        assert!(registry.resolve_id(TypeId::of::<u64>()).is_ok());
        assert!(registry.resolve_id(TypeId::of::<Vec<i64>>()).is_err());
        registry.resolve::<Vec<i64>>().unwrap();
        assert!(registry.resolve_id(TypeId::of::<Vec<i64>>()).is_ok());
    }

    #[test]
    fn test_serialize_any_matches_typed_path() {
        let registry = Registry::with_defaults();
        let value = String::from("abc");
        let mut typed = NetWriter::new();
        registry.serialize(&mut typed, &value).unwrap();
        let mut erased = NetWriter::new();
        registry
            .serialize_any(&mut erased, &value, TypeId::of::<String>())
            .unwrap();
        assert_eq!(typed.as_slice(), erased.as_slice());

        let back = registry
            .deserialize_any(&mut NetReader::new(erased.as_slice()), TypeId::of::<String>())
            .unwrap();
        assert_eq!(take::<String>(back).unwrap(), "abc");
    }

    #[test]
    fn test_custom_explicit_binding() {
        #[derive(Debug, PartialEq)]
        struct Meters(u32);
        impl Resolvable for Meters {}

        let mut builder = Registry::builder();
        builder.explicit_fn::<Meters>(
            |_, w, v| {
                w.put_u32(v.0);
                Ok(())
            },
            |_, r| Ok(Meters(r.take_u32()?)),
        );
        let registry = builder.build();
        let bytes = registry.to_bytes(&Meters(12)).unwrap();
        assert_eq!(bytes, vec![12, 0, 0, 0]);
        assert_eq!(registry.from_bytes::<Meters>(&bytes).unwrap(), Meters(12));
    }

    #[test]
    fn test_concurrent_derivation_settles_on_one_resolver() {
        let registry = Arc::new(Registry::with_defaults());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || registry.resolve::<Vec<(u8, String)>>().unwrap())
            })
            .collect();
        let resolvers: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let cached = registry.resolve::<Vec<(u8, String)>>().unwrap();
        assert!(resolvers.iter().all(|r| Arc::ptr_eq(r, &cached)));
        // The element tuple and the vector itself.
        assert_eq!(registry.derived_len(), 2);
    }
}
