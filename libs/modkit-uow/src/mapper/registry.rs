use std::any::{Any, TypeId, type_name};
use std::sync::{Arc, LazyLock};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::debug;

use super::Mapper;
use super::error::{MapperError, MapperResult};
use super::record::DataModel;

type ErasedMapper = Arc<dyn Any + Send + Sync>;

/// Process-wide cache of one [`Mapper`] per data-model type.
///
/// The mapper for a type is built under the map's entry lock, so concurrent
/// first requests still build it exactly once.
#[derive(Default)]
pub struct MapperRegistry {
    mappers: DashMap<TypeId, ErasedMapper>,
}

static GLOBAL: LazyLock<MapperRegistry> = LazyLock::new(MapperRegistry::default);

impl MapperRegistry {
    #[must_use]
    pub fn global() -> &'static Self {
        &GLOBAL
    }

    /// Returns the shared mapper for `T`, building it on first use.
    ///
    /// # Errors
    /// Returns the catalog validation error if `T`'s mapping is invalid; nothing
    /// is cached in that case.
    pub fn get_or_init<T: DataModel>(&self) -> MapperResult<Arc<Mapper<T>>> {
        let erased = match self.mappers.entry(TypeId::of::<T>()) {
            Entry::Occupied(entry) => Arc::clone(entry.get()),
            Entry::Vacant(entry) => {
                let mapper: ErasedMapper = Arc::new(Mapper::<T>::new()?);
                debug!(model = type_name::<T>(), "built mapper");
                entry.insert(Arc::clone(&mapper));
                mapper
            }
        };
        erased
            .downcast::<Mapper<T>>()
            .map_err(|_| MapperError::unsupported_type(type_name::<T>()))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.mappers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.mappers.is_empty()
    }
}

impl std::fmt::Debug for MapperRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MapperRegistry")
            .field("mappers", &self.mappers.len())
            .finish()
    }
}
