//! Process-wide pools, one per pooled type.

use std::any::{Any, TypeId};
use std::sync::OnceLock;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::object_pool::ObjectPool;

type PoolMap = FxHashMap<TypeId, &'static (dyn Any + Send + Sync)>;

static SHARED_POOLS: OnceLock<RwLock<PoolMap>> = OnceLock::new();

/// Returns the shared pool for `P`, creating it with `init` on first use.
///
/// Shared pools live for the rest of the process. `init` only runs for the
/// first caller that observes the pool missing; later callers get the
/// existing pool regardless of the `init` they pass.
pub fn shared_pool<P>(init: impl FnOnce() -> ObjectPool<P>) -> &'static ObjectPool<P>
where
	P: Send + 'static,
{
	let pools = SHARED_POOLS.get_or_init(|| RwLock::new(FxHashMap::default()));
	let key = TypeId::of::<P>();

	if let Some(pool) = pools.read().get(&key).copied() {
		return downcast(pool);
	}

	let mut pools = pools.write();
	let pool = *pools.entry(key).or_insert_with(|| {
		let pool: &'static (dyn Any + Send + Sync) = Box::leak(Box::new(init()));
		pool
	});
	downcast(pool)
}

fn downcast<P: 'static>(pool: &'static (dyn Any + Send + Sync)) -> &'static ObjectPool<P> {
	match pool.downcast_ref::<ObjectPool<P>>() {
		Some(pool) => pool,
		None => unreachable!("shared pool registered under a foreign type id"),
	}
}
