//! Handle registry: a generation-checked slot table mapping opaque handles to
//! loaded models.
//!
//! A handle packs a slot index (low 32 bits) and the slot's generation (high
//! 32 bits). Freeing a slot bumps its generation, so every handle ever issued
//! for that slot becomes invalid; a slot whose generation is exhausted is
//! retired and never reused. The value 0 is never issued.
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError, RwLock};

use tracing::{debug, info, warn};

use crate::config::Config;
use crate::embedder::Embedder;
use crate::embedder::loader::{ModelLoader, OnnxLoader};
use crate::embedder::model::ModelKind;
use crate::error::BoundaryError;
use crate::error_channel::{ErrorRecord, OwnedMessage};

/// Opaque handle passed across the C boundary (`uint64_t` on the C side).
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EmbedderHandle(u64);

impl EmbedderHandle {
    pub const NULL: Self = Self(0);

    fn new(index: u32, generation: u32) -> Self {
        Self((u64::from(generation) << 32) | u64::from(index))
    }

    #[must_use]
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    #[must_use]
    pub fn as_raw(self) -> u64 {
        self.0
    }

    #[must_use]
    pub fn is_null(self) -> bool {
        self.0 == 0
    }

    fn index(self) -> usize {
        (self.0 & u64::from(u32::MAX)) as usize
    }

    fn generation(self) -> u32 {
        (self.0 >> 32) as u32
    }
}

/// Mutable state of one live handle, guarded by the entry's mutex.
pub struct HandleState {
    pub model: Box<dyn Embedder>,
    pub errors: ErrorRecord,
}

/// One live handle. Calls on the same handle are serialized by `state`.
pub struct HandleEntry {
    kind: ModelKind,
    dimensions: usize,
    state: Mutex<HandleState>,
}

impl HandleEntry {
    fn new(kind: ModelKind, model: Box<dyn Embedder>) -> Self {
        Self {
            kind,
            dimensions: model.dimensions(),
            state: Mutex::new(HandleState {
                model,
                errors: ErrorRecord::default(),
            }),
        }
    }

    #[must_use]
    pub fn kind(&self) -> ModelKind {
        self.kind
    }

    /// Native dimension of the model behind this handle.
    #[must_use]
    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    // A panic inside `run` leaves the state consistent (the error record is
    // written after the operation returns), so poisoning is ignored.
    fn lock(&self) -> MutexGuard<'_, HandleState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run one operation against the model, recording its failure, if any,
    /// as the handle's last error. Panics in `op` become `EmbeddingFailed`.
    pub fn run<T>(
        &self,
        op: impl FnOnce(&dyn Embedder) -> Result<T, BoundaryError>,
    ) -> Result<T, BoundaryError> {
        let mut state = self.lock();
        let model = state.model.as_ref();
        let result = panic::catch_unwind(AssertUnwindSafe(|| op(model))).unwrap_or_else(|payload| {
            Err(BoundaryError::EmbeddingFailed(format!(
                "panic in model backend: {}",
                panic_message(payload.as_ref())
            )))
        });

        if let Err(err) = &result {
            debug!(model = %self.kind, "call failed: {err}");
            state.errors.record(err.to_string());
        }
        result
    }

    /// Transfer the pending error message, if any, to the caller.
    pub fn take_error(&self) -> Option<OwnedMessage> {
        self.lock().errors.take()
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

struct Slot {
    generation: u32,
    entry: Option<Arc<HandleEntry>>,
}

#[derive(Default)]
struct Slots {
    slots: Vec<Slot>,
    free: Vec<u32>,
    live: usize,
}

impl Slots {
    fn insert(&mut self, entry: Arc<HandleEntry>) -> Option<EmbedderHandle> {
        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                let index = u32::try_from(self.slots.len()).ok()?;
                self.slots.push(Slot {
                    generation: 1,
                    entry: None,
                });
                index
            }
        };
        let slot = &mut self.slots[index as usize];
        slot.entry = Some(entry);
        self.live += 1;
        Some(EmbedderHandle::new(index, slot.generation))
    }

    fn get(&self, handle: EmbedderHandle) -> Option<&Arc<HandleEntry>> {
        if handle.is_null() {
            return None;
        }
        let slot = self.slots.get(handle.index())?;
        if slot.generation != handle.generation() {
            return None;
        }
        slot.entry.as_ref()
    }

    fn remove(&mut self, handle: EmbedderHandle) -> Option<Arc<HandleEntry>> {
        self.get(handle)?;
        let index = handle.index();
        let slot = &mut self.slots[index];
        let entry = slot.entry.take()?;
        self.live -= 1;

        match slot.generation.checked_add(1) {
            Some(next) => {
                slot.generation = next;
                // index came from a valid handle, so it fits in u32
                self.free.push(index as u32);
            }
            None => {
                // Generation space exhausted: retire the slot for good.
                slot.generation = 0;
            }
        }
        Some(entry)
    }
}

/// Maps handles to model instances.
pub struct Registry {
    loader: Arc<dyn ModelLoader>,
    slots: RwLock<Slots>,
}

static LOADER: OnceLock<Arc<dyn ModelLoader>> = OnceLock::new();
static GLOBAL: OnceLock<Registry> = OnceLock::new();

/// Install the loader used by the process-wide registry.
///
/// Must happen before the first handle is created; returns `false` if a loader
/// is already in place.
pub fn install_model_loader(loader: Arc<dyn ModelLoader>) -> bool {
    LOADER.set(loader).is_ok()
}

impl Registry {
    #[must_use]
    pub fn new(loader: Arc<dyn ModelLoader>) -> Self {
        Self {
            loader,
            slots: RwLock::new(Slots::default()),
        }
    }

    /// The registry behind the `embedder_*` functions.
    pub fn global() -> &'static Registry {
        GLOBAL.get_or_init(|| {
            let loader = LOADER
                .get_or_init(|| Arc::new(OnnxLoader::new(Config::from_env())))
                .clone();
            Registry::new(loader)
        })
    }

    /// Load `model_name` and register it under a fresh handle.
    pub fn init(&self, model_name: &str) -> Result<EmbedderHandle, BoundaryError> {
        let kind = ModelKind::from_name(model_name).ok_or_else(|| {
            BoundaryError::InitializationFailed(format!(
                "unknown model '{model_name}'; supported models: {}",
                ModelKind::supported_names()
            ))
        })?;

        let model = self
            .loader
            .load(kind)
            .map_err(|e| BoundaryError::InitializationFailed(format!("{kind}: {e}")))?;

        if model.dimensions() != kind.dimensions() {
            warn!(
                model = %kind,
                expected = kind.dimensions(),
                actual = model.dimensions(),
                "Loaded model reports a non-standard dimension"
            );
        }

        let entry = Arc::new(HandleEntry::new(kind, model));
        let handle = self.write().insert(entry).ok_or_else(|| {
            BoundaryError::InitializationFailed("handle table exhausted".to_string())
        })?;

        info!(model = %kind, handle = handle.as_raw(), "Handle created");
        Ok(handle)
    }

    /// Resolve a handle, failing for null, never-issued and freed handles.
    pub fn lookup(&self, handle: EmbedderHandle) -> Result<Arc<HandleEntry>, BoundaryError> {
        self.read()
            .get(handle)
            .cloned()
            .ok_or(BoundaryError::InvalidHandle)
    }

    /// Unregister a handle. Returns `false` if it was not live.
    ///
    /// The model is dropped here, or when an in-flight call on another thread
    /// finishes with it.
    pub fn free(&self, handle: EmbedderHandle) -> bool {
        let removed = self.write().remove(handle);
        match removed {
            Some(entry) => {
                info!(model = %entry.kind(), handle = handle.as_raw(), "Handle freed");
                drop(entry);
                true
            }
            None => {
                debug!(handle = handle.as_raw(), "free on an invalid handle ignored");
                false
            }
        }
    }

    /// Number of live handles.
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.read().live
    }

    // The slot table is only mutated in straight-line code that cannot panic
    // halfway, so a poisoned lock still guards a consistent table.
    fn read(&self) -> std::sync::RwLockReadGuard<'_, Slots> {
        self.slots.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Slots> {
        self.slots.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedder::loader::MockLoader;
    use std::thread;

    fn registry() -> Registry {
        Registry::new(Arc::new(MockLoader::new().with_failure_marker("__fail__")))
    }

    #[test]
    fn test_init_and_free_each_model() {
        let reg = registry();
        for kind in ModelKind::ALL {
            let handle = reg.init(kind.name()).unwrap();
            assert!(!handle.is_null());
            let entry = reg.lookup(handle).unwrap();
            assert_eq!(entry.kind(), kind);
            assert_eq!(entry.dimensions(), kind.dimensions());
            drop(entry);

            assert!(reg.free(handle));
            assert_eq!(reg.live_count(), 0);
        }
    }

    #[test]
    fn test_init_unknown_model() {
        let reg = registry();
        let err = reg.init("gpt-17").unwrap_err();
        assert!(matches!(err, BoundaryError::InitializationFailed(_)));
        assert!(err.to_string().contains("mini_lm_v2"));
        assert_eq!(reg.live_count(), 0);
    }

    #[test]
    fn test_init_loader_failure() {
        let reg = Registry::new(Arc::new(MockLoader::failing()));
        let err = reg.init("jina").unwrap_err();
        assert!(matches!(err, BoundaryError::InitializationFailed(_)));
        assert_eq!(reg.live_count(), 0);
    }

    #[test]
    fn test_lookup_null_and_unknown() {
        let reg = registry();
        assert!(matches!(
            reg.lookup(EmbedderHandle::NULL),
            Err(BoundaryError::InvalidHandle)
        ));
        assert!(matches!(
            reg.lookup(EmbedderHandle::from_raw(0xdead_beef)),
            Err(BoundaryError::InvalidHandle)
        ));
    }

    #[test]
    fn test_stale_handle_after_free() {
        let reg = registry();
        let first = reg.init("mini_lm_v2").unwrap();
        assert!(reg.free(first));
        assert!(!reg.free(first), "second free is a no-op");

        // The slot is reused with a new generation; the old handle stays dead.
        let second = reg.init("mini_lm_v2").unwrap();
        assert_ne!(first, second);
        assert_eq!(first.index(), second.index());
        assert!(reg.lookup(first).is_err());
        assert!(reg.lookup(second).is_ok());
    }

    #[test]
    fn test_double_free_leaves_other_handles_alone() {
        let reg = registry();
        let a = reg.init("mini_lm_v2").unwrap();
        let b = reg.init("jina").unwrap();
        assert!(reg.free(a));
        assert!(!reg.free(a));
        assert_eq!(reg.live_count(), 1);
        assert_eq!(reg.lookup(b).unwrap().kind(), ModelKind::Jina);
    }

    #[test]
    fn test_retired_slot_not_reused() {
        let mut slots = Slots::default();
        let entry = Arc::new(HandleEntry::new(
            ModelKind::MiniLmV2,
            MockLoader::new().load(ModelKind::MiniLmV2).unwrap(),
        ));
        let handle = slots.insert(entry.clone()).unwrap();
        slots.slots[0].generation = u32::MAX;
        let handle = EmbedderHandle::new(handle.index() as u32, u32::MAX);

        assert!(slots.remove(handle).is_some());
        assert!(slots.free.is_empty(), "exhausted slot must be retired");

        let fresh = slots.insert(entry).unwrap();
        assert_eq!(fresh.index(), 1);
        assert!(slots.get(handle).is_none());
    }

    #[test]
    fn test_run_records_errors() {
        let reg = registry();
        let handle = reg.init("mini_lm_v2").unwrap();
        let entry = reg.lookup(handle).unwrap();

        let ok = entry.run(|model| Ok(model.embed("hello")?));
        assert!(ok.is_ok());
        assert!(entry.take_error().is_none());

        let err = entry.run(|model| Ok(model.embed("__fail__")?));
        assert!(matches!(err, Err(BoundaryError::EmbeddingFailed(_))));
        let msg = entry.take_error().unwrap();
        assert!(msg.as_str().contains("__fail__"));
        assert!(entry.take_error().is_none());
    }

    #[test]
    fn test_run_catches_panics() {
        let reg = registry();
        let handle = reg.init("jina").unwrap();
        let entry = reg.lookup(handle).unwrap();

        let result: Result<(), _> = entry.run(|_| panic!("kaboom"));
        assert!(matches!(result, Err(BoundaryError::EmbeddingFailed(_))));
        assert!(entry.take_error().unwrap().as_str().contains("kaboom"));

        // The handle remains usable afterwards.
        assert!(entry.run(|model| Ok(model.embed("after")?)).is_ok());
    }

    #[test]
    fn test_free_drops_pending_error() {
        let reg = registry();
        let handle = reg.init("mini_lm_v2").unwrap();
        let failed: Result<(), _> = reg
            .lookup(handle)
            .unwrap()
            .run(|_| Err(BoundaryError::EmbeddingFailed("pending".into())));
        assert!(failed.is_err());
        assert!(reg.free(handle));
        assert!(reg.lookup(handle).is_err());
    }

    #[test]
    fn test_concurrent_handles_are_independent() {
        let reg = Arc::new(registry());
        let workers: Vec<_> = (0..8)
            .map(|i| {
                let reg = Arc::clone(&reg);
                thread::spawn(move || {
                    let name = if i % 2 == 0 { "mini_lm_v2" } else { "jina" };
                    let handle = reg.init(name).unwrap();
                    let entry = reg.lookup(handle).unwrap();
                    for _ in 0..20 {
                        let v = entry.run(|model| Ok(model.embed("text")?)).unwrap();
                        assert_eq!(v.len(), entry.dimensions());
                    }
                    drop(entry);
                    assert!(reg.free(handle));
                })
            })
            .collect();

        for worker in workers {
            worker.join().unwrap();
        }
        assert_eq!(reg.live_count(), 0);
    }
}
