//! The profile context shared by every location.
//!
//! A `Profile` is created once per process and handed to every entry point.
//! It owns the configuration, the collaborators, the registry of locations
//! and the few process-wide ratchets (`reached_depth`, `has_collapse`,
//! `has_tasks`). Event entry points lock only the location they are called
//! for; the registry mutex is taken on location creation and lookup.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, error, warn};

use crate::clock::{Clock, MonotonicClock};
use crate::cluster::{Clusterer, NoClustering};
use crate::config::ProfileConfig;
use crate::definitions::{
    Definitions, LocationId, LocationKind, MetricHandle, MetricValueType, ParameterHandle,
    ParameterType,
};
use crate::error::{Error, Severity};
use crate::location::{Exchange, Location, LocationData};
use crate::node::{NO_TIMESTAMP, NodeData};
use crate::process::Forest;
use crate::tasking::TaskHandle;
use crate::writer::ProfileWriter;

/// Measurement lifecycle. `finalize` moves back to a state from which
/// `initialize` starts a new epoch on the surviving locations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Uninitialized,
    Active,
    FinalizedAwaitingReinit,
}

/// Handles the engine registers for itself.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Reserved {
    pub(crate) instance: ParameterHandle,
    pub(crate) switches: MetricHandle,
    pub(crate) migration_loss: MetricHandle,
    pub(crate) migration_win: MetricHandle,
    pub(crate) bytes_allocated: MetricHandle,
    pub(crate) bytes_freed: MetricHandle,
    pub(crate) max_heap: MetricHandle,
    pub(crate) bytes_leaked: MetricHandle,
}

impl Reserved {
    fn register(defs: &dyn Definitions) -> Self {
        Self {
            instance: defs.new_parameter("instance", ParameterType::Int64),
            switches: defs.new_metric("number of switches", MetricValueType::Uint64),
            migration_loss: defs.new_metric("task_migration_loss", MetricValueType::Int64),
            migration_win: defs.new_metric("task_migration_win", MetricValueType::Uint64),
            bytes_allocated: defs.new_metric("allocation_size", MetricValueType::Uint64),
            bytes_freed: defs.new_metric("deallocation_size", MetricValueType::Uint64),
            max_heap: defs.new_metric("maximum_heap_memory_allocated", MetricValueType::Uint64),
            bytes_leaked: defs.new_metric("bytes_leaked", MetricValueType::Uint64),
        }
    }
}

struct Session {
    lifecycle: Lifecycle,
    dense_metrics: Vec<MetricHandle>,
}

#[derive(Default)]
struct Locations {
    by_id: HashMap<LocationId, Location>,
    /// Thread roots in forest order.
    order: Vec<LocationId>,
    main: Option<LocationId>,
}

pub(crate) struct Shared {
    pub(crate) config: ProfileConfig,
    pub(crate) defs: Arc<dyn Definitions>,
    pub(crate) clusterer: Arc<dyn Clusterer>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) reserved: Reserved,
    session: Mutex<Session>,
    active: AtomicBool,
    locations: Mutex<Locations>,
    pub(crate) program_begin: AtomicU64,
    reached_depth: AtomicU64,
    has_collapse: AtomicBool,
    has_tasks: AtomicBool,
    pub(crate) task_exchange: Exchange<TaskHandle>,
    pub(crate) stub_exchange: Exchange<Vec<NodeData>>,
}

/// Handle to the process-wide profile. Cheap to clone; every clone refers to
/// the same profile.
#[derive(Clone)]
pub struct Profile(pub(crate) Arc<Shared>);

impl fmt::Debug for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Profile")
            .field("lifecycle", &self.lifecycle())
            .field("config", &self.0.config)
            .finish_non_exhaustive()
    }
}

impl Profile {
    /// Profile without clustering, timed by a `MonotonicClock`.
    pub fn new(config: ProfileConfig, defs: Arc<dyn Definitions>) -> Self {
        Self::with_collaborators(
            config,
            defs,
            Arc::new(NoClustering),
            Arc::new(MonotonicClock::new()),
        )
    }

    pub fn with_collaborators(
        config: ProfileConfig,
        defs: Arc<dyn Definitions>,
        clusterer: Arc<dyn Clusterer>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let reserved = Reserved::register(defs.as_ref());
        Self(Arc::new(Shared {
            config,
            defs,
            clusterer,
            clock,
            reserved,
            session: Mutex::new(Session {
                lifecycle: Lifecycle::Uninitialized,
                dense_metrics: Vec::new(),
            }),
            active: AtomicBool::new(false),
            locations: Mutex::new(Locations::default()),
            program_begin: AtomicU64::new(NO_TIMESTAMP),
            reached_depth: AtomicU64::new(0),
            has_collapse: AtomicBool::new(false),
            has_tasks: AtomicBool::new(false),
            task_exchange: Exchange::default(),
            stub_exchange: Exchange::default(),
        }))
    }

    pub fn config(&self) -> &ProfileConfig {
        &self.0.config
    }

    pub fn definitions(&self) -> &dyn Definitions {
        self.0.defs.as_ref()
    }

    fn session(&self) -> MutexGuard<'_, Session> {
        self.0.session.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn registry(&self) -> MutexGuard<'_, Locations> {
        self.0.locations.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.session().lifecycle
    }

    pub fn is_initialized(&self) -> bool {
        self.0.active.load(Ordering::Acquire)
    }

    /// Start a measurement epoch with one dense slot per entry of
    /// `dense_metrics`. Does nothing when already active.
    pub fn initialize(&self, dense_metrics: Vec<MetricHandle>) -> Result<(), Error> {
        let mut session = self.session();
        if session.lifecycle == Lifecycle::Active {
            return Ok(());
        }
        let reinit = session.lifecycle == Lifecycle::FinalizedAwaitingReinit;
        let count = dense_metrics.len();
        for location in self.locations() {
            location.lock().reinitialize(count);
        }
        session.dense_metrics = dense_metrics;
        session.lifecycle = Lifecycle::Active;
        self.0.active.store(true, Ordering::Release);
        debug!(dense_metrics = count, reinit, "profiling initialized");
        Ok(())
    }

    /// End the epoch. Every location drops its tree but keeps its thread
    /// root and its place in the forest.
    pub fn finalize(&self) -> Result<(), Error> {
        let mut session = self.session();
        if session.lifecycle != Lifecycle::Active {
            return Ok(());
        }
        self.0.active.store(false, Ordering::Release);
        for location in self.locations() {
            location.lock().finalize()?;
        }
        self.0.reached_depth.store(0, Ordering::Relaxed);
        self.0.has_collapse.store(false, Ordering::Relaxed);
        self.0.has_tasks.store(false, Ordering::Relaxed);
        self.0.program_begin.store(NO_TIMESTAMP, Ordering::Relaxed);
        session.lifecycle = Lifecycle::FinalizedAwaitingReinit;
        debug!("profiling finalized");
        Ok(())
    }

    pub fn dense_metrics(&self) -> Vec<MetricHandle> {
        self.session().dense_metrics.clone()
    }

    pub(crate) fn assure_active(&self) -> Result<(), Error> {
        if self.is_initialized() {
            Ok(())
        } else {
            Err(Error::NotInitialized)
        }
    }

    /// Register a new location. The initial thread (no parent) goes to the
    /// front of the forest, every other location right after its parent.
    pub fn create_location(
        &self,
        id: LocationId,
        thread: u64,
        kind: LocationKind,
        parent: Option<LocationId>,
    ) -> Result<Location, Error> {
        let dense_count = self.session().dense_metrics.len();
        let mut registry = self.registry();
        if registry.by_id.contains_key(&id) {
            return Err(Error::DuplicateLocation(id));
        }
        let position = match parent {
            None => 0,
            Some(p) => {
                let index = registry
                    .order
                    .iter()
                    .position(|&l| l == p)
                    .ok_or(Error::UnknownLocation(p))?;
                index + 1
            }
        };
        let location = Location::new(LocationData::new(id, thread, kind, parent, dense_count)?);
        registry.by_id.insert(id, location.clone());
        registry.order.insert(position, id);
        if parent.is_none() && registry.main.is_none() {
            registry.main = Some(id);
        }
        debug!(location = %id, thread, ?parent, "location created");
        Ok(location)
    }

    pub fn location(&self, id: LocationId) -> Result<Location, Error> {
        self.registry()
            .by_id
            .get(&id)
            .cloned()
            .ok_or(Error::UnknownLocation(id))
    }

    /// All locations in forest order.
    pub fn locations(&self) -> Vec<Location> {
        let registry = self.registry();
        registry
            .order
            .iter()
            .filter_map(|id| registry.by_id.get(id).cloned())
            .collect()
    }

    /// The first location created without a parent.
    pub fn main_location(&self) -> Option<Location> {
        let registry = self.registry();
        registry.main.and_then(|id| registry.by_id.get(&id).cloned())
    }

    pub(crate) fn is_main(&self, id: LocationId) -> bool {
        self.registry().main == Some(id)
    }

    pub fn reached_depth(&self) -> u64 {
        self.0.reached_depth.load(Ordering::Relaxed)
    }

    pub(crate) fn note_depth(&self, depth: u64) {
        self.0.reached_depth.fetch_max(depth, Ordering::Relaxed);
    }

    pub fn has_collapse(&self) -> bool {
        self.0.has_collapse.load(Ordering::Relaxed)
    }

    pub(crate) fn set_has_collapse(&self) {
        self.0.has_collapse.store(true, Ordering::Relaxed);
    }

    pub fn has_tasks(&self) -> bool {
        self.0.has_tasks.load(Ordering::Relaxed)
    }

    pub(crate) fn set_has_tasks(&self) {
        self.0.has_tasks.store(true, Ordering::Relaxed);
    }

    /// Handle of the reserved "instance" parameter of dynamic regions.
    pub fn instance_parameter(&self) -> ParameterHandle {
        self.0.reserved.instance
    }

    /// Timestamp of `program_begin`, if it was seen in this epoch.
    pub fn program_begin_time(&self) -> Option<u64> {
        let ts = self.0.program_begin.load(Ordering::Relaxed);
        (ts != NO_TIMESTAMP).then_some(ts)
    }

    /// Run one event against a location: check the lifecycle, skip stopped
    /// locations, and stop the location on a location-fatal error.
    ///
    /// Returns `Ok(None)` when the location was already stopped.
    pub(crate) fn with_location<R>(
        &self,
        location: &Location,
        event: impl FnOnce(&mut LocationData) -> Result<R, Error>,
    ) -> Result<Option<R>, Error> {
        self.assure_active()?;
        let mut data = location.lock();
        if data.stopped {
            return Ok(None);
        }
        match event(&mut data) {
            Ok(value) => Ok(Some(value)),
            Err(err) => {
                self.check(&mut data, &err);
                Err(err)
            }
        }
    }

    pub(crate) fn on_location(
        &self,
        location: &Location,
        event: impl FnOnce(&mut LocationData) -> Result<(), Error>,
    ) -> Result<(), Error> {
        self.with_location(location, event).map(|_| ())
    }

    fn check(&self, data: &mut LocationData, err: &Error) {
        if err.severity() != Severity::Location {
            return;
        }
        data.stopped = true;
        error!(location = %data.id, "{err}; profiling disabled for this location");
        if self.0.config.enable_core_files {
            match crate::debug::write_core_file(self, data, err) {
                Ok(path) => debug!(path = %path.display(), "core file written"),
                Err(e) => warn!(location = %data.id, "could not write core file: {e}"),
            }
        }
    }

    /// Run the post-processing pipeline and return the finished forest.
    pub fn process(&self) -> Result<Forest, Error> {
        self.assure_active()?;
        crate::process::run(self)
    }

    /// Hand a processed forest to `writer`. The `None` format writes nothing.
    pub fn write(&self, forest: &Forest, writer: &mut dyn ProfileWriter) -> Result<(), Error> {
        if self.0.config.format == crate::config::OutputFormat::None {
            return Ok(());
        }
        writer.write(forest, self.definitions())
    }

    /// Text rendering of every location's tree.
    pub fn dump(&self) -> String {
        let mut out = String::new();
        for location in self.locations() {
            let data = location.lock();
            out.push_str(&crate::debug::dump_location(self.definitions(), &data));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definitions::Registry;

    fn profile() -> Profile {
        Profile::new(ProfileConfig::default(), Registry::shared())
    }

    #[test]
    fn initial_threads_are_prepended_children_follow_parent() {
        let p = profile();
        p.create_location(LocationId(0), 0, LocationKind::Cpu, None)
            .unwrap();
        p.create_location(LocationId(1), 1, LocationKind::Cpu, Some(LocationId(0)))
            .unwrap();
        p.create_location(LocationId(2), 2, LocationKind::Cpu, Some(LocationId(0)))
            .unwrap();
        let order: Vec<LocationId> = p.locations().iter().map(Location::id).collect();
        assert_eq!(order, vec![LocationId(0), LocationId(2), LocationId(1)]);
        assert_eq!(p.main_location().map(|l| l.id()), Some(LocationId(0)));
    }

    #[test]
    fn duplicate_and_orphan_locations_are_rejected() {
        let p = profile();
        p.create_location(LocationId(0), 0, LocationKind::Cpu, None)
            .unwrap();
        let dup = p
            .create_location(LocationId(0), 0, LocationKind::Cpu, None)
            .unwrap_err();
        assert!(matches!(dup, Error::DuplicateLocation(_)));
        let orphan = p
            .create_location(LocationId(5), 5, LocationKind::Cpu, Some(LocationId(9)))
            .unwrap_err();
        assert_eq!(orphan.severity(), Severity::Bug);
    }

    #[test]
    fn lifecycle_moves_through_reinit() {
        let p = profile();
        assert_eq!(p.lifecycle(), Lifecycle::Uninitialized);
        p.initialize(vec![]).unwrap();
        p.initialize(vec![MetricHandle(99)]).unwrap();
        assert!(p.dense_metrics().is_empty(), "second initialize is a no-op");
        p.finalize().unwrap();
        assert_eq!(p.lifecycle(), Lifecycle::FinalizedAwaitingReinit);
        assert!(!p.is_initialized());
        p.initialize(vec![MetricHandle(1)]).unwrap();
        assert_eq!(p.lifecycle(), Lifecycle::Active);
        assert_eq!(p.dense_metrics(), vec![MetricHandle(1)]);
    }

    #[test]
    fn reinitialize_resizes_dense_slots_of_surviving_roots() {
        let p = profile();
        let loc = p
            .create_location(LocationId(0), 0, LocationKind::Cpu, None)
            .unwrap();
        p.initialize(vec![]).unwrap();
        p.finalize().unwrap();
        p.initialize(vec![MetricHandle(1), MetricHandle(2)]).unwrap();
        let root = loc.root();
        let slots = loc.with_tree(|t| t.node(root).dense_metrics().len());
        assert_eq!(slots, 2);
    }
}
