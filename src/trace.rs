//! Recorded event traces and their replay through the profiling engine.
//!
//! A trace names everything by string: the definitions section declares
//! regions, parameters and metrics, and events refer to them by name. Events
//! are replayed in file order on a single thread. Per-location work in the
//! engine is independent, so this reproduces whatever interleaving the trace
//! recorded.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use arbor_runtime::{
    AllocMemento, Definitions, Forest, Location, LocationId, LocationKind, ManualClock,
    MetricHandle, MetricValue, MetricValueType, NoClustering, ParameterHandle, ParameterType,
    Profile, ProfileConfig, RegionHandle, RegionType, Registry, Severity, TaskHandle,
};
use tracing::{debug, warn};

use crate::error::Error;

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Trace {
    #[serde(default)]
    pub definitions: TraceDefinitions,
    pub locations: Vec<TraceLocation>,
    #[serde(default)]
    pub events: Vec<TraceEvent>,
}

#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct TraceDefinitions {
    /// Name of the region bracketing the whole run. Defaults to `PROGRAM`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub program: Option<String>,
    #[serde(default)]
    pub regions: Vec<RegionDecl>,
    #[serde(default)]
    pub parameters: Vec<ParameterDecl>,
    #[serde(default)]
    pub metrics: Vec<MetricDecl>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct RegionDecl {
    pub name: String,
    #[serde(default, rename = "type")]
    pub region_type: RegionType,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ParameterDecl {
    pub name: String,
    #[serde(default = "default_parameter_type", rename = "type")]
    pub parameter_type: ParameterType,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct MetricDecl {
    pub name: String,
    #[serde(default = "default_metric_type", rename = "type")]
    pub value_type: MetricValueType,
    /// Dense metrics are sampled on every enter and exit, in declaration
    /// order, through the `metrics` array of those events.
    #[serde(default)]
    pub dense: bool,
}

fn default_parameter_type() -> ParameterType {
    ParameterType::Int64
}

fn default_metric_type() -> MetricValueType {
    MetricValueType::Uint64
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct TraceLocation {
    pub id: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<u32>,
    /// Thread number. Defaults to the location id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread: Option<u64>,
    #[serde(default)]
    pub kind: LocationKind,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SparseSample {
    pub metric: String,
    pub value: MetricValue,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(untagged)]
pub enum ParameterArg {
    Int(i64),
    Text(String),
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TraceEvent {
    ProgramBegin {
        location: u32,
        time: u64,
        #[serde(default)]
        metrics: Vec<u64>,
    },
    ProgramEnd {
        location: u32,
        time: u64,
        #[serde(default)]
        metrics: Vec<u64>,
    },
    Enter {
        location: u32,
        time: u64,
        region: String,
        #[serde(default)]
        metrics: Vec<u64>,
        #[serde(default)]
        sparse: Vec<SparseSample>,
    },
    Exit {
        location: u32,
        time: u64,
        region: String,
        #[serde(default)]
        metrics: Vec<u64>,
        #[serde(default)]
        sparse: Vec<SparseSample>,
    },
    RecordingOff {
        location: u32,
        time: u64,
        region: String,
        #[serde(default)]
        metrics: Vec<u64>,
    },
    RecordingOn {
        location: u32,
        time: u64,
        region: String,
        #[serde(default)]
        metrics: Vec<u64>,
    },
    Sample {
        location: u32,
    },
    Metric {
        location: u32,
        metric: String,
        value: MetricValue,
    },
    Parameter {
        location: u32,
        parameter: String,
        value: ParameterArg,
    },
    Fork {
        location: u32,
        #[serde(default)]
        threads: u32,
        #[serde(default)]
        sequence: u32,
    },
    Join {
        location: u32,
    },
    Activate {
        location: u32,
        #[serde(default)]
        parent: Option<u32>,
        #[serde(default)]
        sequence: u32,
    },
    Deactivate {
        location: u32,
        #[serde(default)]
        parent: Option<u32>,
    },
    /// Generation 0 is the implicit task of the location.
    TaskCreate {
        location: u32,
        task: u64,
        #[serde(default = "explicit_generation")]
        generation: u32,
    },
    TaskBegin {
        location: u32,
        time: u64,
        region: String,
        task: u64,
        #[serde(default)]
        metrics: Vec<u64>,
    },
    TaskSwitch {
        location: u32,
        time: u64,
        task: u64,
        #[serde(default)]
        metrics: Vec<u64>,
    },
    TaskEnd {
        location: u32,
        time: u64,
        region: String,
        #[serde(default)]
        metrics: Vec<u64>,
    },
    TaskFree {
        location: u32,
        task: u64,
    },
    Alloc {
        location: u32,
        id: u64,
        bytes: u64,
        #[serde(default)]
        heap: u64,
    },
    Realloc {
        location: u32,
        id: u64,
        old_bytes: u64,
        new_bytes: u64,
        #[serde(default)]
        heap: u64,
    },
    Free {
        location: u32,
        id: u64,
        bytes: u64,
    },
    Leak {
        id: u64,
        bytes: u64,
    },
}

fn explicit_generation() -> u32 {
    1
}

/// Read a trace from a JSON file on disk.
pub fn load_trace(path: &Path) -> Result<Trace, Error> {
    let contents = std::fs::read_to_string(path).map_err(|source| Error::ReadError {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&contents).map_err(|e| Error::InvalidTrace {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

/// A replayed measurement: the profile it ran against and the processed
/// forest.
#[derive(Debug)]
pub struct Replay {
    pub profile: Profile,
    pub forest: Forest,
}

/// Run every event of `trace` through a fresh profile and post-process it.
///
/// Errors that only disable one location are logged and skipped, like the
/// engine does during a live measurement. Anything else aborts the replay.
pub fn replay(trace: &Trace, config: ProfileConfig) -> Result<Replay, Error> {
    let registry = Arc::new(match &trace.definitions.program {
        Some(name) => Registry::with_program_name(name),
        None => Registry::new(),
    });
    let clock = Arc::new(ManualClock::new(0));
    let profile = Profile::with_collaborators(
        config,
        registry.clone(),
        Arc::new(NoClustering),
        clock.clone(),
    );
    let names = Names::register(&trace.definitions, &profile)?;

    let mut locations = HashMap::new();
    for loc in &trace.locations {
        let location = profile.create_location(
            LocationId(loc.id),
            loc.thread.unwrap_or(u64::from(loc.id)),
            loc.kind,
            loc.parent.map(LocationId),
        )?;
        locations.insert(loc.id, location);
    }
    profile.initialize(names.dense.clone())?;

    let mut replayer = Replayer {
        profile: &profile,
        clock: &clock,
        names,
        locations,
        tasks: HashMap::new(),
        allocations: HashMap::new(),
    };
    for (index, event) in trace.events.iter().enumerate() {
        match replayer.apply(index, event) {
            Ok(()) => {}
            Err(Error::Runtime(e)) if e.severity() == Severity::Location => {
                debug!(event = index, "{e}");
            }
            Err(Error::Runtime(e)) if e.severity() == Severity::Usage => {
                warn!(event = index, "{e}");
            }
            Err(e) => return Err(e),
        }
    }
    debug!(
        events = trace.events.len(),
        locations = trace.locations.len(),
        "trace replayed"
    );

    let forest = profile.process()?;
    Ok(Replay { profile, forest })
}

/// Handles of everything the definitions section declared, by name.
struct Names {
    regions: HashMap<String, RegionHandle>,
    parameters: HashMap<String, (ParameterHandle, ParameterType)>,
    metrics: HashMap<String, MetricHandle>,
    dense: Vec<MetricHandle>,
}

impl Names {
    fn register(decls: &TraceDefinitions, profile: &Profile) -> Result<Self, Error> {
        let defs = profile.definitions();
        let mut names = Names {
            regions: HashMap::new(),
            parameters: HashMap::new(),
            metrics: HashMap::new(),
            dense: Vec::new(),
        };
        let program = defs.program_region();
        names.regions.insert(defs.region_name(program), program);
        let instance = profile.instance_parameter();
        names
            .parameters
            .insert(defs.parameter_name(instance), (instance, ParameterType::Int64));

        for region in &decls.regions {
            if names.regions.get(&region.name) == Some(&program) {
                continue;
            }
            if names.regions.contains_key(&region.name) {
                return Err(duplicate("region", &region.name));
            }
            let handle = defs.new_region(&region.name, region.region_type);
            names.regions.insert(region.name.clone(), handle);
        }
        for parameter in &decls.parameters {
            if names.parameters.contains_key(&parameter.name) {
                if parameter.name == defs.parameter_name(instance) {
                    continue;
                }
                return Err(duplicate("parameter", &parameter.name));
            }
            let handle = defs.new_parameter(&parameter.name, parameter.parameter_type);
            names
                .parameters
                .insert(parameter.name.clone(), (handle, parameter.parameter_type));
        }
        for metric in &decls.metrics {
            if names.metrics.contains_key(&metric.name) {
                return Err(duplicate("metric", &metric.name));
            }
            let handle = defs.new_metric(&metric.name, metric.value_type);
            names.metrics.insert(metric.name.clone(), handle);
            if metric.dense {
                names.dense.push(handle);
            }
        }
        Ok(names)
    }
}

fn duplicate(kind: &'static str, name: &str) -> Error {
    Error::DuplicateDefinition {
        kind,
        name: name.to_owned(),
    }
}

struct Replayer<'a> {
    profile: &'a Profile,
    clock: &'a ManualClock,
    names: Names,
    locations: HashMap<u32, Location>,
    tasks: HashMap<u64, TaskHandle>,
    /// `None` when the allocating location was already disabled.
    allocations: HashMap<u64, Option<AllocMemento>>,
}

impl Replayer<'_> {
    fn location(&self, index: usize, id: u32) -> Result<Location, Error> {
        self.locations
            .get(&id)
            .cloned()
            .ok_or(Error::UnknownLocation {
                index,
                location: id,
            })
    }

    fn parent(&self, index: usize, parent: Option<u32>) -> Result<Option<LocationId>, Error> {
        match parent {
            Some(id) => self.location(index, id).map(|l| Some(l.id())),
            None => Ok(None),
        }
    }

    fn region(&self, index: usize, name: &str) -> Result<RegionHandle, Error> {
        self.names
            .regions
            .get(name)
            .copied()
            .ok_or_else(|| undefined(index, "region", name))
    }

    fn metric(&self, index: usize, name: &str) -> Result<MetricHandle, Error> {
        self.names
            .metrics
            .get(name)
            .copied()
            .ok_or_else(|| undefined(index, "metric", name))
    }

    fn sparse(
        &self,
        index: usize,
        samples: &[SparseSample],
    ) -> Result<Vec<(MetricHandle, MetricValue)>, Error> {
        samples
            .iter()
            .map(|s| Ok((self.metric(index, &s.metric)?, s.value)))
            .collect()
    }

    fn task(&self, index: usize, task: u64) -> Result<TaskHandle, Error> {
        self.tasks
            .get(&task)
            .cloned()
            .ok_or(Error::UnknownTask { index, task })
    }

    fn apply(&mut self, index: usize, event: &TraceEvent) -> Result<(), Error> {
        let p = self.profile;
        match event {
            TraceEvent::ProgramBegin {
                location,
                time,
                metrics,
            } => {
                self.clock.set(*time);
                p.program_begin(&self.location(index, *location)?, *time, metrics, &[])?;
            }
            TraceEvent::ProgramEnd {
                location,
                time,
                metrics,
            } => {
                self.clock.set(*time);
                p.program_end(&self.location(index, *location)?, *time, metrics, &[])?;
            }
            TraceEvent::Enter {
                location,
                time,
                region,
                metrics,
                sparse,
            } => {
                self.clock.set(*time);
                let loc = self.location(index, *location)?;
                let region = self.region(index, region)?;
                let sparse = self.sparse(index, sparse)?;
                p.enter_region(&loc, *time, region, metrics, &sparse)?;
            }
            TraceEvent::Exit {
                location,
                time,
                region,
                metrics,
                sparse,
            } => {
                self.clock.set(*time);
                let loc = self.location(index, *location)?;
                let region = self.region(index, region)?;
                let sparse = self.sparse(index, sparse)?;
                p.exit_region(&loc, *time, region, metrics, &sparse)?;
            }
            TraceEvent::RecordingOff {
                location,
                time,
                region,
                metrics,
            } => {
                self.clock.set(*time);
                let region = self.region(index, region)?;
                p.disable_recording(&self.location(index, *location)?, *time, region, metrics)?;
            }
            TraceEvent::RecordingOn {
                location,
                time,
                region,
                metrics,
            } => {
                self.clock.set(*time);
                let region = self.region(index, region)?;
                p.enable_recording(&self.location(index, *location)?, *time, region, metrics)?;
            }
            TraceEvent::Sample { location } => {
                p.sample(&self.location(index, *location)?)?;
            }
            TraceEvent::Metric {
                location,
                metric,
                value,
            } => {
                let loc = self.location(index, *location)?;
                let metric = self.metric(index, metric)?;
                match *value {
                    MetricValue::Int(v) => p.trigger_int(&loc, metric, v)?,
                    MetricValue::Double(v) => p.trigger_double(&loc, metric, v)?,
                }
            }
            TraceEvent::Parameter {
                location,
                parameter,
                value,
            } => {
                let loc = self.location(index, *location)?;
                self.parameter(index, &loc, parameter, value)?;
            }
            TraceEvent::Fork {
                location,
                threads,
                sequence,
            } => {
                p.fork(&self.location(index, *location)?, *threads, *sequence)?;
            }
            TraceEvent::Join { location } => {
                p.join(&self.location(index, *location)?)?;
            }
            TraceEvent::Activate {
                location,
                parent,
                sequence,
            } => {
                let parent = self.parent(index, *parent)?;
                p.activate(&self.location(index, *location)?, parent, *sequence)?;
            }
            TraceEvent::Deactivate { location, parent } => {
                let parent = self.parent(index, *parent)?;
                p.deactivate(&self.location(index, *location)?, parent)?;
            }
            TraceEvent::TaskCreate {
                location,
                task,
                generation,
            } => {
                let handle = p.create_task_data(&self.location(index, *location)?, *generation)?;
                self.tasks.insert(*task, handle);
            }
            TraceEvent::TaskBegin {
                location,
                time,
                region,
                task,
                metrics,
            } => {
                self.clock.set(*time);
                let loc = self.location(index, *location)?;
                let region = self.region(index, region)?;
                let task = self.task(index, *task)?;
                p.task_begin(&loc, *time, region, metrics, &task)?;
            }
            TraceEvent::TaskSwitch {
                location,
                time,
                task,
                metrics,
            } => {
                self.clock.set(*time);
                let loc = self.location(index, *location)?;
                let task = self.task(index, *task)?;
                p.task_switch(&loc, *time, metrics, &task)?;
            }
            TraceEvent::TaskEnd {
                location,
                time,
                region,
                metrics,
            } => {
                self.clock.set(*time);
                let loc = self.location(index, *location)?;
                let region = self.region(index, region)?;
                p.task_end(&loc, *time, region, metrics)?;
            }
            TraceEvent::TaskFree { location, task } => {
                let loc = self.location(index, *location)?;
                let handle = self
                    .tasks
                    .remove(task)
                    .ok_or(Error::UnknownTask { index, task: *task })?;
                p.free_task_data(&loc, handle)?;
            }
            TraceEvent::Alloc {
                location,
                id,
                bytes,
                heap,
            } => {
                let memento = p.track_alloc(&self.location(index, *location)?, *bytes, *heap)?;
                self.allocations.insert(*id, memento);
            }
            TraceEvent::Realloc {
                location,
                id,
                old_bytes,
                new_bytes,
                heap,
            } => {
                let loc = self.location(index, *location)?;
                match self.allocations.get_mut(id) {
                    Some(Some(memento)) => {
                        p.track_realloc(&loc, memento, *old_bytes, *new_bytes, *heap)?
                    }
                    Some(None) => {}
                    None => return Err(Error::UnknownAllocation { index, id: *id }),
                }
            }
            TraceEvent::Free {
                location,
                id,
                bytes,
            } => {
                let loc = self.location(index, *location)?;
                let memento = self.allocations.remove(id).flatten();
                p.track_free(&loc, memento, *bytes)?;
            }
            TraceEvent::Leak { id, bytes } => match self.allocations.get(id) {
                Some(Some(memento)) => p.leaked_memory(memento, *bytes)?,
                Some(None) => {}
                None => return Err(Error::UnknownAllocation { index, id: *id }),
            },
        }
        Ok(())
    }

    fn parameter(
        &self,
        index: usize,
        loc: &Location,
        name: &str,
        value: &ParameterArg,
    ) -> Result<(), Error> {
        let p = self.profile;
        let &(handle, parameter_type) = self
            .names
            .parameters
            .get(name)
            .ok_or_else(|| undefined(index, "parameter", name))?;
        match (parameter_type, value) {
            (ParameterType::String, ParameterArg::Text(s)) => {
                let string = p.definitions().new_string(s);
                p.parameter_string(loc, handle, string)?;
            }
            (ParameterType::Int64, ParameterArg::Int(v)) => p.parameter_int(loc, handle, *v)?,
            (ParameterType::Uint64, ParameterArg::Int(v)) => {
                let v = u64::try_from(*v).map_err(|_| Error::InvalidEvent {
                    index,
                    reason: format!("negative value {v} for unsigned parameter '{name}'"),
                })?;
                p.parameter_uint(loc, handle, v)?;
            }
            _ => {
                return Err(Error::InvalidEvent {
                    index,
                    reason: format!("value of parameter '{name}' does not match its type"),
                });
            }
        }
        Ok(())
    }
}

fn undefined(index: usize, kind: &'static str, name: &str) -> Error {
    Error::Undefined {
        index,
        kind,
        name: name.to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> Trace {
        serde_json::from_str(json).unwrap()
    }

    const NESTED: &str = r#"{
        "definitions": {
            "regions": [
                {"name": "main"},
                {"name": "foo", "type": "function"}
            ],
            "metrics": [{"name": "cycles", "dense": true}]
        },
        "locations": [{"id": 0}],
        "events": [
            {"event": "program_begin", "location": 0, "time": 0, "metrics": [0]},
            {"event": "enter", "location": 0, "time": 0, "region": "main", "metrics": [0]},
            {"event": "enter", "location": 0, "time": 10, "region": "foo", "metrics": [100]},
            {"event": "exit", "location": 0, "time": 15, "region": "foo", "metrics": [180]},
            {"event": "exit", "location": 0, "time": 20, "region": "main", "metrics": [200]},
            {"event": "program_end", "location": 0, "time": 20, "metrics": [200]}
        ]
    }"#;

    #[test]
    fn nested_regions_replay_into_one_tree() {
        let replay = replay(&parse(NESTED), ProfileConfig::default()).unwrap();
        let defs = replay.profile.definitions();
        let forest = &replay.forest;
        let t = forest.tree();
        let root = forest.thread_root(LocationId(0)).unwrap();
        let program = forest.child_region(root, defs.program_region()).unwrap();
        let main = t.children(program).next().unwrap();
        assert_eq!(t.node(main).kind().label(defs), "main");
        assert_eq!(t.node(main).inclusive_time().sum, 20);
        assert_eq!(t.exclusive_time(main), 15);
        let foo = t.children(main).next().unwrap();
        assert_eq!(t.node(foo).dense_metrics()[0].sum, 80);
    }

    #[test]
    fn undefined_region_aborts_the_replay() {
        let trace = parse(
            r#"{
                "locations": [{"id": 0}],
                "events": [{"event": "enter", "location": 0, "time": 1, "region": "nope"}]
            }"#,
        );
        let err = replay(&trace, ProfileConfig::default()).unwrap_err();
        assert!(
            matches!(err, Error::Undefined { index: 0, kind: "region", .. }),
            "unexpected error: {err}"
        );
    }

    #[test]
    fn mismatched_exit_disables_only_that_location() {
        let trace = parse(
            r#"{
                "definitions": {"regions": [{"name": "a"}, {"name": "b"}]},
                "locations": [{"id": 0}, {"id": 1, "parent": 0}],
                "events": [
                    {"event": "enter", "location": 1, "time": 1, "region": "a"},
                    {"event": "exit", "location": 1, "time": 2, "region": "b"},
                    {"event": "enter", "location": 0, "time": 1, "region": "b"},
                    {"event": "exit", "location": 0, "time": 3, "region": "b"}
                ]
            }"#,
        );
        let replay = replay(&trace, ProfileConfig::default()).unwrap();
        let worker = replay.profile.location(LocationId(1)).unwrap();
        assert!(worker.is_stopped());
        let master = replay.profile.location(LocationId(0)).unwrap();
        assert!(!master.is_stopped());
    }

    #[test]
    fn parameter_value_must_match_its_type() {
        let trace = parse(
            r#"{
                "definitions": {
                    "regions": [{"name": "solve"}],
                    "parameters": [{"name": "size", "type": "uint64"}]
                },
                "locations": [{"id": 0}],
                "events": [
                    {"event": "enter", "location": 0, "time": 1, "region": "solve"},
                    {"event": "parameter", "location": 0, "parameter": "size", "value": "big"}
                ]
            }"#,
        );
        let err = replay(&trace, ProfileConfig::default()).unwrap_err();
        assert!(matches!(err, Error::InvalidEvent { index: 1, .. }));
    }

    #[test]
    fn redeclared_program_region_is_the_reserved_one() {
        let trace = parse(
            r#"{
                "definitions": {"program": "app", "regions": [{"name": "app"}]},
                "locations": [{"id": 0}],
                "events": [
                    {"event": "enter", "location": 0, "time": 0, "region": "app"},
                    {"event": "exit", "location": 0, "time": 5, "region": "app"}
                ]
            }"#,
        );
        let replay = replay(&trace, ProfileConfig::default()).unwrap();
        let defs = replay.profile.definitions();
        assert_eq!(defs.region_name(defs.program_region()), "app");
        let root = replay.forest.thread_root(LocationId(0)).unwrap();
        assert!(
            replay
                .forest
                .child_region(root, defs.program_region())
                .is_some()
        );
    }

    #[test]
    fn duplicate_region_is_rejected() {
        let trace = parse(
            r#"{
                "definitions": {"regions": [{"name": "a"}, {"name": "a"}]},
                "locations": [{"id": 0}]
            }"#,
        );
        let err = replay(&trace, ProfileConfig::default()).unwrap_err();
        assert!(matches!(err, Error::DuplicateDefinition { kind: "region", .. }));
    }

    #[test]
    fn unfinished_regions_are_closed_at_the_last_timestamp() {
        let trace = parse(
            r#"{
                "definitions": {"regions": [{"name": "main"}]},
                "locations": [{"id": 0}],
                "events": [
                    {"event": "program_begin", "location": 0, "time": 0},
                    {"event": "enter", "location": 0, "time": 4, "region": "main"},
                    {"event": "sample", "location": 0},
                    {"event": "enter", "location": 0, "time": 9, "region": "main"}
                ]
            }"#,
        );
        let replay = replay(&trace, ProfileConfig::default()).unwrap();
        let defs = replay.profile.definitions();
        let forest = &replay.forest;
        let t = forest.tree();
        let root = forest.thread_root(LocationId(0)).unwrap();
        let program = forest.child_region(root, defs.program_region()).unwrap();
        assert_eq!(t.node(program).inclusive_time().sum, 9);
        let outer = t.children(program).next().unwrap();
        assert_eq!(t.node(outer).hits(), 1);
        assert_eq!(t.node(outer).inclusive_time().sum, 5);
        let inner = t.children(outer).next().unwrap();
        assert_eq!(t.node(inner).inclusive_time().sum, 0);
    }
}
