//! Handles and the definition registry the engine talks to.
//!
//! Regions, parameters, metrics, strings and callpaths are owned by a
//! `Definitions` implementation; the engine only stores their opaque handles
//! and asks for names and types when it needs them. `Registry` is the
//! in-memory implementation used by the CLI and the tests.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

macro_rules! handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord,
            serde::Serialize, serde::Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub u32);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

handle!(RegionHandle);
handle!(ParameterHandle);
handle!(MetricHandle);
handle!(StringHandle);
handle!(
    /// Globally unified callpath, assigned by the post-processor.
    CallpathHandle
);
handle!(
    /// Identity of one thread of execution.
    LocationId
);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegionType {
    #[default]
    Function,
    Loop,
    User,
    Phase,
    Dynamic,
    DynamicPhase,
    DynamicLoop,
    DynamicFunction,
    DynamicLoopPhase,
    Parallel,
    Task,
    TaskUntied,
    TaskCreate,
    Artificial,
}

impl RegionType {
    /// Regions whose every instance gets its own "instance" parameter node.
    pub fn is_dynamic(self) -> bool {
        matches!(
            self,
            RegionType::Dynamic
                | RegionType::DynamicPhase
                | RegionType::DynamicLoop
                | RegionType::DynamicFunction
                | RegionType::DynamicLoopPhase
        )
    }

    pub fn is_phase(self) -> bool {
        matches!(
            self,
            RegionType::Phase | RegionType::DynamicPhase | RegionType::DynamicLoopPhase
        )
    }

    pub fn is_task(self) -> bool {
        matches!(self, RegionType::Task | RegionType::TaskUntied)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterType {
    Int64,
    Uint64,
    String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricValueType {
    Int64,
    Uint64,
    Double,
}

/// Kind of hardware a location runs on. Top-level regions of GPU locations
/// are grouped under `KERNELS` instead of `THREADS`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocationKind {
    #[default]
    Cpu,
    Gpu,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParameterValue {
    Int(i64),
    String(StringHandle),
}

/// One `(parameter, value)` pair of a callpath parameter list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallpathParameter {
    pub parameter: ParameterHandle,
    pub value: ParameterValue,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallpathDef {
    pub parent: Option<CallpathHandle>,
    pub region: RegionHandle,
    pub parameters: Vec<CallpathParameter>,
}

/// Region, parameter, metric and callpath registry.
///
/// Implementations must be usable from every measurement thread at once.
/// Unknown handles yield placeholder names rather than errors; the engine
/// never fails on a lookup.
pub trait Definitions: Send + Sync {
    fn region_name(&self, region: RegionHandle) -> String;
    fn region_type(&self, region: RegionHandle) -> RegionType;
    fn parameter_name(&self, parameter: ParameterHandle) -> String;
    fn parameter_type(&self, parameter: ParameterHandle) -> ParameterType;
    fn string(&self, string: StringHandle) -> String;
    fn metric_name(&self, metric: MetricHandle) -> String;
    fn metric_value_type(&self, metric: MetricHandle) -> MetricValueType;

    fn new_region(&self, name: &str, region_type: RegionType) -> RegionHandle;
    fn new_parameter(&self, name: &str, parameter_type: ParameterType) -> ParameterHandle;
    fn new_string(&self, value: &str) -> StringHandle;
    fn new_metric(&self, name: &str, value_type: MetricValueType) -> MetricHandle;
    /// Register a callpath; identical triples return the same handle.
    fn new_callpath(
        &self,
        parent: Option<CallpathHandle>,
        region: RegionHandle,
        parameters: &[CallpathParameter],
    ) -> CallpathHandle;
    fn callpath(&self, callpath: CallpathHandle) -> Option<CallpathDef>;

    /// The reserved region that brackets the whole program run.
    fn program_region(&self) -> RegionHandle;
}

#[derive(Debug, Clone)]
struct RegionDef {
    name: String,
    region_type: RegionType,
}

#[derive(Debug, Default)]
struct RegistryInner {
    regions: Vec<RegionDef>,
    parameters: Vec<(String, ParameterType)>,
    strings: Vec<String>,
    string_index: HashMap<String, StringHandle>,
    metrics: Vec<(String, MetricValueType)>,
    callpaths: Vec<CallpathDef>,
    callpath_index: HashMap<(Option<CallpathHandle>, RegionHandle, Vec<CallpathParameter>), CallpathHandle>,
}

/// Thread-safe in-memory `Definitions`.
///
/// Handles are indices into per-kind tables. Region 0 is the program region.
#[derive(Debug)]
pub struct Registry {
    inner: Mutex<RegistryInner>,
}

impl Registry {
    pub const PROGRAM_REGION_NAME: &'static str = "PROGRAM";

    pub fn new() -> Self {
        Self::with_program_name(Self::PROGRAM_REGION_NAME)
    }

    pub fn with_program_name(name: &str) -> Self {
        let inner = RegistryInner {
            regions: vec![RegionDef {
                name: name.to_owned(),
                region_type: RegionType::Artificial,
            }],
            ..RegistryInner::default()
        };
        Self {
            inner: Mutex::new(inner),
        }
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn callpath_count(&self) -> usize {
        self.lock().callpaths.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RegistryInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

fn next_handle(len: usize) -> u32 {
    u32::try_from(len).unwrap_or(u32::MAX)
}

impl Definitions for Registry {
    fn region_name(&self, region: RegionHandle) -> String {
        self.lock()
            .regions
            .get(region.0 as usize)
            .map_or_else(|| format!("<region {region}>"), |r| r.name.clone())
    }

    fn region_type(&self, region: RegionHandle) -> RegionType {
        self.lock()
            .regions
            .get(region.0 as usize)
            .map_or(RegionType::Function, |r| r.region_type)
    }

    fn parameter_name(&self, parameter: ParameterHandle) -> String {
        self.lock()
            .parameters
            .get(parameter.0 as usize)
            .map_or_else(|| format!("<parameter {parameter}>"), |p| p.0.clone())
    }

    fn parameter_type(&self, parameter: ParameterHandle) -> ParameterType {
        self.lock()
            .parameters
            .get(parameter.0 as usize)
            .map_or(ParameterType::Int64, |p| p.1)
    }

    fn string(&self, string: StringHandle) -> String {
        self.lock()
            .strings
            .get(string.0 as usize)
            .cloned()
            .unwrap_or_default()
    }

    fn metric_name(&self, metric: MetricHandle) -> String {
        self.lock()
            .metrics
            .get(metric.0 as usize)
            .map_or_else(|| format!("<metric {metric}>"), |m| m.0.clone())
    }

    fn metric_value_type(&self, metric: MetricHandle) -> MetricValueType {
        self.lock()
            .metrics
            .get(metric.0 as usize)
            .map_or(MetricValueType::Uint64, |m| m.1)
    }

    fn new_region(&self, name: &str, region_type: RegionType) -> RegionHandle {
        let mut inner = self.lock();
        let handle = RegionHandle(next_handle(inner.regions.len()));
        inner.regions.push(RegionDef {
            name: name.to_owned(),
            region_type,
        });
        handle
    }

    fn new_parameter(&self, name: &str, parameter_type: ParameterType) -> ParameterHandle {
        let mut inner = self.lock();
        let handle = ParameterHandle(next_handle(inner.parameters.len()));
        inner.parameters.push((name.to_owned(), parameter_type));
        handle
    }

    fn new_string(&self, value: &str) -> StringHandle {
        let mut inner = self.lock();
        if let Some(handle) = inner.string_index.get(value) {
            return *handle;
        }
        let handle = StringHandle(next_handle(inner.strings.len()));
        inner.strings.push(value.to_owned());
        inner.string_index.insert(value.to_owned(), handle);
        handle
    }

    fn new_metric(&self, name: &str, value_type: MetricValueType) -> MetricHandle {
        let mut inner = self.lock();
        let handle = MetricHandle(next_handle(inner.metrics.len()));
        inner.metrics.push((name.to_owned(), value_type));
        handle
    }

    fn new_callpath(
        &self,
        parent: Option<CallpathHandle>,
        region: RegionHandle,
        parameters: &[CallpathParameter],
    ) -> CallpathHandle {
        let mut inner = self.lock();
        let key = (parent, region, parameters.to_vec());
        if let Some(handle) = inner.callpath_index.get(&key) {
            return *handle;
        }
        let handle = CallpathHandle(next_handle(inner.callpaths.len()));
        inner.callpaths.push(CallpathDef {
            parent,
            region,
            parameters: parameters.to_vec(),
        });
        inner.callpath_index.insert(key, handle);
        handle
    }

    fn callpath(&self, callpath: CallpathHandle) -> Option<CallpathDef> {
        self.lock().callpaths.get(callpath.0 as usize).cloned()
    }

    fn program_region(&self) -> RegionHandle {
        RegionHandle(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn program_region_is_predefined() {
        let registry = Registry::with_program_name("a.out");
        let program = registry.program_region();
        assert_eq!(registry.region_name(program), "a.out");
        assert_eq!(registry.region_type(program), RegionType::Artificial);

        let foo = registry.new_region("foo", RegionType::Function);
        assert_ne!(foo, program);
        assert_eq!(registry.region_name(foo), "foo");
    }

    #[test]
    fn identical_callpaths_share_a_handle() {
        let registry = Registry::new();
        let main = registry.new_region("main", RegionType::Function);
        let foo = registry.new_region("foo", RegionType::Function);

        let root = registry.new_callpath(None, main, &[]);
        let a = registry.new_callpath(Some(root), foo, &[]);
        let b = registry.new_callpath(Some(root), foo, &[]);
        let top_foo = registry.new_callpath(None, foo, &[]);

        assert_eq!(a, b);
        assert_ne!(a, top_foo, "different parent must give a different callpath");
        assert_eq!(registry.callpath_count(), 3);
        assert_eq!(registry.callpath(a).unwrap().parent, Some(root));
    }

    #[test]
    fn parameters_distinguish_callpaths() {
        let registry = Registry::new();
        let foo = registry.new_region("foo", RegionType::Function);
        let size = registry.new_parameter("size", ParameterType::Int64);
        let params = [CallpathParameter {
            parameter: size,
            value: ParameterValue::Int(4),
        }];
        let plain = registry.new_callpath(None, foo, &[]);
        let with_param = registry.new_callpath(None, foo, &params);
        assert_ne!(plain, with_param);
    }

    #[test]
    fn strings_are_interned() {
        let registry = Registry::new();
        let a = registry.new_string("x");
        let b = registry.new_string("x");
        assert_eq!(a, b);
        assert_eq!(registry.string(a), "x");
    }

    #[test]
    fn region_type_predicates() {
        assert!(RegionType::DynamicLoopPhase.is_dynamic());
        assert!(RegionType::DynamicLoopPhase.is_phase());
        assert!(!RegionType::Loop.is_dynamic());
        assert!(RegionType::TaskUntied.is_task());
        assert!(!RegionType::TaskCreate.is_task());
    }
}
