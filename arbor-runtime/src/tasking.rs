//! Task-based execution: task data, task switches and migration.
//!
//! A task runs in its own detached subtree whose root is a `TaskRoot` node.
//! While a task runs, the implicit task of the location sits in a "task
//! pointer" region (the task's region entered on the implicit task's node),
//! which is what gets counted as a switch during post-processing.
//!
//! Tied tasks stay in the tree of the location that began them. Untied tasks
//! may resume elsewhere: on suspend their path is packed into a portable stub
//! (a root-first list of `NodeData`) and their tree is merged into the
//! location root; the next resume rebuilds the path from the stub in the
//! resuming location's tree.
//!
//! Lock order is location, then task. A task is never locked while a
//! location lock is being acquired.

use std::sync::{Arc, Mutex, MutexGuard};

use crate::definitions::{LocationId, RegionHandle, RegionType};
use crate::error::Error;
use crate::location::{Location, LocationData};
use crate::metric::TriggerScheme;
use crate::node::{CallTree, NodeData, NodeFlags, NodeId};
use crate::node_type::NodeKind;
use crate::profile::Profile;

#[derive(Debug)]
enum TaskState {
    /// Created, not yet begun.
    Fresh,
    Resident {
        home: LocationId,
        root: NodeId,
        current: Option<NodeId>,
    },
    /// Suspended untied task; the path is carried along instead of node ids.
    Migrating { stub: Vec<NodeData> },
    Finished,
}

#[derive(Debug)]
pub(crate) struct ProfileTask {
    creator: LocationId,
    last_location: LocationId,
    can_migrate: bool,
    depth: u64,
    state: TaskState,
}

/// Profiling data of one task. Clones refer to the same task.
#[derive(Debug, Clone)]
pub struct TaskHandle(Arc<Mutex<ProfileTask>>);

impl TaskHandle {
    fn new(creator: LocationId) -> Self {
        Self(Arc::new(Mutex::new(ProfileTask {
            creator,
            last_location: creator,
            can_migrate: true,
            depth: 0,
            state: TaskState::Fresh,
        })))
    }

    fn lock(&self) -> MutexGuard<'_, ProfileTask> {
        self.0.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Location that allocated this task object.
    pub fn creator(&self) -> LocationId {
        self.lock().creator
    }

    /// Location the task last ran on.
    pub fn last_location(&self) -> LocationId {
        self.lock().last_location
    }

    pub fn is_untied(&self) -> bool {
        self.lock().can_migrate
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.lock().state, TaskState::Finished)
    }

    /// Whether the task is suspended with its path packed into a stub.
    pub fn is_migrating(&self) -> bool {
        matches!(self.lock().state, TaskState::Migrating { .. })
    }

    pub fn same(&self, other: &TaskHandle) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

fn is_implicit(data: &LocationData, task: Option<&TaskHandle>) -> bool {
    match (task, data.implicit_task.as_ref()) {
        (None, None) => true,
        (Some(a), Some(b)) => a.same(b),
        _ => false,
    }
}

/// `node` and its ancestors, innermost first.
fn path_to_root(tree: &CallTree, node: Option<NodeId>) -> Vec<NodeId> {
    let mut path = Vec::new();
    let mut cur = node;
    while let Some(n) = cur {
        path.push(n);
        cur = tree.node(n).parent;
    }
    path
}

fn resume_path(tree: &mut CallTree, node: Option<NodeId>, timestamp: u64, metrics: &[u64]) {
    for id in path_to_root(tree, node) {
        let n = tree.node_mut(id);
        n.inclusive_time.start(timestamp);
        for (i, m) in n.dense_metrics.iter_mut().enumerate() {
            m.start(metrics.get(i).copied().unwrap_or(0));
        }
    }
}

/// Fold a task tree into the location root: add it when no equal child
/// exists, merge it otherwise.
fn merge_into_root(data: &mut LocationData, task_root: NodeId) -> Result<(), Error> {
    let root = data.root;
    let kind = data.tree.node(task_root).kind().clone();
    match data.tree.find_child(root, &kind) {
        Some(matching) => data.tree.merge_subtree(matching, task_root),
        None => {
            data.tree.add_child(root, task_root);
            Ok(())
        }
    }
}

impl Profile {
    /// Allocate profiling data for a new task. Generation 0 is the implicit
    /// task of the location and becomes its current task.
    pub fn create_task_data(
        &self,
        location: &Location,
        generation: u32,
    ) -> Result<TaskHandle, Error> {
        let created = self.with_location(location, |data| {
            let task = data
                .tasks
                .recycle(&self.0.task_exchange)
                .unwrap_or_else(|| TaskHandle::new(data.id));
            {
                let mut t = task.lock();
                t.state = TaskState::Fresh;
                t.depth = 0;
                t.can_migrate = true;
                t.last_location = data.id;
            }
            // Every task may migrate away; the increment on release evens
            // this out when it does not.
            data.migration_sum -= 1;
            if generation == 0 {
                data.implicit_task = Some(task.clone());
                data.current_task = Some(task.clone());
            } else {
                self.set_has_tasks();
            }
            Ok(task)
        })?;
        Ok(created.unwrap_or_else(|| TaskHandle::new(location.id())))
    }

    /// Return task data to the pool of `location`. Objects created on another
    /// location are kept aside and flow back in batches.
    pub fn free_task_data(&self, location: &Location, task: TaskHandle) -> Result<(), Error> {
        self.on_location(location, move |data| {
            let local = task.creator() == data.id;
            data.tasks.release(
                task,
                local,
                &self.0.task_exchange,
                self.0.config.task_exchange_num,
                "task",
            );
            data.migration_sum += 1;
            Ok(())
        })
    }

    pub fn task_begin(
        &self,
        location: &Location,
        timestamp: u64,
        region: RegionHandle,
        metrics: &[u64],
        task: &TaskHandle,
    ) -> Result<(), Error> {
        self.on_location(location, |data| {
            let untied = self.0.defs.region_type(region) == RegionType::TaskUntied;
            let root = data
                .tree
                .create_node(None, NodeKind::TaskRoot { region }, timestamp, untied)?;
            resume_path(&mut data.tree, Some(root), timestamp, metrics);
            data.tree.node_mut(root).count = 1;
            {
                let mut t = task.lock();
                t.state = TaskState::Resident {
                    home: data.id,
                    root,
                    current: Some(root),
                };
                t.depth = 1;
                t.can_migrate = untied;
            }
            self.switch_task(data, Some(task.clone()), timestamp, metrics, true)
        })
    }

    pub fn task_switch(
        &self,
        location: &Location,
        timestamp: u64,
        metrics: &[u64],
        task: &TaskHandle,
    ) -> Result<(), Error> {
        self.on_location(location, |data| {
            self.switch_task(data, Some(task.clone()), timestamp, metrics, false)
        })
    }

    /// End the running task: exit its region, hand control back to the
    /// implicit task and fold the task tree into the location root.
    pub fn task_end(
        &self,
        location: &Location,
        timestamp: u64,
        region: RegionHandle,
        metrics: &[u64],
    ) -> Result<(), Error> {
        self.on_location(location, |data| {
            let task = match data.current_task.clone() {
                Some(task) if !is_implicit(data, Some(&task)) => task,
                _ => return Err(Error::UnknownTask(data.id)),
            };
            self.exit_event(data, timestamp, Some(region), metrics)?;
            let implicit = data.implicit_task.clone();
            self.switch_task(data, implicit, timestamp, metrics, false)?;

            let mut t = task.lock();
            match std::mem::replace(&mut t.state, TaskState::Finished) {
                TaskState::Resident { root, .. } => merge_into_root(data, root),
                // Untied task ended right after migrating: nothing was
                // rebuilt, so there is nothing left to merge.
                TaskState::Migrating { .. } => Ok(()),
                TaskState::Fresh | TaskState::Finished => Err(Error::UnknownTask(data.id)),
            }
        })
    }

    fn switch_task(
        &self,
        data: &mut LocationData,
        task: Option<TaskHandle>,
        timestamp: u64,
        metrics: &[u64],
        start: bool,
    ) -> Result<(), Error> {
        self.suspend_task(data, timestamp, metrics)?;
        let previous = std::mem::replace(&mut data.current_task, task.clone());
        if let Err(err) = self.restore_task(data) {
            data.current_task = previous;
            self.restore_task(data)?;
            return Err(err);
        }

        let Some(task) = task else {
            return Ok(());
        };
        if is_implicit(data, Some(&task)) {
            return Ok(());
        }
        resume_path(&mut data.tree, data.current, timestamp, metrics);
        let region = {
            let t = task.lock();
            match t.state {
                TaskState::Resident { root, .. } => data.tree.node(root).kind().region_handle(),
                _ => None,
            }
        }
        .ok_or(Error::UnknownTask(data.id))?;
        self.enter_task_pointer(data, region, timestamp, metrics)?;
        if !start {
            let mut t = task.lock();
            if t.last_location != data.id {
                data.migration_win += 1;
                t.last_location = data.id;
            }
        }
        Ok(())
    }

    fn suspend_task(
        &self,
        data: &mut LocationData,
        timestamp: u64,
        metrics: &[u64],
    ) -> Result<(), Error> {
        let current_task = data.current_task.clone();
        if is_implicit(data, current_task.as_ref()) {
            data.implicit_depth = data.depth;
            data.current_implicit = data.current;
            return Ok(());
        }
        let Some(task) = current_task else {
            return Err(Error::UnknownTask(data.id));
        };
        let mut t = task.lock();
        let (root, current) = match &mut t.state {
            TaskState::Resident { root, current, .. } => {
                *current = data.current;
                (*root, *current)
            }
            _ => return Err(Error::UnknownTask(data.id)),
        };
        t.depth = data.depth;

        self.exit_task_pointer(data, timestamp, metrics)?;

        let path = path_to_root(&data.tree, current);
        let untied = t.can_migrate;
        for &id in &path {
            let n = data.tree.node_mut(id);
            if untied {
                n.inclusive_time.suspend_untied(timestamp);
            } else {
                n.inclusive_time.suspend_tied(timestamp);
            }
            for (i, m) in n.dense_metrics.iter_mut().enumerate() {
                let value = metrics.get(i).copied().unwrap_or(0);
                if untied {
                    m.suspend_untied(value);
                } else {
                    m.suspend_tied(value);
                }
            }
        }

        if untied && current.is_some() {
            let mut stub = data.stubs.recycle(&self.0.stub_exchange).unwrap_or_default();
            stub.clear();
            for &id in path.iter().rev() {
                let mut node = data.tree.node_data(id);
                node.inclusive_time = node.inclusive_time.continuation();
                for m in &mut node.dense_metrics {
                    *m = m.continuation();
                }
                node.count = 0;
                node.hits = 0;
                node.flags.remove(NodeFlags::IS_FORK_NODE);
                stub.push(node);
            }
            merge_into_root(data, root)?;
            t.state = TaskState::Migrating { stub };
        }
        Ok(())
    }

    fn restore_task(&self, data: &mut LocationData) -> Result<(), Error> {
        let current_task = data.current_task.clone();
        if is_implicit(data, current_task.as_ref()) {
            data.depth = data.implicit_depth;
            data.current = data.current_implicit;
            return Ok(());
        }
        let Some(task) = current_task else {
            return Err(Error::UnknownTask(data.id));
        };
        let mut t = task.lock();
        match std::mem::replace(&mut t.state, TaskState::Finished) {
            TaskState::Resident {
                home,
                root,
                current,
            } => {
                t.state = TaskState::Resident {
                    home,
                    root,
                    current,
                };
                if home != data.id {
                    return Err(Error::TiedTaskMigrated {
                        creator: home,
                        location: data.id,
                    });
                }
                data.current = current;
            }
            TaskState::Migrating { mut stub } => {
                let mut root = None;
                let mut parent = None;
                for node in &stub {
                    let id = data.tree.create_from_data(parent, node)?;
                    root.get_or_insert(id);
                    parent = Some(id);
                }
                stub.clear();
                let local = t.creator == data.id;
                data.stubs.release(
                    stub,
                    local,
                    &self.0.stub_exchange,
                    self.0.config.task_exchange_num,
                    "stub",
                );
                let root = root.ok_or(Error::UnknownTask(data.id))?;
                t.state = TaskState::Resident {
                    home: data.id,
                    root,
                    current: parent,
                };
                data.current = parent;
            }
            other @ (TaskState::Fresh | TaskState::Finished) => {
                t.state = other;
                return Err(Error::UnknownTask(data.id));
            }
        }
        data.depth = t.depth;
        Ok(())
    }

    /// Enter the task pointer region on behalf of the implicit task.
    fn enter_task_pointer(
        &self,
        data: &mut LocationData,
        region: RegionHandle,
        timestamp: u64,
        metrics: &[u64],
    ) -> Result<(), Error> {
        let parent = data.current_implicit.unwrap_or(data.root);
        let depth = data.implicit_depth;
        let node = self.enter_node(data, parent, depth, timestamp, region, metrics)?;
        data.current_implicit = Some(node);
        Ok(())
    }

    fn exit_task_pointer(
        &self,
        data: &mut LocationData,
        timestamp: u64,
        metrics: &[u64],
    ) -> Result<(), Error> {
        let Some(node) = data.current_implicit else {
            return Ok(());
        };
        let region = data.tree.node(node).kind().region_handle();
        let task_depth = data.depth;
        data.depth = data.implicit_depth;
        let exited = self.exit_node(data, node, region, timestamp, metrics);
        data.depth = task_depth;
        data.current_implicit = exited?;
        Ok(())
    }

    /// Record migration statistics on the current node and reset them.
    pub(crate) fn update_task_metrics(&self, data: &mut LocationData) -> Result<(), Error> {
        if data.migration_sum == 0 && data.migration_win == 0 {
            return Ok(());
        }
        if let Some(node) = data.current {
            let reserved = self.0.reserved;
            let loss = (data.migration_win - data.migration_sum).max(0) as u64;
            let win = data.migration_win.max(0) as u64;
            data.tree
                .trigger_int(node, reserved.migration_loss, loss, TriggerScheme::AsIs)?;
            data.tree
                .trigger_int(node, reserved.migration_win, win, TriggerScheme::AsIs)?;
        }
        data.migration_sum = 0;
        data.migration_win = 0;
        Ok(())
    }
}
