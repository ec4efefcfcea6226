//! Heap usage attribution.
//!
//! Allocation events are charged to the node that is current on the
//! allocating location. Each allocation hands back an `AllocMemento` naming
//! that location and node so a later leak report lands on the callpath that
//! allocated, even when the free (or the lack of it) is noticed elsewhere.

use tracing::warn;

use crate::definitions::MetricHandle;
use crate::error::Error;
use crate::location::{Location, LocationData};
use crate::metric::TriggerScheme;
use crate::node::NodeId;
use crate::profile::Profile;

/// Where an allocation happened. Stays meaningful until the location is
/// finalized; after that a leak report for it is dropped.
#[derive(Debug, Clone)]
pub struct AllocMemento {
    location: Location,
    epoch: u64,
    node: NodeId,
}

impl AllocMemento {
    pub fn location(&self) -> &Location {
        &self.location
    }

    pub fn node(&self) -> NodeId {
        self.node
    }
}

impl Profile {
    fn charge(
        &self,
        data: &mut LocationData,
        samples: &[(MetricHandle, u64)],
    ) -> Result<NodeId, Error> {
        let node = data.current.ok_or(Error::NoCurrentNode {
            location: data.id,
            metric: samples[0].0,
        })?;
        for &(metric, value) in samples {
            data.tree
                .trigger_int(node, metric, value, TriggerScheme::AsIs)?;
        }
        Ok(node)
    }

    /// Record an allocation of `bytes`. `process_bytes` is the heap size of
    /// the whole process after the allocation.
    pub fn track_alloc(
        &self,
        location: &Location,
        bytes: u64,
        process_bytes: u64,
    ) -> Result<Option<AllocMemento>, Error> {
        let r = self.0.reserved;
        let charged = self.with_location(location, |data| {
            let node = self.charge(
                data,
                &[(r.bytes_allocated, bytes), (r.max_heap, process_bytes)],
            )?;
            Ok((data.epoch, node))
        })?;
        Ok(charged.map(|(epoch, node)| AllocMemento {
            location: location.clone(),
            epoch,
            node,
        }))
    }

    /// Record a reallocation from `old_bytes` to `new_bytes`. The memento
    /// moves to the current node of `location`.
    pub fn track_realloc(
        &self,
        location: &Location,
        memento: &mut AllocMemento,
        old_bytes: u64,
        new_bytes: u64,
        process_bytes: u64,
    ) -> Result<(), Error> {
        let r = self.0.reserved;
        let charged = self.with_location(location, |data| {
            let node = self.charge(
                data,
                &[
                    (r.bytes_freed, old_bytes),
                    (r.bytes_allocated, new_bytes),
                    (r.max_heap, process_bytes),
                ],
            )?;
            Ok((data.epoch, node))
        })?;
        if let Some((epoch, node)) = charged {
            *memento = AllocMemento {
                location: location.clone(),
                epoch,
                node,
            };
        }
        Ok(())
    }

    /// Record a free. An unknown allocation is still counted, with a warning.
    pub fn track_free(
        &self,
        location: &Location,
        memento: Option<AllocMemento>,
        bytes: u64,
    ) -> Result<(), Error> {
        if memento.is_none() {
            warn!(location = %location.id(), bytes, "free of an untracked allocation");
        }
        let freed = self.0.reserved.bytes_freed;
        self.on_location(location, |data| {
            self.charge(data, &[(freed, bytes)]).map(|_| ())
        })
    }

    /// Report `bytes` that were never freed, on the node that allocated them.
    pub fn leaked_memory(&self, memento: &AllocMemento, bytes: u64) -> Result<(), Error> {
        let leaked = self.0.reserved.bytes_leaked;
        self.on_location(&memento.location, |data| {
            if data.epoch != memento.epoch || !data.tree.contains(memento.node) {
                warn!(
                    location = %data.id,
                    bytes,
                    "leak reported for an allocation from an earlier measurement epoch"
                );
                return Ok(());
            }
            data.tree
                .trigger_int(memento.node, leaked, bytes, TriggerScheme::AsIs)
        })
    }
}
