use crate::definitions::{LocationId, MetricHandle, RegionHandle};

/// How far an error reaches.
///
/// `Location` errors have already stopped the location they occurred on;
/// every later event on that location is ignored. `Bug` errors mean the
/// instrumentation layer broke its event-ordering contract. `Usage` errors
/// come from lifecycle or API misuse and from the I/O around the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Location,
    Bug,
    Usage,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("profiling is not initialized")]
    NotInitialized,

    #[error("location {0} was never created")]
    UnknownLocation(LocationId),

    #[error("location {0} was created twice")]
    DuplicateLocation(LocationId),

    #[error("node arena of location {location} is exhausted")]
    ArenaExhausted { location: LocationId },

    #[error("exit from region {region} on location {location} without matching enter")]
    ExitWithoutEnter {
        location: LocationId,
        region: RegionHandle,
    },

    #[error("exit from region {exited} on location {location}, but region {open} is open")]
    RegionMismatch {
        location: LocationId,
        exited: RegionHandle,
        open: RegionHandle,
    },

    #[error("metric {metric} triggered outside of a region on location {location}")]
    NoCurrentNode {
        location: LocationId,
        metric: MetricHandle,
    },

    #[error("dense metric decreased between enter ({start}) and exit ({end}) on location {location}")]
    NonMonotonicMetric {
        location: LocationId,
        start: u64,
        end: u64,
    },

    #[error("encountered unknown task on location {0}")]
    UnknownTask(LocationId),

    #[error("sparse metric {0}: previous start value not consumed")]
    SparseBeginTwice(MetricHandle),

    #[error("sparse metric {0}: end value without start value")]
    SparseEndWithoutBegin(MetricHandle),

    #[error("sparse metric {0}: end value below start value")]
    SparseNotMonotonic(MetricHandle),

    #[error("sparse metric {0}: used as begin/end previously")]
    SparseSchemeMixed(MetricHandle),

    #[error("root of location {0} is not a thread root")]
    RootTypeInconsistent(LocationId),

    #[error("cannot assign a callpath to a {0} node")]
    UnexpectedNode(&'static str),

    #[error("tied task created on location {creator} resumed on location {location}")]
    TiedTaskMigrated {
        creator: LocationId,
        location: LocationId,
    },

    #[error("invalid value '{value}' for {name}: {reason}")]
    InvalidConfig {
        name: String,
        value: String,
        reason: String,
    },

    #[error("{0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn severity(&self) -> Severity {
        match self {
            Error::ArenaExhausted { .. }
            | Error::ExitWithoutEnter { .. }
            | Error::RegionMismatch { .. }
            | Error::NoCurrentNode { .. }
            | Error::NonMonotonicMetric { .. }
            | Error::UnknownTask(_) => Severity::Location,
            Error::UnknownLocation(_)
            | Error::SparseBeginTwice(_)
            | Error::SparseEndWithoutBegin(_)
            | Error::SparseNotMonotonic(_)
            | Error::SparseSchemeMixed(_)
            | Error::RootTypeInconsistent(_)
            | Error::UnexpectedNode(_) => Severity::Bug,
            Error::NotInitialized
            | Error::DuplicateLocation(_)
            | Error::TiedTaskMigrated { .. }
            | Error::InvalidConfig { .. }
            | Error::Json(_)
            | Error::Io(_) => Severity::Usage,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn region_mismatch_stops_only_the_location() {
        let err = Error::RegionMismatch {
            location: LocationId(3),
            exited: RegionHandle(1),
            open: RegionHandle(2),
        };
        assert_eq!(err.severity(), Severity::Location);
        let msg = err.to_string();
        assert!(msg.contains("location 3"), "unexpected message: {msg}");
    }

    #[test]
    fn sparse_misuse_is_a_bug() {
        assert_eq!(
            Error::SparseBeginTwice(MetricHandle(0)).severity(),
            Severity::Bug
        );
        assert_eq!(
            Error::SparseSchemeMixed(MetricHandle(0)).severity(),
            Severity::Bug
        );
    }
}
