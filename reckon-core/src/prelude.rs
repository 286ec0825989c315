//! Prelude for commonly used types and traits in reckon-core.

pub use crate::backend::{Backend, DataFusionBackend, DialectFeatures};
pub use crate::coordinator::{Coordinator, RunOptions, RunOutcome};
pub use crate::error::{ReckonError, Result};
pub use crate::logging::LogConfig;
pub use crate::result::{ResultRow, ResultTable, ValidationStatus};
pub use crate::sink::{ResultHandler, StdoutHandler};
pub use crate::spec::{
    AggregateSpec, CalcField, Tolerances, ValidationKind, ValidationSpec,
};
