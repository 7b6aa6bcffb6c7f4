pub mod error;
pub mod executor;
pub mod metrics;
pub mod model;
pub mod orchestrator;
pub mod runtime;
mod window;

pub use error::SchedulerError;
pub use executor::{EchoForwarder, EditForwarder, ForwardError};
pub use model::{
    Admission, Clock, DeferredEdit, DrainReport, EditId, EditPayload, ManualClock,
    MutationRequest, SchedulerEvent, ThrottleConfig, TokioClock, WindowSnapshot, WindowState,
};
pub use orchestrator::DrainWorker;
pub use runtime::MutationScheduler;
