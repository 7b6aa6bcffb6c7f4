use thiserror::Error;

use crate::executor::ForwardError;
use crate::model::EditId;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("deferred edit {0} was dropped before it could be forwarded")]
    Abandoned(EditId),
    #[error("deferred edit failed: {0}")]
    Forward(ForwardError),
    #[error("invalid throttle configuration: {0}")]
    InvalidConfig(String),
}
