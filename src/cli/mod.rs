pub mod check;
pub mod output;
pub mod permissions;
pub mod runtime;
pub mod simulate;

pub use check::{cmd_check, CheckArgs};
pub use output::OutputFormat;
pub use permissions::cmd_permissions;
pub use runtime::init_logging;
pub use simulate::{cmd_simulate, SimulateArgs};
