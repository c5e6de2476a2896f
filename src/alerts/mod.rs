mod dispatch;
mod engine;
mod record;

pub use dispatch::AlertDispatcher;
pub use engine::{AlertEngine, CentroidIdentity, IdentityResolver};
pub use record::{AlertRecord, ALERT_STATUS_NEW, ALERT_TYPE_OFF_DUTY};
