pub mod controller;
pub mod model;

pub use controller::{SessionController, SessionStatus};
pub use model::{ServerFamily, ServerVariant, SessionInfo, SessionRequest, SessionState};
