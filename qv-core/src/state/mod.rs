pub mod endpoint;
pub mod lifecycle;

pub use endpoint::{EndpointState, Registration, Role};
pub use lifecycle::{Lifecycle, QueueState};
