pub mod registry;

pub use registry::{SubscriptionHandle, SubscriptionRegistry};
