pub mod action_status;
pub mod notification;
pub mod token;

pub use action_status::ActionStatus;
pub use notification::{Notification, NotificationLevel, Operation};
pub use token::{RawRequestGroup, Token, TokenRecord, TokenRequestGroup};
