pub mod alert;
pub mod notification;
pub mod quote;

pub use alert::{Alert, NewAlert};
pub use notification::{NewNotification, Notification};
pub use quote::PriceQuote;
