pub mod id;
pub mod order;
pub mod status;

pub use id::CanonicalId;
pub use order::{NewOrder, Order, StudentInfo};
pub use status::{OrderStatus, PaymentStatus, StatusUpdate};
