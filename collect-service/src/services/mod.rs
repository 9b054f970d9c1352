pub mod gateway;
pub mod memory;
pub mod metrics;
pub mod payments;
pub mod query;
pub mod reconciler;
pub mod repository;
pub mod store;

pub use gateway::{CollectGateway, EdvironGateway};
pub use memory::MemoryStore;
pub use metrics::{get_metrics, init_metrics};
pub use payments::PaymentService;
pub use reconciler::WebhookReconciler;
pub use repository::MongoStore;
pub use store::PaymentStore;
