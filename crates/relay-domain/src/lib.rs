pub mod audit;
pub mod channel;
pub mod endpoint;
pub mod event;
pub mod filter;
pub mod organization;
pub mod receipt;
pub mod server;
pub mod session;
pub mod subscription;

pub use audit::AuditRecord;
pub use channel::Channel;
pub use endpoint::{BackoffStrategy, DeliveryEndpoint, DeliverySemantics, HealthStatus};
pub use event::Event;
pub use filter::FilterPredicate;
pub use organization::{Organization, OrganizationLimits};
pub use receipt::{DeliveryReceipt, ReceiptStatus};
pub use server::Server;
pub use session::Session;
pub use subscription::Subscription;
