//! Site tool tracking.
//!
//! Provides:
//! - Tool registry keyed by inventory number and QR payload
//! - Inventory reconciliation of scanned QR codes against a site
//! - Transfer requests between sites with foreman approval
//! - User onboarding through a multi-step registration dialog
//!
//! Persistence lives in the `tool-store` crate; this crate holds the rules.

pub mod app;
pub mod config;
pub mod error;
pub mod logging;
pub mod notify;
pub mod onboarding;
pub mod qr;
pub mod reconcile;
pub mod registry;
pub mod report;
pub mod session;
pub mod transfer;

pub use app::App;
pub use config::AppConfig;
pub use error::{InventoryError, InventoryResult};
pub use notify::{DeliveryStatus, Notification, NotificationGateway, Notifier};
pub use qr::{QrDecoder, QrResolver};
pub use reconcile::{InventoryReconciler, Partition, ReconcileOutcome};
pub use registry::{ToolRegistry, ToolSummary};
pub use report::InventoryReport;
pub use transfer::{TransferEngine, TransferOutcome};
