//! Services module for business logic and integrations

pub mod entitlement;
pub mod notification;
pub mod purchase;
pub mod streaming;

pub use entitlement::{AccessDecision, DenialReason, EntitlementService};
pub use notification::{LogNotifier, Notifier, PurchaseEvent};
pub use purchase::{
    CardCheckout, PurchaseReceipt, PurchaseService, TopUpReceipt, TopUpRequest, WalletCheckout,
};
pub use streaming::{SignedUrl, StreamGrant, StreamSigner, StreamingService};
