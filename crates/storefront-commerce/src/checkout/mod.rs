//! Checkout module.
//!
//! The four-step checkout state machine, the data it collects and the
//! payment gateway adapter it hands off to in its payment step.

mod address;
mod customer;
mod orchestrator;
mod order;
mod payment;
mod state;

pub use address::ShippingAddress;
pub use customer::{validate_document, validate_email, validate_phone, CustomerInfo, DocumentType};
pub use orchestrator::{CheckoutOrchestrator, QuoteTicket};
pub use order::{Order, OrderLine, OrderRequest, OrderStatus, Payment, PaymentStatus};
pub use payment::{FormToken, GatewayAnswer, PaymentForm, PaymentGatewayAdapter, PaymentOutcome};
pub use state::{CheckoutState, CheckoutStep, InFlight, InFlightGuard, PaymentMethod};
