//! Card payment gateway integration. The service never initiates charges;
//! clients pay the gateway directly and hand us the transaction id, which we
//! verify server-side before granting anything.

pub mod error;
pub mod flutterwave;
pub mod types;
pub mod utils;
pub mod verifier;

pub use error::{GatewayError, GatewayResult};
pub use types::{ChargeStatus, VerifiedCharge};
pub use verifier::PaymentVerifier;
