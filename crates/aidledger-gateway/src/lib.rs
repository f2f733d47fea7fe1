//! Gateway layer: contracts and HTTP clients for the PIN store, mobile-money
//! provider, identity service and academic records.

pub mod contract;
pub mod http;

#[cfg(any(test, feature = "testing"))]
pub mod fake;

pub use contract::{
    AcademicRecords, CollectionRequest, GatewayError, IdentityProvider, MobileMoney, PinStatus,
    PinStore, ProviderAck,
};
pub use http::{HttpAcademicRecords, HttpIdentity, HttpMobileMoney, HttpPinStore};
