//! ATLAS BiPRO Transfer Pipeline
//!
//! Multi-carrier client for the BiPRO document transfer profiles: carriers
//! publish shipments (document bundles) behind a SOAP TransferService that
//! is authorized by tokens from a carrier Security Token Service (STS).
//!
//! The pipeline, leaves first:
//!
//! - [`token`]: process-wide STS token cache with single-flight issuance
//! - [`ratelimit`]: per-carrier adaptive (AIMD) rate limiting
//! - [`auth`]: the eight authentication variants carriers support
//! - [`mtom`]: MTOM/XOP multipart splitting of `getShipment` responses
//! - [`transfer`]: the `listShipments` / `getShipment` /
//!   `acknowledgeShipment` operations with retry and pagination
//! - [`orchestrator`]: the per-carrier fetch → download → persist →
//!   acknowledge loop over a bounded worker pool
//!
//! All I/O goes through the [`transport::HttpTransport`] and
//! [`archive::ArchiveStore`] ports so the whole pipeline can run against
//! scripted fakes in tests.

pub mod archive;
pub mod auth;
pub mod carrier;
pub mod categories;
mod clock;
mod error;
pub mod mtom;
pub mod orchestrator;
pub mod ratelimit;
pub mod token;
pub mod transfer;
pub mod transport;
mod wsse;

pub use carrier::{AuthVariant, Carrier, CarrierTimeouts};
pub use clock::{Clock, SystemClock};
pub use error::TransferError;
pub use token::{StsToken, TokenCache};
