//! sciharvest-common: Shared error type and the HTTP transport every
//! network call in the harvester goes through.

pub mod error;
pub mod transport;

pub use error::{HarvestError, Result};
pub use transport::{HeaderProfile, HttpClient, HttpConfig, Page};
