//! HTTP adapters.

mod rest_client;

pub use rest_client::{DEFAULT_TIMEOUT, VenueRestClient};
