//! Generative model backends.

pub mod generative_api;
pub mod mock;

pub use generative_api::{GenerativeApiClient, GenerativeApiConfig};
pub use mock::{MockModelClient, MockReply, RecordedCall};
