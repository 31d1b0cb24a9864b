pub mod client;
pub mod copart;
pub mod error;
pub mod iaai;
pub mod normalize;
pub mod rate_limit;
mod retry;
#[cfg(any(test, feature = "test-util"))]
pub mod scripted;
pub mod sink;
pub mod source;
pub mod types;

pub use client::ProviderClientConfig;
pub use copart::CopartClient;
pub use error::{ProviderError, SinkError};
pub use iaai::IaaiClient;
pub use rate_limit::RequestSpacer;
pub use retry::RetryPolicy;
#[cfg(any(test, feature = "test-util"))]
pub use scripted::{ScriptedFailure, ScriptedSource};
#[cfg(any(test, feature = "test-util"))]
pub use sink::MemorySink;
pub use sink::{SaleSink, TracingSink};
pub use source::SaleSource;
pub use types::{SalePage, SaleQuery, SaleRecord};
