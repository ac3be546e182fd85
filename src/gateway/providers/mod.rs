pub mod http_provider;
pub mod mock_provider;

pub use http_provider::HttpModelProvider;
pub use mock_provider::MockProvider;
