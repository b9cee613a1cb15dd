mod http_transport;
mod retry_policy;
mod session;

pub use http_transport::HttpTransport;
pub use retry_policy::RetryPolicy;
pub use session::{default_api_base_url, default_refresh_url, machine_fingerprint, KiroSession};
