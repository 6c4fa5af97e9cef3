pub mod pinning;
pub mod tls;

pub use pinning::{PinConfiguration, PinMode, PinValidator, PinVerdict};
pub use tls::{build_client_config, is_pin_failure};
