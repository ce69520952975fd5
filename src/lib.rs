pub mod config;
pub mod endpoint_key;
pub mod message;
pub mod sender;
pub mod shutdown;
pub mod transport;
pub mod test_util;
