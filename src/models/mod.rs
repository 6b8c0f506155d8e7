pub mod pool_config;
pub mod protocol;
