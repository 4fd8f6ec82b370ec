pub mod http_client;
pub mod memory_store;
pub mod processor;
pub mod result_mapper;
pub mod scheduler;
pub mod store;
pub mod telemetry;
