pub mod metaapi_client;
pub mod simulated_broker;
