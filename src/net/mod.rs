//! Concrete transport carriers for the abstract interfaces of §6 (A5).

pub mod http_client;
pub mod http_server;
pub mod secret_store;
pub mod udp;
