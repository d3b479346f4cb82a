//! Data carried across the transport boundary and held in the session caches.

pub mod account;
pub mod contract;
pub mod market_data;
pub mod order;
