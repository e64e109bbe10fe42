#[cfg(test)]
pub mod memory_store;
pub mod payout_store;
pub mod table_service;
