pub mod domain;
pub mod store;

pub use store::LedgerStore;
