//! Durable state module - the pending-transaction table and its row types

pub mod store;

pub use store::{PendingStore, SenderIdentity, SenderType, TxAttempt, TxStatus};
