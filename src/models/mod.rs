pub mod account;
pub mod amount;
pub mod deposit_intent;
pub mod ids;
pub mod pool_wallet;
pub mod timestamp;
pub mod transaction_record;
