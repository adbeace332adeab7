pub mod cache;
pub mod codec;
pub mod ctl;
pub mod factory;
pub mod header;
pub mod item_key;
pub mod keys;
pub mod queue;
pub mod retry;
pub mod ring;
pub mod routing;
pub mod sequence;
pub mod settings;
pub mod storage;
pub mod trace;

pub use gridq_macros::test;
