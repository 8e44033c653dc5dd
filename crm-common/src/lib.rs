pub mod cache;
pub mod crm;
pub mod event;
pub mod mapping;
pub mod metrics;
pub mod signature;
pub mod stage;
pub mod time;
