pub mod config;
pub mod dispatch;
pub mod error;
pub mod handlers;

#[cfg(test)]
pub mod test_utils;
