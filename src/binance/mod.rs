pub mod client;
pub mod rate_limit;

pub use client::BinanceFeed;
pub use rate_limit::RateLimiter;
