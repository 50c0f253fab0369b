pub mod broadcaster;
pub mod rate_limit;

pub use broadcaster::Broadcaster;
pub use rate_limit::RateLimiter;
