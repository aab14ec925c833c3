pub mod client;
pub mod paginator;
pub mod rate_limiter;
pub mod retry;

pub use client::{GitHubClient, RestPage};
pub use paginator::{IssuePaginator, PaginationMode, Paginator};
pub use rate_limiter::RateLimiter;
pub use retry::RetryPolicy;
