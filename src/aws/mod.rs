//! AWS Gateway (spec §4.1): typed wrapper over ELBv2/EC2/ACM/Route53/WAF with
//! paging, retries and role-assumption, returning structured results.

pub mod fake;
pub mod gateway;
pub mod real;
pub mod retry;

pub use fake::FakeAwsGateway;
pub use gateway::*;
pub use real::RealAwsGateway;
