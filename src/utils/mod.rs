pub mod http;
pub mod retry;
