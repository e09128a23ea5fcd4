pub mod clock;
pub mod error;
pub mod extract;
pub mod ids;
pub mod page_token;
pub mod retry;
