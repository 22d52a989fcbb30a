pub mod addr;
pub mod context;
pub mod error;
pub mod report;
pub mod resolver;
pub mod spec;
pub mod walk;
