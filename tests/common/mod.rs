#![allow(dead_code)]

pub mod mock_handlers;
pub mod strategies;

pub use mock_handlers::*;
pub use strategies::*;
