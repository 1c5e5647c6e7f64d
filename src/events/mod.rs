pub mod publisher;
pub mod types;

pub use publisher::{ActionObserver, EventPublisher};
pub use types::{ActionEvent, EventSubject};
