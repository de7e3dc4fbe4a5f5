pub mod model;
pub mod store;

pub use model::{slugify, Instance, InstanceState, LoaderType};
pub use store::InstanceStore;
