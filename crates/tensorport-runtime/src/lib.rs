pub mod contract;
mod engine;
pub mod inference;
pub mod loader;
pub mod materialize;
pub mod pool;
pub mod registry;
pub mod request;
pub mod session;
pub mod worker;

pub use contract::*;
pub use inference::*;
pub use loader::*;
pub use pool::*;
pub use registry::*;
pub use request::*;
pub use session::*;
pub use worker::*;
