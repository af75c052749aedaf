pub mod backend;
pub mod error;
pub mod param;
pub mod spec;
pub mod tensor;

pub use backend::*;
pub use error::*;
pub use param::*;
pub use spec::*;
pub use tensor::*;
