pub mod proxy;
pub mod request;

pub use proxy::*;
pub use request::*;
