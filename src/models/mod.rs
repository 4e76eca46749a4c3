mod request;
mod selection;
mod session;

pub use request::*;
pub use selection::*;
pub use session::*;
