mod assist;
mod config;
mod shortcuts;

pub use assist::*;
pub use config::*;
pub use shortcuts::*;
