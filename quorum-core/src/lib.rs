#[macro_use]
extern crate slog;
#[macro_use]
extern crate lazy_static;

pub mod error;
pub mod logger;
