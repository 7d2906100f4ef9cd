pub mod config;
pub mod entity;
pub mod error;
pub mod template;
pub mod value;

pub use config::Config;
pub use entity::*;
pub use error::*;
pub use template::*;
pub use value::*;
