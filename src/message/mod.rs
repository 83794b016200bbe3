mod parse;
mod serialize;
pub mod tags;
mod types;

pub use self::parse::MAX_MIDDLE_PARAMS;
pub use self::types::Message;
