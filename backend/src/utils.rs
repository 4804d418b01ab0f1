pub mod cursor;
pub mod time;
