pub mod cmd;
pub mod constants;
pub mod error;
pub mod frame;
pub mod payload;
pub mod registers;
