pub mod link;
pub mod transport;
