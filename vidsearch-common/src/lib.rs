pub mod interface;
pub mod utils;
