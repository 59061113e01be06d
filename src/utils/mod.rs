pub mod sink;
pub mod testing;
