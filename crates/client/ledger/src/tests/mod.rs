pub mod common;

mod test_open;
mod test_roundtrip;
