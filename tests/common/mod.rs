
pub use mocks::*;
pub use test_helpers::*;
