pub mod common;
pub mod manager_tests;
