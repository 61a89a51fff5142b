#![cfg(test)]

pub mod discovery;
pub mod scenarios;
