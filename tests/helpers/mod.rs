#![allow(dead_code)]

pub mod frontend;
