//! 领域实现

pub mod mock;
