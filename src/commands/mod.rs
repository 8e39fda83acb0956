pub mod chrome;
pub mod publish;
