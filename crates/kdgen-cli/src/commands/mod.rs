pub mod generate;
pub mod pull;
