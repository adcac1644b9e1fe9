//! Record and classification types shared by the agent and the parser

pub mod classify;
pub mod records;
