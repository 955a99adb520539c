// Error modeling shared by the client and the CLI.
pub mod error;
