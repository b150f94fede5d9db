pub mod cache;
pub mod hooks;
pub mod init;
pub mod report;
pub mod session;
pub mod status;
pub mod version;
