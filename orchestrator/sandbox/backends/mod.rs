pub mod codespace;
pub mod local_host;
