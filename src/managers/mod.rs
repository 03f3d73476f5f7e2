pub mod invocation;
pub mod key_listener;
