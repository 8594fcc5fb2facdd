pub(crate) mod ask;
pub(crate) mod chat;
pub(crate) mod config;
