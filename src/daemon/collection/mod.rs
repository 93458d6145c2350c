//! Everything that comes from the browser: the native messaging channel, the messages it
//! carries and how urls turn into domains.

pub mod domain;
pub mod events;
pub mod native;
