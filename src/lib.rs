#![deny(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unused_imports
)]
// Disallow warnings in examples.
#![doc(test(attr(deny(warnings))))]

//! nett is a small user-space networking runtime intended for personal learning
//! purposes: a portable readiness reactor over one OS primitive (epoll, kqueue,
//! or IOCP via mio), a cooperative task runtime on plain [`Future`]s with a
//! fixed pool of worker threads, stream sockets bound to the reactor, and an
//! HTTP/1.1 codec and pooling client layered on top.
//!
//! The entry point is [`runtime::Scheduler`]: spawn tasks on it, drive one from
//! the outside with [`runtime::block_on`], and build sockets from
//! [`net::TcpListener`] and [`net::TcpStream`].
//!
//! [`Future`]: std::future::Future

pub mod cache;
pub mod http;
pub mod io;
pub mod net;
pub mod pool;
pub mod runtime;

pub use io::{Error, Result};
pub use mio::Interest;
