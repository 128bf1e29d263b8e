//! Decoder and live-root enumeration engine for the GC info of JIT-compiled methods.
//!
//! A compiler emits one [`GcInfoBlob`](gcinfo::GcInfoBlob) per method. It records where the
//! method may be stopped for a collection, which registers and stack locations may hold object
//! references, and at which code offsets each of them is live. During a stack walk the runtime
//! opens a [`GcInfoDecoder`](gcinfo::GcInfoDecoder) over the blob of every frame and asks it to
//! report the live roots at the frame's current offset:
//!
//! * [`vm`] holds the capabilities the embedding runtime supplies: the register table of the
//!   target ([`Architecture`](vm::Architecture)), access to an unwound frame
//!   ([`FrameAccessor`](vm::FrameAccessor)) and the callback receiving roots
//!   ([`RootVisitor`](vm::RootVisitor)).
//! * [`gcinfo`] decodes blobs, enumerates live roots, and encodes blobs.
//! * [`dump`] replays a method's liveness for diagnostics and prints it as text.
//!
//! Decoding is a pure function of the blob, the offset and the frame. Blobs are immutable and
//! may be decoded from any number of threads at once.

#[macro_use]
extern crate lazy_static;
#[macro_use]
extern crate static_assertions;

extern crate log as the_log_crate;

pub mod build_info;
pub mod dump;
pub mod gcinfo;
pub mod util;
pub mod vm;

pub use crate::gcinfo::{
    DecodeError, EnumerationFlags, GcInfoBlob, GcInfoDecoder, GcInfoEncoder, SlotFlags,
};
pub use crate::util::Address;
