/*

THIS SOFTWARE IS OPEN SOURCE UNDER THE MIT LICENSE

Copyright 2025 Vincent Maciejewski, & M2 Tech
Contact:
v@m2te.ch
mayeski@gmail.com
https://www.linkedin.com/in/vmayeski/
http://m2te.ch/

*/

//! Error types of the runtime.

use std::io;

use thiserror::Error;

/// Errors raised by actor construction.
///
/// Everything past construction is fire-and-forget by design: sends to a dead
/// actor, publishes without a bound slot and stops of an already stopped
/// actor are silent no-ops rather than errors.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ActorError {
    /// The operating system refused to spawn the owning thread.
    #[error("failed to spawn owning thread for actor '{name}': {source}")]
    Spawn {
        /// The actor (and thread) name.
        name: String,
        #[source]
        source: io::Error,
    },
}
