//! DNS-ownership primitives of the portal
//!
//! A registrant proves control over a hostname by publishing a random
//! challenge token as a TXT record. This crate mints those tokens and
//! resolves/classifies the TXT lookups the verification engine runs.

#[macro_use]
extern crate tracing;

pub use self::challenge::{generate_challenge, Challenge, CHALLENGE_KEY};
pub use self::resolver::{DnsResolver, LookupError, TxtLookup};

mod challenge;
mod resolver;
