//! Business logic of the registration portal
//!
//! The interesting parts live here: the hostname verification engine, the
//! registration lifecycle state machine, publication into the scheme, and
//! the periodic verification sweeps. The HTTP layer on top of this crate is
//! plumbing; everything with correctness hazards is below it.

#[macro_use]
extern crate tracing;

pub mod hostname;
pub mod organization;
pub mod registration;
pub mod scheme;
pub mod sweep;

#[cfg(test)]
mod test_util {
    use diesel_async::{
        pooled_connection::{deadpool::Pool, AsyncDieselConnectionManager},
        AsyncPgConnection,
    };
    use portal_db::PgPool;

    /// Lazily-initialised pool pointing nowhere
    ///
    /// Deadpool only dials on first checkout, so tests exercising the paths
    /// that never touch the database can use this freely.
    pub fn unconnected_pool() -> PgPool {
        let manager = AsyncDieselConnectionManager::<AsyncPgConnection>::new(
            "postgres://unreachable.invalid/portal",
        );

        Pool::builder(manager).max_size(1).build().unwrap().into()
    }
}

pub use self::hostname::HostnameService;
pub use self::organization::OrganizationService;
pub use self::registration::RegistrationService;
pub use self::scheme::SchemeService;
pub use self::sweep::{SweepService, SweepSummary};
