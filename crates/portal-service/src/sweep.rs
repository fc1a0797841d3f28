use crate::hostname::HostnameService;
use diesel::{BoolExpressionMethods, ExpressionMethods, QueryDsl, SelectableHelper};
use diesel_async::RunQueryDsl;
use portal_db::{model::hostname::Hostname, schema::hostnames, PgPool};
use portal_dns::TxtLookup;
use portal_error::{Error, Result};
use typed_builder::TypedBuilder;

/// What a sweep did, for the completion log line and the notifier
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct SweepSummary {
    pub checked: usize,
    pub verified: usize,
    pub invalidated: usize,
    pub failed: usize,
}

/// The two periodic verification passes
///
/// An external scheduler decides the cadence; this type only exposes the two
/// entry points. Both sweeps are at-least-once: a crash mid-sweep simply
/// means the survivors are looked at again on the next pass.
#[derive(Clone, TypedBuilder)]
pub struct SweepService<R> {
    db_pool: PgPool,
    hostname_service: HostnameService<R>,
}

impl<R> SweepService<R>
where
    R: TxtLookup + Send + Sync,
{
    /// Attempt first-time verification of every eligible hostname
    ///
    /// Eligible: not currently verified, not manually vouched for, and a
    /// challenge has been minted. Invalidated hostnames are eligible again;
    /// re-proving ownership through the regular path clears the marker.
    #[instrument(skip_all)]
    pub async fn run_new_hostname_sweep(&self) -> Result<SweepSummary> {
        let eligible = self
            .db_pool
            .with_connection(|mut db_conn| async move {
                hostnames::table
                    .filter(
                        hostnames::dns_challenge_verified
                            .ne(true)
                            .or(hostnames::dns_challenge_verified.is_null()),
                    )
                    .filter(hostnames::manually_verified.eq(false))
                    .filter(hostnames::dns_challenge.is_not_null())
                    .select(Hostname::as_select())
                    .load(&mut db_conn)
                    .await
            })
            .await
            .map_err(Error::msg)?;

        let mut summary = self.sweep_new(&eligible).await;
        summary.checked = eligible.len();

        info!(
            checked = summary.checked,
            verified = summary.verified,
            failed = summary.failed,
            "new-hostname sweep finished"
        );

        Ok(summary)
    }

    /// Re-attest every currently-verified hostname
    #[instrument(skip_all)]
    pub async fn run_existing_hostname_sweep(&self) -> Result<SweepSummary> {
        let eligible = self
            .db_pool
            .with_connection(|mut db_conn| async move {
                hostnames::table
                    .filter(hostnames::dns_challenge_verified.eq(true))
                    .select(Hostname::as_select())
                    .load(&mut db_conn)
                    .await
            })
            .await
            .map_err(Error::msg)?;

        let mut summary = self.sweep_existing(&eligible).await;
        summary.checked = eligible.len();

        info!(
            checked = summary.checked,
            invalidated = summary.invalidated,
            failed = summary.failed,
            "existing-hostname sweep finished"
        );

        Ok(summary)
    }

    async fn sweep_new(&self, eligible: &[Hostname]) -> SweepSummary {
        let mut summary = SweepSummary::default();

        for hostname in eligible {
            match self.hostname_service.verify_new(hostname).await {
                Ok(true) => summary.verified += 1,
                Ok(false) => {}
                Err(error) => {
                    // One broken hostname must not stall the rest
                    summary.failed += 1;
                    error!(hostname = %hostname.hostname, %error, "verification attempt errored");
                }
            }
        }

        summary
    }

    async fn sweep_existing(&self, eligible: &[Hostname]) -> SweepSummary {
        let mut summary = SweepSummary::default();

        for hostname in eligible {
            match self.hostname_service.verify_existing(hostname).await {
                Ok(true) => summary.verified += 1,
                Ok(false) => summary.invalidated += 1,
                Err(error) => {
                    summary.failed += 1;
                    error!(hostname = %hostname.hostname, %error, "re-attestation attempt errored");
                }
            }
        }

        summary
    }
}

#[cfg(test)]
mod test {
    use super::{SweepService, SweepSummary};
    use crate::hostname::HostnameService;
    use iso8601_timestamp::Timestamp;
    use pretty_assertions::assert_eq;
    use portal_db::model::hostname::Hostname;
    use portal_dns::{LookupError, TxtLookup};
    use uuid::Uuid;

    struct NothingResolves;

    impl TxtLookup for NothingResolves {
        async fn lookup_txt(&self, _hostname: &str) -> Result<Vec<String>, LookupError> {
            Err(LookupError::NoAnswer)
        }
    }

    fn hostname(name: &str, verified: Option<bool>, challenge: Option<&str>) -> Hostname {
        Hostname {
            id: Uuid::now_v7(),
            registration_id: Uuid::now_v7(),
            hostname: name.into(),
            dns_challenge: challenge.map(ToString::to_string),
            dns_challenge_created_at: Some(Timestamp::now_utc()),
            dns_challenge_verified: verified,
            dns_challenge_verified_at: None,
            dns_challenge_invalidated_at: None,
            manually_verified: false,
            created_at: Timestamp::now_utc(),
            updated_at: Timestamp::now_utc(),
        }
    }

    fn service() -> SweepService<NothingResolves> {
        let pool = crate::test_util::unconnected_pool();
        SweepService::builder()
            .db_pool(pool.clone())
            .hostname_service(
                HostnameService::builder()
                    .db_pool(pool)
                    .resolver(NothingResolves)
                    .build(),
            )
            .build()
    }

    #[tokio::test]
    async fn one_precondition_error_does_not_stop_the_sweep() {
        let service = service();

        // The middle hostname violates the verify_new precondition; the two
        // around it resolve to nothing and fail softly.
        let eligible = [
            hostname("a.example", None, Some("\"yivi_verifier_challenge=aa\"")),
            hostname("b.example", Some(true), Some("\"yivi_verifier_challenge=bb\"")),
            hostname("c.example", Some(false), Some("\"yivi_verifier_challenge=cc\"")),
        ];

        let summary = service.sweep_new(&eligible).await;
        assert_eq!(
            summary,
            SweepSummary {
                checked: 0,
                verified: 0,
                invalidated: 0,
                failed: 1,
            }
        );
    }
}
