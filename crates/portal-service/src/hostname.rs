use diesel::ExpressionMethods;
use diesel_async::RunQueryDsl;
use iso8601_timestamp::Timestamp;
use portal_db::{model::hostname::Hostname, schema::hostnames, PgPool, PoolError};
use portal_dns::{Challenge, LookupError, TxtLookup};
use portal_error::{bail, Error, ErrorType, Result};
use typed_builder::TypedBuilder;
use uuid::Uuid;

/// The hostname verification engine
///
/// Two entry points, one per lifecycle direction: [`verify_new`] acquires
/// trust for a hostname that is not currently verified, [`verify_existing`]
/// continuously re-attests a hostname that is. The split keeps the two
/// preconditions distinct. Mixing them up is a scheduler bug and is treated
/// as one.
///
/// [`verify_new`]: HostnameService::verify_new
/// [`verify_existing`]: HostnameService::verify_existing
#[derive(Clone, TypedBuilder)]
pub struct HostnameService<R> {
    db_pool: PgPool,
    resolver: R,
}

impl<R> HostnameService<R>
where
    R: TxtLookup + Send + Sync,
{
    /// First-time (or post-invalidation) verification of a hostname
    ///
    /// Precondition: the hostname must not currently be verified. On a
    /// matching TXT record the hostname becomes trusted and any earlier
    /// invalidation marker is cleared. On a mismatch or resolver failure
    /// nothing is persisted; the hostname stays eligible for the next sweep
    /// and its challenge is never rotated, so the instructions shown to the
    /// registrant stay stable.
    #[instrument(skip_all, fields(hostname = %hostname.hostname))]
    pub async fn verify_new(&self, hostname: &Hostname) -> Result<bool> {
        if hostname.dns_challenge_verified == Some(true) {
            bail!(
                type = ErrorType::Precondition,
                "verify_new invoked on an already-verified hostname"
            );
        }
        let Some(ref stored_challenge) = hostname.dns_challenge else {
            bail!(
                type = ErrorType::Precondition,
                "verify_new invoked on a hostname without a minted challenge"
            );
        };

        let Ok(records) = self.resolver.lookup_txt(&hostname.hostname).await else {
            // Already logged with the right severity by the resolver adapter
            return Ok(false);
        };

        let challenge = Challenge::from_stored(stored_challenge.clone());
        if !challenge.is_satisfied_by(records.iter().map(String::as_str)) {
            warn!("no TXT record matches the DNS challenge");
            return Ok(false);
        }

        let now = klok::now();
        self.db_pool
            .with_connection(|mut db_conn| async move {
                diesel::update(hostname)
                    .set((
                        hostnames::dns_challenge_verified.eq(Some(true)),
                        hostnames::dns_challenge_verified_at.eq(Some(now)),
                        hostnames::dns_challenge_invalidated_at.eq(None::<Timestamp>),
                        hostnames::updated_at.eq(now),
                    ))
                    .execute(&mut db_conn)
                    .await?;

                Ok::<_, Error>(())
            })
            .await
            .map_err(PoolError::flatten)?;

        info!("hostname ownership verified");

        Ok(true)
    }

    /// Re-attestation of an already-verified hostname
    ///
    /// Precondition: the hostname must currently be verified. While the TXT
    /// record keeps matching nothing is written, avoiding timestamp churn.
    /// Invalidation requires actual DNS evidence of lost ownership: a
    /// successful lookup without the record, or an authoritative
    /// no-records/no-domain answer. Resolver trouble (timeouts, transport
    /// failures) says nothing about ownership and leaves the hostname in its
    /// current state. This method is the sole transition into the
    /// invalidated state, and the mechanism by which a published
    /// registration regresses.
    #[instrument(skip_all, fields(hostname = %hostname.hostname))]
    pub async fn verify_existing(&self, hostname: &Hostname) -> Result<bool> {
        if hostname.dns_challenge_verified != Some(true) {
            bail!(
                type = ErrorType::Precondition,
                "verify_existing invoked on a hostname that is not verified"
            );
        }
        let Some(ref stored_challenge) = hostname.dns_challenge else {
            bail!(
                type = ErrorType::Precondition,
                "verified hostname is missing its challenge"
            );
        };

        let challenge = Challenge::from_stored(stored_challenge.clone());
        let still_matching = match self.resolver.lookup_txt(&hostname.hostname).await {
            Ok(records) => challenge.is_satisfied_by(records.iter().map(String::as_str)),
            Err(LookupError::NoAnswer | LookupError::DomainNotFound) => false,
            Err(LookupError::Timeout | LookupError::Other(_)) => {
                // No evidence about ownership either way; keep the state
                warn!("TXT lookup failed; keeping the current verification state");
                return Ok(true);
            }
        };

        if still_matching {
            return Ok(true);
        }

        let now = klok::now();
        self.db_pool
            .with_connection(|mut db_conn| async move {
                diesel::update(hostname)
                    .set((
                        hostnames::dns_challenge_verified.eq(Some(false)),
                        hostnames::dns_challenge_invalidated_at.eq(Some(now)),
                        hostnames::updated_at.eq(now),
                    ))
                    .execute(&mut db_conn)
                    .await?;

                Ok::<_, Error>(())
            })
            .await
            .map_err(PoolError::flatten)?;

        warn!("hostname lost DNS ownership; invalidated");

        Ok(false)
    }

    /// Operator override vouching for a hostname out-of-band
    pub async fn set_manually_verified(&self, hostname_id: Uuid, verified: bool) -> Result<()> {
        let now = klok::now();
        self.db_pool
            .with_connection(|mut db_conn| async move {
                diesel::update(hostnames::table)
                    .filter(hostnames::id.eq(hostname_id))
                    .set((
                        hostnames::manually_verified.eq(verified),
                        hostnames::updated_at.eq(now),
                    ))
                    .execute(&mut db_conn)
                    .await?;

                Ok::<_, Error>(())
            })
            .await
            .map_err(PoolError::flatten)?;

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::HostnameService;
    use iso8601_timestamp::Timestamp;
    use portal_db::model::hostname::Hostname;
    use portal_dns::{LookupError, TxtLookup};
    use portal_error::ErrorType;
    use pretty_assertions::assert_eq;
    use uuid::Uuid;

    struct StaticRecords(Vec<&'static str>);

    impl TxtLookup for StaticRecords {
        async fn lookup_txt(&self, _hostname: &str) -> Result<Vec<String>, LookupError> {
            Ok(self.0.iter().map(ToString::to_string).collect())
        }
    }

    struct AlwaysTimeout;

    impl TxtLookup for AlwaysTimeout {
        async fn lookup_txt(&self, _hostname: &str) -> Result<Vec<String>, LookupError> {
            Err(LookupError::Timeout)
        }
    }

    const CHALLENGE: &str = "\"yivi_verifier_challenge=0123456789abcdef0123456789abcdef\"";

    fn hostname(verified: Option<bool>) -> Hostname {
        Hostname {
            id: Uuid::now_v7(),
            registration_id: Uuid::now_v7(),
            hostname: "attributes.example".into(),
            dns_challenge: Some(CHALLENGE.into()),
            dns_challenge_created_at: Some(Timestamp::now_utc()),
            dns_challenge_verified: verified,
            dns_challenge_verified_at: None,
            dns_challenge_invalidated_at: None,
            manually_verified: false,
            created_at: Timestamp::now_utc(),
            updated_at: Timestamp::now_utc(),
        }
    }

    fn service<R>(resolver: R) -> HostnameService<R> {
        HostnameService::builder()
            .db_pool(crate::test_util::unconnected_pool())
            .resolver(resolver)
            .build()
    }

    #[tokio::test]
    async fn verify_new_rejects_verified_hostname() {
        let service = service(StaticRecords(vec![CHALLENGE]));

        let err = service
            .verify_new(&hostname(Some(true)))
            .await
            .unwrap_err();
        assert_eq!(err.error_type(), ErrorType::Precondition);
    }

    #[tokio::test]
    async fn verify_new_requires_minted_challenge() {
        let service = service(StaticRecords(vec![CHALLENGE]));

        let mut subject = hostname(None);
        subject.dns_challenge = None;

        let err = service.verify_new(&subject).await.unwrap_err();
        assert_eq!(err.error_type(), ErrorType::Precondition);
    }

    #[tokio::test]
    async fn verify_new_mismatch_is_a_soft_failure() {
        let service = service(StaticRecords(vec!["\"some=other-record\""]));

        assert!(!service.verify_new(&hostname(None)).await.unwrap());
        assert!(!service.verify_new(&hostname(Some(false))).await.unwrap());
    }

    #[tokio::test]
    async fn verify_new_swallows_resolver_failures() {
        let service = service(AlwaysTimeout);

        // Transient DNS trouble must not propagate past the engine
        assert!(!service.verify_new(&hostname(None)).await.unwrap());
    }

    #[tokio::test]
    async fn verify_existing_rejects_unverified_hostname() {
        let service = service(StaticRecords(vec![CHALLENGE]));

        for state in [None, Some(false)] {
            let err = service
                .verify_existing(&hostname(state))
                .await
                .unwrap_err();
            assert_eq!(err.error_type(), ErrorType::Precondition);
        }
    }

    #[tokio::test]
    async fn verify_existing_keeps_state_on_resolver_trouble() {
        // A timed-out lookup is not evidence of lost ownership. The pool is
        // unconnected, so reaching the invalidation write would error out.
        let service = service(AlwaysTimeout);

        assert!(service.verify_existing(&hostname(Some(true))).await.unwrap());
    }

    #[tokio::test]
    async fn verify_existing_matching_record_writes_nothing() {
        // The pool is unconnected, so reaching the persistence path would
        // error out. A still-matching record must short-circuit before it.
        let service = service(StaticRecords(vec![CHALLENGE, "\"unrelated=value\""]));

        assert!(service.verify_existing(&hostname(Some(true))).await.unwrap());
    }
}
