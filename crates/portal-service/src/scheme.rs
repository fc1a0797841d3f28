use diesel::{ExpressionMethods, QueryDsl, SelectableHelper};
use diesel_async::RunQueryDsl;
use portal_db::{
    json::Json,
    model::{
        disclosure_attribute::DisclosureAttribute, hostname::Hostname, registration::Registration,
    },
    schema::{disclosure_attributes, hostnames, registrations},
    snapshot::RegistrationSnapshot,
    types::Environment,
    PgPool,
};
use portal_error::{bail, Error, ErrorType, Result};
use typed_builder::TypedBuilder;
use uuid::Uuid;

/// Outcome of checking a registration against the publication rules
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PublishDecision {
    /// The approved snapshot can be copied into the published snapshot
    Publish,

    /// The published snapshot already equals the approved one
    AlreadyCurrent,

    /// The live content drifted since acceptance; publishing would export
    /// content no reviewer has seen
    Drifted,

    /// The registration was never accepted
    NotAccepted,

    /// Accepted, but no approved snapshot was frozen (a data error)
    NoApprovedSnapshot,
}

/// Pure publication rule: compare the stored review state and snapshots
/// against the live projection
#[must_use]
pub fn publish_decision(
    registration: &Registration,
    live: &RegistrationSnapshot,
) -> PublishDecision {
    if registration.reviewed_accepted != Some(true) {
        return PublishDecision::NotAccepted;
    }

    let Some(ref approved) = registration.approved_snapshot else {
        return PublishDecision::NoApprovedSnapshot;
    };

    if approved.0 != *live {
        return PublishDecision::Drifted;
    }

    if registration.published_at.is_some()
        && registration.published_snapshot.as_ref() == Some(approved)
    {
        return PublishDecision::AlreadyCurrent;
    }

    PublishDecision::Publish
}

/// Publication of approved registrations into the machine-readable scheme
#[derive(Clone, TypedBuilder)]
pub struct SchemeService {
    db_pool: PgPool,
}

impl SchemeService {
    /// Publish a single registration
    ///
    /// Fails loudly on anything that is not publishable; the batch variant
    /// [`publish_accepted`](Self::publish_accepted) skips those cases
    /// instead.
    pub async fn publish(&self, registration_id: Uuid) -> Result<Registration> {
        let (registration, live) = self.load_with_projection(registration_id).await?;

        match publish_decision(&registration, &live) {
            PublishDecision::Publish => self.copy_approved(&registration).await,
            PublishDecision::AlreadyCurrent => Ok(registration),
            PublishDecision::Drifted => {
                bail!(
                    type = ErrorType::InvalidState,
                    "registration content drifted since acceptance; it has to be re-reviewed"
                );
            }
            PublishDecision::NotAccepted => {
                bail!(
                    type = ErrorType::InvalidState,
                    "registration is not accepted"
                );
            }
            PublishDecision::NoApprovedSnapshot => {
                bail!(
                    type = ErrorType::InvalidState,
                    "registration has no approved snapshot to publish"
                );
            }
        }
    }

    /// Publish every accepted registration whose content did not drift since
    /// acceptance
    ///
    /// Returns how many registrations were (re-)published. Per-item
    /// isolation: one broken registration does not stop the rest.
    #[instrument(skip_all)]
    pub async fn publish_accepted(&self) -> Result<usize> {
        let accepted: Vec<Uuid> = self
            .db_pool
            .with_connection(|mut db_conn| async move {
                registrations::table
                    .filter(registrations::reviewed_accepted.eq(true))
                    .select(registrations::id)
                    .load(&mut db_conn)
                    .await
            })
            .await
            .map_err(Error::msg)?;

        let mut published = 0;
        for registration_id in accepted {
            let (registration, live) = match self.load_with_projection(registration_id).await {
                Ok(loaded) => loaded,
                Err(error) => {
                    error!(%registration_id, %error, "failed to load registration; skipping");
                    continue;
                }
            };

            match publish_decision(&registration, &live) {
                PublishDecision::Publish => match self.copy_approved(&registration).await {
                    Ok(_) => published += 1,
                    Err(error) => {
                        error!(%registration_id, %error, "failed to publish registration");
                    }
                },
                PublishDecision::Drifted => {
                    debug!(%registration_id, "content drifted since acceptance; skipping");
                }
                PublishDecision::NoApprovedSnapshot => {
                    error!(%registration_id, "accepted registration without approved snapshot");
                }
                PublishDecision::AlreadyCurrent | PublishDecision::NotAccepted => {}
            }
        }

        info!(published, "publication pass finished");

        Ok(published)
    }

    /// All published scheme entries of an environment, in stable order
    pub async fn export(&self, environment: Environment) -> Result<Vec<RegistrationSnapshot>> {
        let snapshots: Vec<Option<Json<RegistrationSnapshot>>> = self
            .db_pool
            .with_connection(|mut db_conn| async move {
                registrations::table
                    .filter(registrations::environment.eq(environment))
                    .filter(registrations::published_at.is_not_null())
                    .order(registrations::slug.asc())
                    .select(registrations::published_snapshot)
                    .load(&mut db_conn)
                    .await
            })
            .await
            .map_err(Error::msg)?;

        Ok(snapshots
            .into_iter()
            .flatten()
            .map(|snapshot| snapshot.0)
            .collect())
    }

    async fn copy_approved(&self, registration: &Registration) -> Result<Registration> {
        let registration_id = registration.id;
        let approved = registration
            .approved_snapshot
            .clone()
            .ok_or_else(|| portal_error::portal_error!(
                type = ErrorType::InvalidState,
                "registration has no approved snapshot to publish"
            ))?;
        let now = klok::now();

        let registration = self
            .db_pool
            .with_connection(|mut db_conn| async move {
                diesel::update(registrations::table.find(registration_id))
                    .set((
                        registrations::published_snapshot.eq(Some(approved)),
                        registrations::published_at.eq(Some(now)),
                        registrations::updated_at.eq(now),
                    ))
                    .returning(Registration::as_returning())
                    .get_result(&mut db_conn)
                    .await
            })
            .await
            .map_err(Error::msg)?;

        info!(%registration_id, "registration published into the scheme");

        Ok(registration)
    }

    async fn load_with_projection(
        &self,
        registration_id: Uuid,
    ) -> Result<(Registration, RegistrationSnapshot)> {
        let (registration, hostnames, attributes) = self
            .db_pool
            .with_connection(|mut db_conn| async move {
                let registration = registrations::table
                    .find(registration_id)
                    .select(Registration::as_select())
                    .get_result(&mut db_conn)
                    .await?;

                let hostnames = hostnames::table
                    .filter(hostnames::registration_id.eq(registration_id))
                    .select(Hostname::as_select())
                    .load(&mut db_conn)
                    .await?;

                let attributes = disclosure_attributes::table
                    .filter(disclosure_attributes::registration_id.eq(registration_id))
                    .select(DisclosureAttribute::as_select())
                    .load(&mut db_conn)
                    .await?;

                Ok::<_, diesel::result::Error>((registration, hostnames, attributes))
            })
            .await
            .map_err(Error::msg)?;

        let live = RegistrationSnapshot::project(&registration, &hostnames, &attributes);

        Ok((registration, live))
    }
}
