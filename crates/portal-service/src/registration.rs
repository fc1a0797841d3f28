use diesel::{ExpressionMethods, OptionalExtension, QueryDsl, SelectableHelper};
use diesel_async::RunQueryDsl;
use garde::Validate;
use iso8601_timestamp::Timestamp;
use portal_db::{
    json::Json,
    model::{
        disclosure_attribute::{DisclosureAttribute, NewDisclosureAttribute},
        hostname::{Hostname, NewHostname},
        registration::{NewRegistration, Registration, RegistrationStatus},
    },
    schema::{disclosure_attributes, hostnames, registrations},
    snapshot::RegistrationSnapshot,
    types::{Environment, RegistrationRole},
    PgPool, PoolError,
};
use portal_dns::generate_challenge;
use portal_error::{bail, Error, ErrorType, Result, ResultExt};
use scoped_futures::ScopedFutureExt;
use serde_json::Value;
use std::collections::BTreeMap;
use typed_builder::TypedBuilder;
use uuid::Uuid;

/// What a registration update does to the review progress
///
/// Computed up-front from the old and new content (no save-hook magic), so
/// the policy is testable on its own.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EditEffect {
    /// Review state is untouched
    Keep,

    /// Review progress is discarded and the registration drops back to draft
    Unready,

    /// Review progress is discarded but the new content is submitted for
    /// review in the same step
    Resubmit,
}

/// Decide what an update does to the review progress
///
/// Regulated-content changes while under (or past) review always discard the
/// existing review decision; whether the registration stays submitted depends
/// on the caller re-readying it in the same request. Draft edits reset
/// nothing.
#[must_use]
pub fn edit_effect(status: RegistrationStatus, content_changed: bool, set_ready: bool) -> EditEffect {
    if !content_changed || status == RegistrationStatus::Draft {
        EditEffect::Keep
    } else if set_ready {
        EditEffect::Resubmit
    } else {
        EditEffect::Unready
    }
}

/// What recording a review decision writes, besides the decision itself
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ReviewOutcome {
    /// Stamp `reviewed_at`; happens only on the transition from undecided
    /// to decided
    pub stamp_reviewed_at: bool,

    /// Freeze the live snapshot as the approved snapshot
    pub freeze_snapshot: bool,
}

/// Decide the side effects of recording a review decision
///
/// `previous` is the stored decision before this review is applied.
/// Re-saving an already-decided registration never re-stamps
/// `reviewed_at`, and the approved snapshot is frozen only on the
/// transition into acceptance.
#[must_use]
pub fn review_outcome(previous: Option<bool>, accept: bool) -> ReviewOutcome {
    ReviewOutcome {
        stamp_reviewed_at: previous.is_none(),
        freeze_snapshot: accept && previous != Some(true),
    }
}

/// Maintainer-supplied content of a registration
#[derive(Clone, TypedBuilder, Validate)]
pub struct RegistrationContent {
    #[garde(pattern(r"^[a-z0-9](?:[a-z0-9-]*[a-z0-9])?$"))]
    pub slug: String,

    #[garde(skip)]
    pub environment: Environment,

    #[garde(skip)]
    pub display_name: BTreeMap<String, String>,

    #[garde(skip)]
    pub context_description: BTreeMap<String, String>,

    #[garde(skip)]
    #[builder(default)]
    pub condiscon: Option<Value>,

    #[garde(inner(pattern(
        r"^[a-z0-9](?:[a-z0-9-]*[a-z0-9])?(?:\.[a-z0-9](?:[a-z0-9-]*[a-z0-9])?)+$"
    )))]
    pub hostnames: Vec<String>,

    #[garde(skip)]
    #[builder(default)]
    pub attributes: Vec<String>,
}

impl RegistrationContent {
    /// The snapshot this content would project to
    fn as_snapshot(&self, role: RegistrationRole) -> RegistrationSnapshot {
        let mut hostnames = self.hostnames.clone();
        hostnames.sort_unstable();

        let mut attributes = self.attributes.clone();
        attributes.sort_unstable();

        RegistrationSnapshot {
            slug: self.slug.clone(),
            role,
            environment: self.environment,
            display_name: self.display_name.clone(),
            context_description: self.context_description.clone(),
            condiscon: self.condiscon.clone(),
            hostnames,
            attributes,
        }
    }
}

#[derive(TypedBuilder)]
pub struct CreateRegistration {
    pub organization_id: Uuid,
    pub role: RegistrationRole,
    pub content: RegistrationContent,
}

#[derive(TypedBuilder)]
pub struct UpdateRegistration {
    pub registration_id: Uuid,
    pub content: RegistrationContent,

    /// Submit the new content for review in the same step
    #[builder(default)]
    pub set_ready: bool,
}

#[derive(TypedBuilder)]
pub struct Review<'a> {
    pub registration_id: Uuid,
    pub accept: bool,

    #[builder(default)]
    pub remarks: Option<&'a str>,
}

/// The registration lifecycle state machine
#[derive(Clone, TypedBuilder)]
pub struct RegistrationService {
    db_pool: PgPool,
}

impl RegistrationService {
    /// Create a registration in draft
    ///
    /// Every claimed hostname gets a freshly minted DNS challenge.
    pub async fn create(&self, create: CreateRegistration) -> Result<Registration> {
        create
            .content
            .validate(&())
            .with_error_type(ErrorType::Validation)?;

        let registration_id = Uuid::now_v7();
        let content = create.content;

        self.db_pool
            .with_transaction(|tx| {
                async move {
                    let registration = diesel::insert_into(registrations::table)
                        .values(NewRegistration {
                            id: registration_id,
                            organization_id: create.organization_id,
                            slug: &content.slug,
                            role: create.role,
                            environment: content.environment,
                            display_name: Json(content.display_name.clone()),
                            context_description: Json(content.context_description.clone()),
                            condiscon: content.condiscon.clone().map(Json),
                        })
                        .returning(Registration::as_returning())
                        .get_result(tx)
                        .await?;

                    insert_hostnames(tx, registration_id, &content.hostnames).await?;
                    insert_attributes(tx, registration_id, &content.attributes).await?;

                    Ok::<_, Error>(registration)
                }
                .scope_boxed()
            })
            .await
            .map_err(PoolError::flatten)
    }

    /// Apply a maintainer edit
    ///
    /// Hostname rows whose name survives the edit keep their verification
    /// state; added hostnames get fresh challenges. The field update, the
    /// hostname replacement and the disclosure-attribute replacement commit
    /// atomically or not at all.
    pub async fn update(&self, update: UpdateRegistration) -> Result<Registration> {
        update
            .content
            .validate(&())
            .with_error_type(ErrorType::Validation)?;

        let (registration, old_hostnames, old_attributes) =
            self.load_with_children(update.registration_id).await?;

        let has_invalidated = old_hostnames.iter().any(Hostname::is_invalidated);
        let status = registration.status(has_invalidated);

        let old_snapshot =
            RegistrationSnapshot::project(&registration, &old_hostnames, &old_attributes);
        let new_snapshot = update.content.as_snapshot(registration.role);
        let effect = edit_effect(status, old_snapshot != new_snapshot, update.set_ready);

        let content = update.content;
        let registration_id = update.registration_id;
        let set_ready = update.set_ready;
        let now = klok::now();

        self.db_pool
            .with_transaction(|tx| {
                async move {
                    diesel::update(registrations::table.find(registration_id))
                        .set((
                            registrations::slug.eq(&content.slug),
                            registrations::environment.eq(content.environment),
                            registrations::display_name.eq(Json(content.display_name.clone())),
                            registrations::context_description
                                .eq(Json(content.context_description.clone())),
                            registrations::condiscon.eq(content.condiscon.clone().map(Json)),
                            registrations::updated_at.eq(now),
                        ))
                        .execute(tx)
                        .await?;

                    replace_hostnames(tx, registration_id, &old_hostnames, &content.hostnames)
                        .await?;
                    replace_attributes(tx, registration_id, &old_attributes, &content.attributes)
                        .await?;

                    match effect {
                        EditEffect::Keep => {
                            if set_ready {
                                submit(tx, registration_id, now).await?;
                            }
                        }
                        EditEffect::Unready => {
                            diesel::update(registrations::table.find(registration_id))
                                .set((
                                    registrations::ready.eq(false),
                                    review_reset(),
                                    registrations::updated_at.eq(now),
                                ))
                                .execute(tx)
                                .await?;
                        }
                        EditEffect::Resubmit => {
                            diesel::update(registrations::table.find(registration_id))
                                .set((
                                    registrations::ready.eq(true),
                                    registrations::ready_at.eq(Some(now)),
                                    review_reset(),
                                    registrations::updated_at.eq(now),
                                ))
                                .execute(tx)
                                .await?;
                        }
                    }

                    let registration = registrations::table
                        .find(registration_id)
                        .select(Registration::as_select())
                        .get_result(tx)
                        .await?;

                    Ok::<_, Error>(registration)
                }
                .scope_boxed()
            })
            .await
            .map_err(PoolError::flatten)
    }

    /// Submit for review, or withdraw the submission
    ///
    /// Withdrawing discards all review progress so a stale decision can
    /// never survive.
    pub async fn set_ready(&self, registration_id: Uuid, ready: bool) -> Result<()> {
        let now = klok::now();

        self.db_pool
            .with_transaction(|tx| {
                async move {
                    if ready {
                        submit(tx, registration_id, now).await?;
                    } else {
                        diesel::update(registrations::table.find(registration_id))
                            .set((
                                registrations::ready.eq(false),
                                review_reset(),
                                registrations::updated_at.eq(now),
                            ))
                            .execute(tx)
                            .await?;
                    }

                    Ok::<_, Error>(())
                }
                .scope_boxed()
            })
            .await
            .map_err(PoolError::flatten)
    }

    /// Record the reviewer's decision
    ///
    /// `reviewed_at` is stamped only on the transition from undecided to
    /// decided; re-saving a decided registration never re-stamps it. On
    /// acceptance the live snapshot is frozen as the approved snapshot.
    pub async fn review(&self, review: Review<'_>) -> Result<Registration> {
        let (registration, hostnames, attributes) =
            self.load_with_children(review.registration_id).await?;

        if !registration.ready {
            bail!(
                type = ErrorType::InvalidState,
                "registration is not submitted for review"
            );
        }

        let outcome = review_outcome(registration.reviewed_accepted, review.accept);
        let approved = outcome
            .freeze_snapshot
            .then(|| Json(RegistrationSnapshot::project(&registration, &hostnames, &attributes)));

        let registration_id = review.registration_id;
        let accept = review.accept;
        let remarks = review.remarks.map(ToString::to_string);
        let now = klok::now();

        self.db_pool
            .with_transaction(|tx| {
                async move {
                    diesel::update(registrations::table.find(registration_id))
                        .set((
                            registrations::reviewed_accepted.eq(Some(accept)),
                            registrations::rejection_remarks.eq(remarks),
                            registrations::updated_at.eq(now),
                        ))
                        .execute(tx)
                        .await?;

                    if outcome.stamp_reviewed_at {
                        diesel::update(registrations::table.find(registration_id))
                            .set(registrations::reviewed_at.eq(Some(now)))
                            .execute(tx)
                            .await?;
                    }

                    if let Some(approved) = approved {
                        diesel::update(registrations::table.find(registration_id))
                            .set(registrations::approved_snapshot.eq(Some(approved)))
                            .execute(tx)
                            .await?;
                    }

                    let registration = registrations::table
                        .find(registration_id)
                        .select(Registration::as_select())
                        .get_result(tx)
                        .await?;

                    Ok::<_, Error>(registration)
                }
                .scope_boxed()
            })
            .await
            .map_err(PoolError::flatten)
    }

    pub async fn get(&self, registration_id: Uuid) -> Result<Registration> {
        let registration = self
            .db_pool
            .with_connection(|mut db_conn| async move {
                registrations::table
                    .find(registration_id)
                    .select(Registration::as_select())
                    .get_result(&mut db_conn)
                    .await
                    .optional()
            })
            .await
            .map_err(Error::msg)?;

        registration.ok_or_else(|| portal_error::portal_error!(
            type = ErrorType::NotFound,
            "registration not found"
        ))
    }

    /// Live-derived lifecycle status
    pub async fn get_status(&self, registration_id: Uuid) -> Result<RegistrationStatus> {
        let registration = self.get(registration_id).await?;
        let has_invalidated = self.has_invalidated_hostname(registration_id).await?;

        Ok(registration.status(has_invalidated))
    }

    /// Does any owned hostname currently sit in the invalidated state
    pub async fn has_invalidated_hostname(&self, registration_id: Uuid) -> Result<bool> {
        self.db_pool
            .with_connection(|mut db_conn| async move {
                diesel::select(diesel::dsl::exists(
                    hostnames::table
                        .filter(hostnames::registration_id.eq(registration_id))
                        .filter(hostnames::dns_challenge_verified.eq(false))
                        .filter(hostnames::dns_challenge_invalidated_at.is_not_null()),
                ))
                .get_result(&mut db_conn)
                .await
            })
            .await
            .map_err(Error::msg)
    }

    /// Delete the registration together with its hostnames and
    /// disclosure-attribute records (cascade)
    pub async fn delete(&self, registration_id: Uuid) -> Result<()> {
        self.db_pool
            .with_connection(|mut db_conn| async move {
                diesel::delete(registrations::table.find(registration_id))
                    .execute(&mut db_conn)
                    .await
            })
            .await
            .map_err(Error::msg)?;

        Ok(())
    }

    async fn load_with_children(
        &self,
        registration_id: Uuid,
    ) -> Result<(Registration, Vec<Hostname>, Vec<DisclosureAttribute>)> {
        let registration = self.get(registration_id).await?;

        let (hostnames, attributes) = self
            .db_pool
            .with_connection(|mut db_conn| async move {
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

                Ok::<_, diesel::result::Error>((hostnames, attributes))
            })
            .await
            .map_err(Error::msg)?;

        Ok((registration, hostnames, attributes))
    }
}

/// Changeset clearing every review-related field
///
/// Applied whenever review progress is discarded; `ready_at` is included
/// since a withdrawn submission no longer has a submission time.
fn review_reset() -> (
    diesel::dsl::Eq<registrations::ready_at, Option<Timestamp>>,
    diesel::dsl::Eq<registrations::reviewed_accepted, Option<bool>>,
    diesel::dsl::Eq<registrations::reviewed_at, Option<Timestamp>>,
    diesel::dsl::Eq<registrations::rejection_remarks, Option<String>>,
    diesel::dsl::Eq<registrations::published_at, Option<Timestamp>>,
) {
    (
        registrations::ready_at.eq(None),
        registrations::reviewed_accepted.eq(None),
        registrations::reviewed_at.eq(None),
        registrations::rejection_remarks.eq(None),
        registrations::published_at.eq(None),
    )
}

async fn submit(
    tx: &mut diesel_async::pooled_connection::deadpool::Object<diesel_async::AsyncPgConnection>,
    registration_id: Uuid,
    now: Timestamp,
) -> Result<(), diesel::result::Error> {
    use diesel::sql_types::Timestamptz;

    diesel::update(registrations::table.find(registration_id))
        .set((
            registrations::ready.eq(true),
            registrations::ready_at.eq(diesel::dsl::sql::<diesel::sql_types::Nullable<Timestamptz>>(
                "COALESCE(ready_at, ",
            )
            .bind::<Timestamptz, _>(now)
            .sql(")")),
            registrations::updated_at.eq(now),
        ))
        .execute(tx)
        .await?;

    Ok(())
}

async fn insert_hostnames(
    tx: &mut diesel_async::pooled_connection::deadpool::Object<diesel_async::AsyncPgConnection>,
    registration_id: Uuid,
    names: &[String],
) -> Result<(), diesel::result::Error> {
    let now = klok::now();

    for name in names {
        let challenge = generate_challenge();

        diesel::insert_into(hostnames::table)
            .values(NewHostname {
                id: Uuid::now_v7(),
                registration_id,
                hostname: name,
                dns_challenge: challenge.as_str(),
                dns_challenge_created_at: now,
                dns_challenge_verified: Some(false),
            })
            .execute(tx)
            .await?;
    }

    Ok(())
}

async fn replace_hostnames(
    tx: &mut diesel_async::pooled_connection::deadpool::Object<diesel_async::AsyncPgConnection>,
    registration_id: Uuid,
    old: &[Hostname],
    new: &[String],
) -> Result<(), diesel::result::Error> {
    diesel::delete(
        hostnames::table
            .filter(hostnames::registration_id.eq(registration_id))
            .filter(hostnames::hostname.ne_all(new)),
    )
    .execute(tx)
    .await?;

    let added: Vec<String> = new
        .iter()
        .filter(|name| !old.iter().any(|hostname| &hostname.hostname == *name))
        .cloned()
        .collect();

    insert_hostnames(tx, registration_id, &added).await
}

async fn insert_attributes(
    tx: &mut diesel_async::pooled_connection::deadpool::Object<diesel_async::AsyncPgConnection>,
    registration_id: Uuid,
    attributes: &[String],
) -> Result<(), diesel::result::Error> {
    for attribute in attributes {
        diesel::insert_into(disclosure_attributes::table)
            .values(NewDisclosureAttribute {
                id: Uuid::now_v7(),
                registration_id,
                attribute,
            })
            .execute(tx)
            .await?;
    }

    Ok(())
}

async fn replace_attributes(
    tx: &mut diesel_async::pooled_connection::deadpool::Object<diesel_async::AsyncPgConnection>,
    registration_id: Uuid,
    old: &[DisclosureAttribute],
    new: &[String],
) -> Result<(), diesel::result::Error> {
    diesel::delete(
        disclosure_attributes::table
            .filter(disclosure_attributes::registration_id.eq(registration_id))
            .filter(disclosure_attributes::attribute.ne_all(new)),
    )
    .execute(tx)
    .await?;

    let added: Vec<String> = new
        .iter()
        .filter(|name| !old.iter().any(|attribute| &attribute.attribute == *name))
        .cloned()
        .collect();

    insert_attributes(tx, registration_id, &added).await
}

#[cfg(test)]
mod test {
    use super::{edit_effect, review_outcome, EditEffect, RegistrationContent};
    use diesel::ExpressionMethods;
    use garde::Validate;
    use pretty_assertions::assert_eq;
    use portal_db::{
        model::registration::RegistrationStatus, schema::registrations, types::Environment,
    };
    use std::collections::BTreeMap;

    fn content(hostnames: &[&str]) -> RegistrationContent {
        RegistrationContent::builder()
            .slug("municipality-login".into())
            .environment(Environment::Production)
            .display_name(BTreeMap::new())
            .context_description(BTreeMap::new())
            .hostnames(hostnames.iter().map(ToString::to_string).collect())
            .build()
    }

    #[test]
    fn draft_edits_reset_nothing() {
        assert_eq!(
            edit_effect(RegistrationStatus::Draft, true, false),
            EditEffect::Keep
        );
        assert_eq!(
            edit_effect(RegistrationStatus::Draft, true, true),
            EditEffect::Keep
        );
    }

    #[test]
    fn unchanged_content_resets_nothing() {
        for status in [
            RegistrationStatus::PendingReview,
            RegistrationStatus::Accepted,
            RegistrationStatus::Rejected,
            RegistrationStatus::Published,
            RegistrationStatus::Invalidated,
        ] {
            assert_eq!(edit_effect(status, false, false), EditEffect::Keep);
        }
    }

    #[test]
    fn content_change_under_review_discards_progress() {
        assert_eq!(
            edit_effect(RegistrationStatus::PendingReview, true, false),
            EditEffect::Unready
        );
        assert_eq!(
            edit_effect(RegistrationStatus::Accepted, true, false),
            EditEffect::Unready
        );
        assert_eq!(
            edit_effect(RegistrationStatus::Published, true, false),
            EditEffect::Unready
        );
    }

    #[test]
    fn edit_and_resubmit_in_one_step() {
        assert_eq!(
            edit_effect(RegistrationStatus::Accepted, true, true),
            EditEffect::Resubmit
        );
    }

    #[test]
    fn reviewed_at_is_stamped_exactly_once() {
        assert!(review_outcome(None, true).stamp_reviewed_at);
        assert!(review_outcome(None, false).stamp_reviewed_at);

        // Re-saving a decided registration never re-stamps
        assert!(!review_outcome(Some(true), true).stamp_reviewed_at);
        assert!(!review_outcome(Some(false), true).stamp_reviewed_at);
        assert!(!review_outcome(Some(false), false).stamp_reviewed_at);
    }

    #[test]
    fn snapshot_freezes_on_the_transition_into_acceptance() {
        assert!(review_outcome(None, true).freeze_snapshot);
        assert!(review_outcome(Some(false), true).freeze_snapshot);

        assert!(!review_outcome(Some(true), true).freeze_snapshot);
        assert!(!review_outcome(None, false).freeze_snapshot);
        assert!(!review_outcome(Some(false), false).freeze_snapshot);
    }

    #[test]
    fn clearing_ready_resets_all_review_progress() {
        let query = diesel::update(registrations::table)
            .set((registrations::ready.eq(false), super::review_reset()));
        let sql = diesel::debug_query::<diesel::pg::Pg, _>(&query).to_string();

        for column in [
            "ready_at",
            "reviewed_accepted",
            "reviewed_at",
            "rejection_remarks",
            "published_at",
        ] {
            assert!(sql.contains(column), "{column} is not reset");
        }
    }

    #[test]
    fn hostname_syntax_is_validated() {
        assert!(content(&["attributes.example"]).validate(&()).is_ok());
        assert!(content(&["sub.attributes.example"]).validate(&()).is_ok());

        assert!(content(&["not a hostname"]).validate(&()).is_err());
        assert!(content(&["tld-only"]).validate(&()).is_err());
        assert!(content(&["-leading.example"]).validate(&()).is_err());
    }

    #[test]
    fn slug_syntax_is_validated() {
        let mut invalid = content(&["attributes.example"]);
        invalid.slug = "Not A Slug".into();

        assert!(invalid.validate(&()).is_err());
    }
}
