use crate::{
    json::Json,
    schema::registrations,
    snapshot::RegistrationSnapshot,
    types::{Environment, RegistrationRole},
};
use diesel::{Identifiable, Insertable, Queryable, Selectable};
use iso8601_timestamp::Timestamp;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt};
use uuid::Uuid;

/// Lifecycle state of a registration
///
/// Never persisted: always recomputed from the underlying facts on read, so
/// it cannot drift from them.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistrationStatus {
    Draft,
    PendingReview,
    Accepted,
    Rejected,
    Published,
    Invalidated,
}

impl fmt::Display for RegistrationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Draft => "draft",
            Self::PendingReview => "pending_review",
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
            Self::Published => "published",
            Self::Invalidated => "invalidated",
        };

        f.write_str(name)
    }
}

/// An organization's claim to operate as verifier or issuer
#[derive(Clone, Debug, Deserialize, Serialize, Identifiable, Selectable, Queryable)]
#[diesel(table_name = registrations)]
pub struct Registration {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub slug: String,
    pub role: RegistrationRole,
    pub environment: Environment,
    pub display_name: Json<BTreeMap<String, String>>,
    pub context_description: Json<BTreeMap<String, String>>,
    pub condiscon: Option<Json<serde_json::Value>>,
    pub ready: bool,
    pub ready_at: Option<Timestamp>,
    pub reviewed_accepted: Option<bool>,
    pub reviewed_at: Option<Timestamp>,
    pub rejection_remarks: Option<String>,
    pub approved_snapshot: Option<Json<RegistrationSnapshot>>,
    pub published_snapshot: Option<Json<RegistrationSnapshot>>,
    pub published_at: Option<Timestamp>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Registration {
    /// Whether a snapshot of this registration is part of the public scheme
    #[must_use]
    pub fn is_published(&self) -> bool {
        self.published_at.is_some()
    }

    /// Derive the lifecycle state from the stored facts
    ///
    /// `has_invalidated_hostname` is the aggregate over the owned hostnames:
    /// does any of them have `dns_challenge_verified = false` with
    /// `dns_challenge_invalidated_at` set. The rules are evaluated in
    /// precedence order; the first match wins.
    #[must_use]
    pub fn status(&self, has_invalidated_hostname: bool) -> RegistrationStatus {
        let published = self.is_published();

        if published && has_invalidated_hostname {
            RegistrationStatus::Invalidated
        } else if self.reviewed_accepted == Some(true) && has_invalidated_hostname {
            RegistrationStatus::Invalidated
        } else if self.reviewed_accepted == Some(true) && published {
            RegistrationStatus::Published
        } else if self.reviewed_accepted == Some(true) {
            RegistrationStatus::Accepted
        } else if self.reviewed_accepted == Some(false) && !published {
            RegistrationStatus::Rejected
        } else if self.ready {
            RegistrationStatus::PendingReview
        } else {
            RegistrationStatus::Draft
        }
    }
}

#[derive(Clone, Insertable)]
#[diesel(table_name = registrations)]
pub struct NewRegistration<'a> {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub slug: &'a str,
    pub role: RegistrationRole,
    pub environment: Environment,
    pub display_name: Json<BTreeMap<String, String>>,
    pub context_description: Json<BTreeMap<String, String>>,
    pub condiscon: Option<Json<serde_json::Value>>,
}

#[cfg(test)]
mod test {
    use super::{Registration, RegistrationStatus};
    use crate::json::Json;
    use pretty_assertions::assert_eq;
    use crate::types::{Environment, RegistrationRole};
    use iso8601_timestamp::Timestamp;
    use std::collections::BTreeMap;
    use uuid::Uuid;

    fn registration(ready: bool, reviewed_accepted: Option<bool>, published: bool) -> Registration {
        Registration {
            id: Uuid::now_v7(),
            organization_id: Uuid::now_v7(),
            slug: "municipality-login".into(),
            role: RegistrationRole::Verifier,
            environment: Environment::Production,
            display_name: Json(BTreeMap::new()),
            context_description: Json(BTreeMap::new()),
            condiscon: None,
            ready,
            ready_at: ready.then(Timestamp::now_utc),
            reviewed_accepted,
            reviewed_at: reviewed_accepted.map(|_| Timestamp::now_utc()),
            rejection_remarks: None,
            approved_snapshot: None,
            published_snapshot: None,
            published_at: published.then(Timestamp::now_utc),
            created_at: Timestamp::now_utc(),
            updated_at: Timestamp::now_utc(),
        }
    }

    #[test]
    fn unready_is_draft() {
        assert_eq!(
            registration(false, None, false).status(false),
            RegistrationStatus::Draft
        );
    }

    #[test]
    fn ready_but_undecided_is_pending_review() {
        assert_eq!(
            registration(true, None, false).status(false),
            RegistrationStatus::PendingReview
        );
    }

    #[test]
    fn accepted_but_unpublished_is_accepted() {
        assert_eq!(
            registration(true, Some(true), false).status(false),
            RegistrationStatus::Accepted
        );
    }

    #[test]
    fn accepted_and_published_is_published() {
        assert_eq!(
            registration(true, Some(true), true).status(false),
            RegistrationStatus::Published
        );
    }

    #[test]
    fn rejected() {
        assert_eq!(
            registration(true, Some(false), false).status(false),
            RegistrationStatus::Rejected
        );
    }

    #[test]
    fn lost_ownership_invalidates_published_registration() {
        assert_eq!(
            registration(true, Some(true), true).status(true),
            RegistrationStatus::Invalidated
        );
    }

    #[test]
    fn lost_ownership_invalidates_accepted_registration() {
        assert_eq!(
            registration(true, Some(true), false).status(true),
            RegistrationStatus::Invalidated
        );
    }

    #[test]
    fn lost_ownership_does_not_touch_drafts() {
        assert_eq!(
            registration(false, None, false).status(true),
            RegistrationStatus::Draft
        );
        assert_eq!(
            registration(true, None, false).status(true),
            RegistrationStatus::PendingReview
        );
    }

    #[test]
    fn derivation_is_pure() {
        let reg = registration(true, Some(true), true);

        // Same facts, same answer, however often we ask
        for _ in 0..3 {
            assert_eq!(reg.status(false), RegistrationStatus::Published);
            assert_eq!(reg.status(true), RegistrationStatus::Invalidated);
        }
    }
}
