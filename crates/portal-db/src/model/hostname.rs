use crate::schema::hostnames;
use diesel::{Identifiable, Insertable, Queryable, Selectable};
use iso8601_timestamp::Timestamp;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A domain claimed by a registration
///
/// `dns_challenge_verified` is deliberately tri-state: `None` means no
/// verification pass has ever evaluated the hostname, `Some(false)` either
/// "not yet verified" or, together with `dns_challenge_invalidated_at`,
/// "ownership was lost after having been proven".
#[derive(Clone, Debug, Deserialize, Serialize, Identifiable, Selectable, Queryable)]
#[diesel(table_name = hostnames)]
pub struct Hostname {
    pub id: Uuid,
    pub registration_id: Uuid,
    pub hostname: String,
    pub dns_challenge: Option<String>,
    pub dns_challenge_created_at: Option<Timestamp>,
    pub dns_challenge_verified: Option<bool>,
    pub dns_challenge_verified_at: Option<Timestamp>,
    pub dns_challenge_invalidated_at: Option<Timestamp>,
    pub manually_verified: bool,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Hostname {
    /// A hostname is trusted when its DNS challenge was verified or an
    /// operator vouched for it manually
    #[must_use]
    pub fn is_trusted(&self) -> bool {
        self.dns_challenge_verified == Some(true) || self.manually_verified
    }

    /// Whether ownership was lost after having been proven
    #[must_use]
    pub fn is_invalidated(&self) -> bool {
        self.dns_challenge_verified == Some(false) && self.dns_challenge_invalidated_at.is_some()
    }
}

#[derive(Clone, Insertable)]
#[diesel(table_name = hostnames)]
pub struct NewHostname<'a> {
    pub id: Uuid,
    pub registration_id: Uuid,
    pub hostname: &'a str,
    pub dns_challenge: &'a str,
    pub dns_challenge_created_at: Timestamp,
    pub dns_challenge_verified: Option<bool>,
}

#[cfg(test)]
mod test {
    use super::Hostname;
    use iso8601_timestamp::Timestamp;
    use uuid::Uuid;

    fn hostname(verified: Option<bool>, manually_verified: bool) -> Hostname {
        Hostname {
            id: Uuid::now_v7(),
            registration_id: Uuid::now_v7(),
            hostname: "attributes.example".into(),
            dns_challenge: None,
            dns_challenge_created_at: None,
            dns_challenge_verified: verified,
            dns_challenge_verified_at: None,
            dns_challenge_invalidated_at: None,
            manually_verified,
            created_at: Timestamp::now_utc(),
            updated_at: Timestamp::now_utc(),
        }
    }

    #[test]
    fn trusted_through_either_path() {
        assert!(hostname(Some(true), false).is_trusted());
        assert!(hostname(None, true).is_trusted());
        assert!(!hostname(None, false).is_trusted());
        assert!(!hostname(Some(false), false).is_trusted());
    }

    #[test]
    fn invalidated_requires_both_markers() {
        let mut lost = hostname(Some(false), false);
        lost.dns_challenge_invalidated_at = Some(Timestamp::now_utc());
        assert!(lost.is_invalidated());

        // Unverified-but-never-trusted is not "invalidated"
        assert!(!hostname(Some(false), false).is_invalidated());
        assert!(!hostname(None, false).is_invalidated());
    }
}
