use crate::schema::disclosure_attributes;
use diesel::{Identifiable, Insertable, Queryable, Selectable};
use iso8601_timestamp::Timestamp;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Junction record: one attribute a verifier registration requests
#[derive(Clone, Debug, Deserialize, Serialize, Identifiable, Selectable, Queryable)]
#[diesel(table_name = disclosure_attributes)]
pub struct DisclosureAttribute {
    pub id: Uuid,
    pub registration_id: Uuid,
    pub attribute: String,
    pub created_at: Timestamp,
}

#[derive(Clone, Insertable)]
#[diesel(table_name = disclosure_attributes)]
pub struct NewDisclosureAttribute<'a> {
    pub id: Uuid,
    pub registration_id: Uuid,
    pub attribute: &'a str,
}
