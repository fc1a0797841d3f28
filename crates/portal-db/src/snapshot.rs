use crate::types::{Environment, RegistrationRole};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The public-facing data of a registration, frozen at a point in its
/// lifecycle
///
/// Three of these exist per registration: the live one (projected from the
/// current row on demand), the approved one (frozen when a reviewer accepts)
/// and the published one (frozen when the publication job exports into the
/// scheme). Structural equality between them is how drift is detected, so
/// collection fields are kept in sorted order.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct RegistrationSnapshot {
    pub slug: String,
    pub role: RegistrationRole,
    pub environment: Environment,
    pub display_name: BTreeMap<String, String>,
    pub context_description: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condiscon: Option<serde_json::Value>,
    pub hostnames: Vec<String>,
    pub attributes: Vec<String>,
}

impl RegistrationSnapshot {
    /// Project the live snapshot out of the current registration state
    #[must_use]
    pub fn project(
        registration: &crate::model::registration::Registration,
        hostnames: &[crate::model::hostname::Hostname],
        attributes: &[crate::model::disclosure_attribute::DisclosureAttribute],
    ) -> Self {
        let mut hostnames: Vec<String> = hostnames
            .iter()
            .map(|hostname| hostname.hostname.clone())
            .collect();
        hostnames.sort_unstable();

        let mut attributes: Vec<String> = attributes
            .iter()
            .map(|attribute| attribute.attribute.clone())
            .collect();
        attributes.sort_unstable();

        Self {
            slug: registration.slug.clone(),
            role: registration.role,
            environment: registration.environment,
            display_name: registration.display_name.0.clone(),
            context_description: registration.context_description.0.clone(),
            condiscon: registration
                .condiscon
                .as_ref()
                .map(|condiscon| condiscon.0.clone()),
            hostnames,
            attributes,
        }
    }
}
