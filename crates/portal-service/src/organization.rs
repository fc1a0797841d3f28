use diesel::{ExpressionMethods, OptionalExtension, QueryDsl, SelectableHelper};
use diesel_async::RunQueryDsl;
use portal_db::{
    model::organization::{NewOrganization, Organization},
    schema::organizations,
    PgPool,
};
use portal_error::{Error, ErrorType, Result};
use typed_builder::TypedBuilder;
use uuid::Uuid;

#[derive(Clone, TypedBuilder)]
pub struct OrganizationService {
    db_pool: PgPool,
}

impl OrganizationService {
    pub async fn create(&self, name: &str, slug: &str) -> Result<Organization> {
        let organization = self
            .db_pool
            .with_connection(|mut db_conn| async move {
                diesel::insert_into(organizations::table)
                    .values(NewOrganization {
                        id: Uuid::now_v7(),
                        name,
                        slug,
                    })
                    .returning(Organization::as_returning())
                    .get_result(&mut db_conn)
                    .await
            })
            .await
            .map_err(Error::msg)?;

        Ok(organization)
    }

    pub async fn get_by_slug(&self, slug: &str) -> Result<Organization> {
        let organization = self
            .db_pool
            .with_connection(|mut db_conn| async move {
                organizations::table
                    .filter(organizations::slug.eq(slug))
                    .select(Organization::as_select())
                    .first(&mut db_conn)
                    .await
                    .optional()
            })
            .await
            .map_err(Error::msg)?;

        organization.ok_or_else(|| {
            portal_error::portal_error!(type = ErrorType::NotFound, "organization not found")
        })
    }
}
