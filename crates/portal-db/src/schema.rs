diesel::table! {
    disclosure_attributes (id) {
        id -> Uuid,
        registration_id -> Uuid,
        attribute -> Text,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    hostnames (id) {
        id -> Uuid,
        registration_id -> Uuid,
        hostname -> Text,
        dns_challenge -> Nullable<Text>,
        dns_challenge_created_at -> Nullable<Timestamptz>,
        dns_challenge_verified -> Nullable<Bool>,
        dns_challenge_verified_at -> Nullable<Timestamptz>,
        dns_challenge_invalidated_at -> Nullable<Timestamptz>,
        manually_verified -> Bool,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    organizations (id) {
        id -> Uuid,
        name -> Text,
        slug -> Text,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    registrations (id) {
        id -> Uuid,
        organization_id -> Uuid,
        slug -> Text,
        role -> Int4,
        environment -> Int4,
        display_name -> Jsonb,
        context_description -> Jsonb,
        condiscon -> Nullable<Jsonb>,
        ready -> Bool,
        ready_at -> Nullable<Timestamptz>,
        reviewed_accepted -> Nullable<Bool>,
        reviewed_at -> Nullable<Timestamptz>,
        rejection_remarks -> Nullable<Text>,
        approved_snapshot -> Nullable<Jsonb>,
        published_snapshot -> Nullable<Jsonb>,
        published_at -> Nullable<Timestamptz>,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::joinable!(disclosure_attributes -> registrations (registration_id));
diesel::joinable!(hostnames -> registrations (registration_id));
diesel::joinable!(registrations -> organizations (organization_id));

diesel::allow_tables_to_appear_in_same_query!(
    disclosure_attributes,
    hostnames,
    organizations,
    registrations,
);
