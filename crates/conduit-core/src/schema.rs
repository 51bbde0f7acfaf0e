// Relational schema for the conduit store (spec §3 Data Model, §6 Persisted state).
// The `tool_embeddings` table backs the vector catalog (spec §4.7) via pgvector.

use diesel::sql_types::*;
use pgvector::sql_types::Vector;

diesel::table! {
    use diesel::sql_types::*;

    users (id) {
        id -> Text,
        email -> Nullable<Text>,
        display_name -> Nullable<Text>,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    use diesel::sql_types::*;

    sessions (id) {
        id -> Uuid,
        user_id -> Text,
        token -> Nullable<Text>,
        started_at -> Timestamptz,
        last_activity_at -> Timestamptz,
        updated_at -> Timestamptz,
        is_active -> Bool,
        conversation_summary -> Nullable<Jsonb>,
    }
}

diesel::table! {
    use diesel::sql_types::*;

    conversations (id) {
        id -> Uuid,
        session_id -> Uuid,
        title -> Nullable<Text>,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    use diesel::sql_types::*;

    messages (id) {
        id -> Uuid,
        conversation_id -> Uuid,
        role -> Text,
        content -> Text,
        tool_calls -> Nullable<Jsonb>,
        analysis -> Nullable<Jsonb>,
        metadata -> Nullable<Jsonb>,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    use diesel::sql_types::*;

    app_connections (id) {
        id -> Uuid,
        user_id -> Text,
        app_name -> Text,
        broker_account_id -> Text,
        status -> Text,
        metadata -> Nullable<Jsonb>,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    use diesel::sql_types::*;

    user_preferences (id) {
        id -> Uuid,
        user_id -> Text,
        key -> Text,
        value -> Text,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    use diesel::sql_types::*;
    use pgvector::sql_types::Vector;

    tool_embeddings (id) {
        id -> Uuid,
        namespace -> Text,
        tool_name -> Text,
        description -> Text,
        embedding -> Nullable<Vector>,
        metadata -> Jsonb,
        created_at -> Timestamptz,
    }
}

diesel::joinable!(sessions -> users (user_id));
diesel::joinable!(conversations -> sessions (session_id));
diesel::joinable!(messages -> conversations (conversation_id));
diesel::joinable!(app_connections -> users (user_id));
diesel::joinable!(user_preferences -> users (user_id));

diesel::allow_tables_to_appear_in_same_query!(
    users,
    sessions,
    conversations,
    messages,
    app_connections,
    user_preferences,
    tool_embeddings,
);
