table! {
    channels (id) {
        id -> BigInt,
        name -> Text,
        display_name -> Text,
        twitch_id -> Nullable<Text>,
        active -> Bool,
    }
}

table! {
    users (id) {
        id -> BigInt,
        username -> Text,
        display_name -> Text,
        twitch_id -> Nullable<Text>,
        first_seen -> Timestamp,
        last_seen -> Timestamp,
    }
}

table! {
    messages (id) {
        id -> BigInt,
        channel_id -> BigInt,
        user_id -> BigInt,
        text -> Text,
        ts -> Timestamp,
        wire_id -> Text,
        badges_json -> Text,
        emotes_json -> Text,
        reply_to_wire_id -> Nullable<Text>,
        is_deleted -> Bool,
        deleted_at -> Nullable<Timestamp>,
        deleted_by -> Nullable<BigInt>,
        synthesized_ts -> Bool,
    }
}

table! {
    mod_actions (id) {
        id -> BigInt,
        channel_id -> BigInt,
        moderator_id -> Nullable<BigInt>,
        target_user_id -> BigInt,
        kind -> Text,
        duration_s -> Nullable<Integer>,
        reason -> Nullable<Text>,
        ts -> Timestamp,
        related_wire_id -> Nullable<Text>,
    }
}

table! {
    monetization_events (id) {
        id -> BigInt,
        channel_id -> BigInt,
        kind -> Text,
        user_id -> Nullable<BigInt>,
        payload_json -> Text,
        ts -> Timestamp,
    }
}

table! {
    webhook_registrations (id) {
        id -> BigInt,
        owner_id -> BigInt,
        kind -> Text,
        filter_json -> Text,
        url -> Text,
        url_mask -> Text,
        enabled -> Bool,
        muted -> Bool,
        consecutive_failures -> Integer,
        last_triggered_at -> Nullable<Timestamp>,
        trigger_count -> BigInt,
    }
}

joinable!(messages -> channels (channel_id));
joinable!(messages -> users (user_id));
joinable!(mod_actions -> channels (channel_id));

allow_tables_to_appear_in_same_query!(
    channels,
    users,
    messages,
    mod_actions,
    monetization_events,
    webhook_registrations,
);
