//! Schema for the DynamoDB tables.
//!
//! Everything lives in one table keyed by `pk` (hash) and `sk` (range). There are no secondary
//! indexes. Any access pattern that is not a key lookup or a `begins_with(sk, ...)` query gets a
//! mirror row of its own, written in the same transaction as the row it mirrors.
//!
//! NOTE: When you are choosing attribute names, avoid using DynamoDB Reserved Words unless you
//! have no other choice. Query ergonomics get bad otherwise. For example, instead of using "role"
//! as an attribute, use "roles" or "user_role" since neither is a reserved word.
//!
//! Here is the list of DynamoDB Reserved Words:
//! https://docs.aws.amazon.com/amazondynamodb/latest/developerguide/ReservedWords.html

use lazy_static::lazy_static;
use rusoto_dynamodb::{
    AttributeDefinition, CreateTableInput, KeySchemaElement, ProvisionedThroughput,
};

/// Base name of the single table. Deployed tables carry an environment prefix, eg.
/// "production-artistpage".
pub const MAIN_TABLE: &str = "artistpage";

pub const PARTITION_KEY: &str = "pk";
pub const SORT_KEY: &str = "sk";

lazy_static! {
    pub static ref TABLE_DEFINITIONS: Vec<CreateTableInput> = vec![
        CreateTableInput {
            table_name: MAIN_TABLE.to_string(),
            /*
             * artistpage
             *
             * primary key:
             *
             *   [pk, sk]
             *
             * rows:
             *
             *   auth
             *     AUTH#SESSION#<id>              / SESSION              user_id, refresh_id, expires_at
             *     AUTH#REFRESH#<id>              / REFRESH              user_id, session_id, expires_at
             *     AUTH#USER#<user_id>            / SESSION#<id>         session index
             *     AUTH#USER#<user_id>            / REFRESH#<id>         refresh index
             *     AUTH#CODE#<code>               / CODE                 code_challenge,
             *                                                           code_challenge_method,
             *                                                           user_id, client_id,
             *                                                           expires_at, consumed_at
             *     AUTH#CLIENT                    / CLIENT#<client_id>   session_ttl_seconds,
             *                                                           refresh_ttl_seconds
             *
             *   artists
             *     ARTISTS#<handle>               / ARTIST               handle, display_name, bio,
             *                                                           owner_user_id, created_at,
             *                                                           follower_count
             *     ARTISTS#USER#<user_id>         / ARTIST#<handle>      handle, display_name,
             *                                                           created_at
             *     ARTISTS#<handle>               / MEMBER#<user_id>     user_id, roles
             *     ARTIST_MEMBERS#USER#<user_id>  / ARTIST#<handle>      handle, roles
             *
             *   follows
             *     FOLLOWS#USER#<user_id>         / <handle>             handle, followed_at
             *     ARTISTS#<handle>               / FOLLOWED#<at>#<uid>  user_id, followed_at
             *
             *   posts
             *     ARTISTS#<handle>               / POST#<post_id>       post fields
             *     ARTISTS#<handle>               / POST#BYTIME#<at>#<post_id>
             *
             *   users
             *     USERS#user,<id[0]>             / USER#<id>            id, email, cognito_sub,
             *                                                           created_at
             *     USERS#user,<id[0]>             / LINKED_SUB#<sub>     cognito_sub
             *     USERS#email#<sha256(email)[..2]> / <email>            user_id
             *     USERS#cognito_sub#<sub[..2]>   / <sub>                user_id
             *
             *   activity
             *     MAU#<yyyy-mm>                  / <user_id>            recorded_at
             *
             * All timestamps are RFC 3339 UTC strings with millisecond precision, so that they sort
             * correctly inside sort keys.
             */
            attribute_definitions: vec![
                attr_def(PARTITION_KEY, "S"),
                attr_def(SORT_KEY, "S"),
            ],
            key_schema: vec![
                key_schema_elem(PARTITION_KEY, "HASH"),
                key_schema_elem(SORT_KEY, "RANGE"),
            ],
            provisioned_throughput: default_provisioned_throughput(),
            ..Default::default()
        },
    ];
}

fn attr_def(name: &str, attr_type: &str) -> AttributeDefinition {
    AttributeDefinition {
        attribute_name: name.to_string(),
        attribute_type: attr_type.to_string(),
    }
}

fn key_schema_elem(name: &str, key_type: &str) -> KeySchemaElement {
    KeySchemaElement {
        attribute_name: name.to_string(),
        key_type: key_type.to_string(),
    }
}

fn default_provisioned_throughput() -> Option<ProvisionedThroughput> {
    Some(ProvisionedThroughput {
        read_capacity_units: 100,
        write_capacity_units: 100,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_table_keys() {
        assert_eq!(TABLE_DEFINITIONS.len(), 1);
        let table = &TABLE_DEFINITIONS[0];
        assert_eq!(table.table_name, MAIN_TABLE);
        let keys: Vec<(&str, &str)> = table
            .key_schema
            .iter()
            .map(|k| (k.attribute_name.as_str(), k.key_type.as_str()))
            .collect();
        assert_eq!(keys, vec![("pk", "HASH"), ("sk", "RANGE")]);
        assert!(table.global_secondary_indexes.is_none());
        assert!(table.local_secondary_indexes.is_none());
    }
}
