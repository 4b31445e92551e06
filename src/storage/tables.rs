use redb::TableDefinition;

// ============================================================================
// Session cache
// ============================================================================

/// Session records: token -> SessionRecord (msgpack)
pub const SESSIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("sessions");

/// Token index: user_id -> current session token (at most one per user)
pub const USER_TOKENS: TableDefinition<u64, &str> = TableDefinition::new("user_tokens");

/// Ordered expiration index: zero-padded epoch-ms + token -> token
pub const SESSION_EXPIRY: TableDefinition<&str, &str> = TableDefinition::new("session_expiry");

// ============================================================================
// Credential store
// ============================================================================

/// Users: user_id -> User (msgpack)
pub const USERS: TableDefinition<u64, &[u8]> = TableDefinition::new("users");

/// Secondary index: username -> user_id
pub const USERNAMES: TableDefinition<&str, u64> = TableDefinition::new("usernames");

/// Roles: role_id -> Role (msgpack)
pub const ROLES: TableDefinition<u64, &[u8]> = TableDefinition::new("roles");

/// Secondary index: role name -> role_id
pub const ROLE_NAMES: TableDefinition<&str, u64> = TableDefinition::new("role_names");

/// Permissions: permission_id -> Permission (msgpack)
pub const PERMISSIONS: TableDefinition<u64, &[u8]> = TableDefinition::new("permissions");

/// Secondary index: permission code -> permission_id
pub const PERMISSION_CODES: TableDefinition<&str, u64> = TableDefinition::new("permission_codes");

/// User -> role assignments: user_id -> Vec<role_id> (msgpack)
pub const USER_ROLES: TableDefinition<u64, &[u8]> = TableDefinition::new("user_roles");

/// Reverse index: role_id -> Vec<user_id> (for role-wide cache refresh)
pub const ROLE_USERS: TableDefinition<u64, &[u8]> = TableDefinition::new("role_users");

/// Role -> permission assignments: role_id -> Vec<permission_id> (msgpack)
pub const ROLE_PERMISSIONS: TableDefinition<u64, &[u8]> = TableDefinition::new("role_permissions");

/// Id sequence counters: entity kind -> last issued id
pub const ID_SEQUENCES: TableDefinition<&str, u64> = TableDefinition::new("id_sequences");
