use rusqlite_migration::{Migrations, M};

/// Define all schema migrations.
/// Uses SQLite user_version pragma for tracking — no migration table needed.
pub fn migrations() -> Migrations<'static> {
    Migrations::new(vec![
        M::up(
            "-- Migration 1: Users and relationships

CREATE TABLE users (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    email TEXT NOT NULL UNIQUE,
    profile_image TEXT NOT NULL DEFAULT '',
    online_visibility TEXT NOT NULL DEFAULT 'everyone',
    read_receipts TEXT NOT NULL DEFAULT 'enable',
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE user_blocks (
    user_id TEXT NOT NULL,
    blocked_id TEXT NOT NULL,
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (user_id, blocked_id),
    FOREIGN KEY (user_id) REFERENCES users(id),
    FOREIGN KEY (blocked_id) REFERENCES users(id)
);

-- One edge per unordered pair: pair_key is the sorted \"min:max\" of the ids.
-- Re-requesting after a rejection rewrites from/to/status on the same row.
CREATE TABLE friend_requests (
    id TEXT PRIMARY KEY,
    from_user TEXT NOT NULL,
    to_user TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',
    pair_key TEXT NOT NULL UNIQUE,
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    updated_at TEXT NOT NULL DEFAULT (datetime('now')),
    FOREIGN KEY (from_user) REFERENCES users(id),
    FOREIGN KEY (to_user) REFERENCES users(id)
);
CREATE INDEX idx_friend_requests_to ON friend_requests(to_user, status);
CREATE INDEX idx_friend_requests_from ON friend_requests(from_user, status);
",
        ),
        M::up(
            "-- Migration 2: Conversations and messages

-- participant_key is the sorted \"a:b\" pair for private conversations
-- (NULL for groups). The UNIQUE constraint is what makes concurrent
-- first-contact between the same pair collapse to a single row.
CREATE TABLE conversations (
    id TEXT PRIMARY KEY,
    kind TEXT NOT NULL DEFAULT 'private',
    participant_key TEXT UNIQUE,
    last_message_id TEXT,
    admin_id TEXT,
    group_name TEXT,
    group_desc TEXT,
    group_image TEXT,
    link_token TEXT,
    members_edit_group_data INTEGER NOT NULL DEFAULT 0,
    members_send_messages INTEGER NOT NULL DEFAULT 1,
    members_add_members INTEGER NOT NULL DEFAULT 0,
    members_invite_via_link INTEGER NOT NULL DEFAULT 0,
    admin_approve_new_members INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);

-- position preserves insertion order for group display
CREATE TABLE conversation_participants (
    conversation_id TEXT NOT NULL,
    user_id TEXT NOT NULL,
    position INTEGER NOT NULL DEFAULT 0,
    joined_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (conversation_id, user_id),
    FOREIGN KEY (conversation_id) REFERENCES conversations(id) ON DELETE CASCADE,
    FOREIGN KEY (user_id) REFERENCES users(id)
);
CREATE INDEX idx_participants_user ON conversation_participants(user_id);

-- Per-user history watermark (unix millis). Clearing a conversation writes
-- here; message rows are untouched.
CREATE TABLE conversation_user_settings (
    conversation_id TEXT NOT NULL,
    user_id TEXT NOT NULL,
    messages_cleared_at INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (conversation_id, user_id),
    FOREIGN KEY (conversation_id) REFERENCES conversations(id) ON DELETE CASCADE
);

CREATE TABLE messages (
    id TEXT PRIMARY KEY,
    conversation_id TEXT NOT NULL,
    from_user TEXT NOT NULL,
    to_user TEXT,
    body TEXT,
    media_url TEXT NOT NULL DEFAULT '',
    media_type TEXT NOT NULL DEFAULT '',
    reply_to_id TEXT,
    seen INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    FOREIGN KEY (conversation_id) REFERENCES conversations(id) ON DELETE CASCADE
);
CREATE INDEX idx_messages_conv_time ON messages(conversation_id, created_at);
CREATE INDEX idx_messages_conv_unseen ON messages(conversation_id, to_user, seen);

-- At most one reaction per user per message; a repeat of the same kind
-- deletes the row, a different kind replaces it in place.
CREATE TABLE message_reacts (
    message_id TEXT NOT NULL,
    user_id TEXT NOT NULL,
    react TEXT NOT NULL,
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (message_id, user_id),
    FOREIGN KEY (message_id) REFERENCES messages(id) ON DELETE CASCADE
);
",
        ),
        M::up(
            "-- Migration 3: Statuses (24h ephemeral broadcasts)

CREATE TABLE statuses (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    content TEXT,
    media_url TEXT NOT NULL DEFAULT '',
    media_type TEXT NOT NULL DEFAULT '',
    expires_at INTEGER NOT NULL,
    is_deleted INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    FOREIGN KEY (user_id) REFERENCES users(id)
);
CREATE INDEX idx_statuses_user ON statuses(user_id, expires_at);

CREATE TABLE status_viewers (
    status_id TEXT NOT NULL,
    user_id TEXT NOT NULL,
    viewed_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (status_id, user_id),
    FOREIGN KEY (status_id) REFERENCES statuses(id) ON DELETE CASCADE
);
",
        ),
    ])
}
