/// Database row types for all tables.
/// These correspond 1:1 to the SQLite schema defined in migrations.rs.
use serde::{Deserialize, Serialize};

/// User record in the users table
#[derive(Debug, Clone)]
pub struct User {
    pub id: String,
    pub name: String,
    pub email: String,
    pub profile_image: String,
    pub online_visibility: OnlineVisibility,
    pub read_receipts: ReadReceipts,
    pub created_at: String,
    pub updated_at: String,
}

/// Who may observe this user's online transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OnlineVisibility {
    Everyone,
    Friends,
    None,
}

impl OnlineVisibility {
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "everyone" => Some(Self::Everyone),
            "friends" => Some(Self::Friends),
            "none" => Some(Self::None),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Everyone => "everyone",
            Self::Friends => "friends",
            Self::None => "none",
        }
    }
}

/// Whether bulk seen-marking is performed for this user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadReceipts {
    Enable,
    Disable,
}

impl ReadReceipts {
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "enable" => Some(Self::Enable),
            "disable" => Some(Self::Disable),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Enable => "enable",
            Self::Disable => "disable",
        }
    }
}

/// Directed friend edge, unique per unordered pair
#[derive(Debug, Clone)]
pub struct FriendRequestRow {
    pub id: String,
    pub from_user: String,
    pub to_user: String,
    pub status: FriendStatus,
    pub pair_key: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FriendStatus {
    Pending,
    Accepted,
    Rejected,
}

impl FriendStatus {
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "accepted" => Some(Self::Accepted),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
        }
    }
}

/// Conversation kind discriminator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationKind {
    Private,
    Group,
}

impl ConversationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Private => "private",
            Self::Group => "group",
        }
    }
}

/// Group-only settings columns on the conversations table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GroupSettings {
    pub link_token: Option<String>,
    pub members_edit_group_data: bool,
    pub members_send_messages: bool,
    pub members_add_members: bool,
    pub members_invite_via_link: bool,
    pub admin_approve_new_members: bool,
}

impl Default for GroupSettings {
    fn default() -> Self {
        Self {
            link_token: None,
            members_edit_group_data: false,
            members_send_messages: true,
            members_add_members: false,
            members_invite_via_link: false,
            admin_approve_new_members: false,
        }
    }
}

/// Conversation row: either a private pair channel or an admin-owned group.
/// The group-only fields live in `group`.
#[derive(Debug, Clone)]
pub struct Conversation {
    pub id: String,
    pub kind: ConversationKind,
    /// Sorted "a:b" id pair — set for private conversations only
    pub participant_key: Option<String>,
    pub last_message_id: Option<String>,
    pub group: Option<GroupInfo>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Group-only attributes of a conversation
#[derive(Debug, Clone)]
pub struct GroupInfo {
    pub admin_id: String,
    pub group_name: String,
    pub group_desc: String,
    pub group_image: String,
    pub settings: GroupSettings,
}

impl Conversation {
    pub fn is_group(&self) -> bool {
        self.kind == ConversationKind::Group
    }

    /// Group admin id, when this conversation is a group.
    pub fn admin_id(&self) -> Option<&str> {
        self.group.as_ref().map(|g| g.admin_id.as_str())
    }
}

/// Message row (millisecond timestamps drive ordering and cursors)
#[derive(Debug, Clone)]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub from_user: String,
    /// Absent for group messages
    pub to_user: Option<String>,
    pub body: Option<String>,
    pub media_url: String,
    pub media_type: String,
    pub reply_to_id: Option<String>,
    pub seen: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

/// One user's reaction on a message
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct React {
    pub user_id: String,
    pub react: ReactKind,
}

/// The fixed reaction vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReactKind {
    Like,
    Love,
    Laugh,
    Wow,
    Sad,
    Angry,
}

impl ReactKind {
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "like" => Some(Self::Like),
            "love" => Some(Self::Love),
            "laugh" => Some(Self::Laugh),
            "wow" => Some(Self::Wow),
            "sad" => Some(Self::Sad),
            "angry" => Some(Self::Angry),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Like => "like",
            Self::Love => "love",
            Self::Laugh => "laugh",
            Self::Wow => "wow",
            Self::Sad => "sad",
            Self::Angry => "angry",
        }
    }
}

/// Ephemeral 24h status row (soft-deleted, never purged)
#[derive(Debug, Clone)]
pub struct Status {
    pub id: String,
    pub user_id: String,
    pub content: Option<String>,
    pub media_url: String,
    pub media_type: String,
    pub expires_at: i64,
    pub is_deleted: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Status {
    /// Readers must apply this filter; expired or deleted rows stay on disk.
    pub fn is_active(&self, now_millis: i64) -> bool {
        self.expires_at > now_millis && !self.is_deleted
    }
}
