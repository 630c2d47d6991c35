//! Session types: the authenticated identity the rest of the application
//! sees.

use std::time::Duration;

use lifeline_protocol::{ProfileDocument, UserId};
use serde::{Deserialize, Serialize};

use crate::{Claims, Credential};

// ---------------------------------------------------------------------------
// SessionConfig
// ---------------------------------------------------------------------------

/// Timing knobs for the credential lifecycle.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// A token with this much time (or less) left is refreshed.
    ///
    /// Default: 5 minutes.
    pub refresh_window: Duration,

    /// How often the background task runs `check_and_refresh`.
    ///
    /// Default: 60 seconds.
    pub check_interval: Duration,

    /// Consecutive profile fetch failures tolerated before
    /// `refresh_profile` stops calling the endpoint.
    ///
    /// Default: 3.
    pub profile_refresh_attempts: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            refresh_window: Duration::from_secs(300),
            check_interval: Duration::from_secs(60),
            profile_refresh_attempts: 3,
        }
    }
}

// ---------------------------------------------------------------------------
// Role / LoginKind
// ---------------------------------------------------------------------------

/// Authorization role, taken from a single server-asserted field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    #[default]
    User,
    Admin,
}

impl Role {
    /// Interprets a server `role` field. Anything other than `admin` is a
    /// regular user.
    pub fn from_claim(value: &str) -> Self {
        if value.eq_ignore_ascii_case("admin") {
            Self::Admin
        } else {
            Self::User
        }
    }
}

/// Which issuing endpoint produced the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoginKind {
    #[default]
    User,
    Admin,
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// The authenticated identity derived from a [`Credential`] and an optional
/// server profile.
///
/// `id` always equals the current credential's subject. Profile data may be
/// stale, but a profile for a different user is never merged in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: UserId,
    pub display_name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub role: Role,
    #[serde(default)]
    pub kind: LoginKind,
    #[serde(default)]
    pub avatar: Option<String>,
    #[serde(default)]
    pub bio: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    /// Expiry of the credential this session is bound to.
    pub expires_at: u64,
    /// The raw claims of that credential.
    pub claims: Claims,
}

impl Session {
    /// Derives a session from the credential alone.
    ///
    /// `fallback_name` becomes the display name until a profile supplies a
    /// username. The role comes from the token's `role` claim when present,
    /// otherwise from the endpoint that issued it.
    pub fn derive(
        credential: &Credential,
        kind: LoginKind,
        fallback_name: &str,
    ) -> Self {
        let claims = credential.claims().clone();
        let role = match (&claims.role, kind) {
            (Some(role), _) => Role::from_claim(role),
            (None, LoginKind::Admin) => Role::Admin,
            (None, LoginKind::User) => Role::User,
        };
        Self {
            id: credential.subject(),
            display_name: fallback_name.to_string(),
            email: None,
            role,
            kind,
            avatar: None,
            bio: None,
            created_at: None,
            expires_at: credential.expires_at(),
            claims,
        }
    }

    /// Merges a profile document into this session.
    ///
    /// Returns `false` (and changes nothing) when the profile names a
    /// different user.
    pub fn merge_profile(&mut self, profile: &ProfileDocument) -> bool {
        if let Some(id) = &profile.id {
            if id != self.id.as_str() {
                return false;
            }
        }
        if let Some(username) = &profile.username {
            self.display_name = username.clone();
        }
        if profile.email.is_some() {
            self.email = profile.email.clone();
        }
        if let Some(role) = &profile.role {
            self.role = Role::from_claim(role);
        }
        if profile.avatar.is_some() {
            self.avatar = profile.avatar.clone();
        }
        if profile.bio.is_some() {
            self.bio = profile.bio.clone();
        }
        if let Some(created_at) = profile.created_at() {
            self.created_at = Some(created_at.to_string());
        }
        true
    }

    /// Rebinds the session to a refreshed credential for the same subject.
    pub(crate) fn rebind(&mut self, credential: &Credential) {
        self.expires_at = credential.expires_at();
        self.claims = credential.claims().clone();
    }

    /// Whether the server asserted the admin role for this session.
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::credential::tests::token_with;

    fn credential(claims: serde_json::Value) -> Credential {
        Credential::parse(&token_with(claims)).unwrap()
    }

    #[test]
    fn test_derive_user_login_defaults_to_user_role() {
        let cred = credential(json!({ "sub": "u1", "exp": 100 }));

        let session = Session::derive(&cred, LoginKind::User, "alice");

        assert_eq!(session.id, UserId::new("u1"));
        assert_eq!(session.display_name, "alice");
        assert_eq!(session.role, Role::User);
        assert_eq!(session.expires_at, 100);
    }

    #[test]
    fn test_derive_admin_login_without_role_claim_is_admin() {
        let cred = credential(json!({ "sub": "a1", "exp": 100 }));

        let session = Session::derive(&cred, LoginKind::Admin, "root@example.com");

        assert!(session.is_admin());
    }

    #[test]
    fn test_derive_role_claim_wins_over_endpoint() {
        let cred = credential(json!({ "sub": "a1", "exp": 100, "role": "user" }));

        let session = Session::derive(&cred, LoginKind::Admin, "x");

        assert_eq!(session.role, Role::User);
    }

    #[test]
    fn test_merge_profile_updates_fields() {
        let cred = credential(json!({ "sub": "u1", "exp": 100 }));
        let mut session = Session::derive(&cred, LoginKind::User, "alice");
        let profile = ProfileDocument {
            id: Some("u1".into()),
            username: Some("Alice A.".into()),
            email: Some("alice@example.com".into()),
            joined_at: Some("2023-02-03".into()),
            bio: Some("hi".into()),
            ..ProfileDocument::default()
        };

        assert!(session.merge_profile(&profile));

        assert_eq!(session.display_name, "Alice A.");
        assert_eq!(session.email.as_deref(), Some("alice@example.com"));
        assert_eq!(session.created_at.as_deref(), Some("2023-02-03"));
        assert_eq!(session.bio.as_deref(), Some("hi"));
        assert_eq!(session.id, UserId::new("u1"));
    }

    #[test]
    fn test_merge_profile_for_other_user_is_ignored() {
        let cred = credential(json!({ "sub": "u1", "exp": 100 }));
        let mut session = Session::derive(&cred, LoginKind::User, "alice");
        let before = session.clone();
        let profile = ProfileDocument {
            id: Some("u2".into()),
            username: Some("mallory".into()),
            ..ProfileDocument::default()
        };

        assert!(!session.merge_profile(&profile));
        assert_eq!(session, before);
    }

    #[test]
    fn test_role_from_claim_only_admin_is_admin() {
        assert_eq!(Role::from_claim("admin"), Role::Admin);
        assert_eq!(Role::from_claim("ADMIN"), Role::Admin);
        assert_eq!(Role::from_claim("moderator"), Role::User);
    }

    #[test]
    fn test_session_survives_json_round_trip_for_storage() {
        let cred = credential(json!({ "sub": "u1", "exp": 100, "role": "admin" }));
        let session = Session::derive(&cred, LoginKind::Admin, "root");

        let json = serde_json::to_string(&session).unwrap();
        let back: Session = serde_json::from_str(&json).unwrap();

        assert_eq!(back, session);
    }
}
