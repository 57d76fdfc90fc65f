use serde::{Deserialize, Serialize};

/// Application role, stored on the profile.
///
/// The profile's role is the only input to server-side authorization. The copy
/// carried in a token claim is parsed with [`AppRole::from_claim`] and is only
/// used for display and reconciliation.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AppRole {
    User,
    Member,
    Staff,
    Admin,
}

impl AppRole {
    pub const ALL: [AppRole; 4] = [AppRole::User, AppRole::Member, AppRole::Staff, AppRole::Admin];

    pub fn as_str(&self) -> &'static str {
        match self {
            AppRole::User => "USER",
            AppRole::Member => "MEMBER",
            AppRole::Staff => "STAFF",
            AppRole::Admin => "ADMIN",
        }
    }

    /// Strict parse (storage rows, admin input).
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "USER" => Some(AppRole::User),
            "MEMBER" => Some(AppRole::Member),
            "STAFF" => Some(AppRole::Staff),
            "ADMIN" => Some(AppRole::Admin),
            _ => None,
        }
    }

    /// Lenient parse for role strings coming from the identity provider.
    ///
    /// Unknown or missing values collapse to `User`.
    pub fn from_claim(raw: Option<&str>) -> Self {
        match raw {
            None => AppRole::User,
            Some(s) => Self::parse(s).unwrap_or_else(|| {
                tracing::debug!(claim = s, "unrecognized role claim; treating as USER");
                AppRole::User
            }),
        }
    }

    /// STAFF and ADMIN are administrative roles; membership never changes them.
    pub fn is_administrative(&self) -> bool {
        matches!(self, AppRole::Staff | AppRole::Admin)
    }

    /// Role this profile should hold given whether its membership is active.
    pub fn with_membership(self, active: bool) -> Self {
        if self.is_administrative() {
            return self;
        }
        if active { AppRole::Member } else { AppRole::User }
    }
}

impl core::fmt::Display for AppRole {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for AppRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| format!("unknown role '{s}'"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claim_parsing_defaults_unknown_to_user() {
        assert_eq!(AppRole::from_claim(None), AppRole::User);
        assert_eq!(AppRole::from_claim(Some("superuser")), AppRole::User);
        assert_eq!(AppRole::from_claim(Some("")), AppRole::User);
        assert_eq!(AppRole::from_claim(Some("member")), AppRole::Member);
        assert_eq!(AppRole::from_claim(Some(" ADMIN ")), AppRole::Admin);
    }

    #[test]
    fn membership_does_not_touch_administrative_roles() {
        assert_eq!(AppRole::User.with_membership(true), AppRole::Member);
        assert_eq!(AppRole::Member.with_membership(false), AppRole::User);
        assert_eq!(AppRole::Staff.with_membership(false), AppRole::Staff);
        assert_eq!(AppRole::Admin.with_membership(true), AppRole::Admin);
    }

    #[test]
    fn serde_uses_uppercase_names() {
        let json = serde_json::to_string(&AppRole::Member).unwrap();
        assert_eq!(json, "\"MEMBER\"");
        let back: AppRole = serde_json::from_str("\"STAFF\"").unwrap();
        assert_eq!(back, AppRole::Staff);
    }
}
