//! User rows and two-factor capability helpers.
//!
//! A `Principal` is a user row loaded for authentication. The capability
//! helpers decide which second factors are live for the account; they are the
//! single source of truth the gate, the challenge payload, and the status
//! endpoint all consult.

use uuid::Uuid;

/// Preferred second-factor method stored on the account.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PreferredMethod {
    Totp,
    Email,
    Both,
}

impl PreferredMethod {
    pub(super) fn from_column(value: &str) -> Self {
        match value {
            "email" => Self::Email,
            "both" => Self::Both,
            _ => Self::Totp,
        }
    }

    pub(super) fn as_str(self) -> &'static str {
        match self {
            Self::Totp => "totp",
            Self::Email => "email",
            Self::Both => "both",
        }
    }
}

/// Account status stored on the user row.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AccountStatus {
    Active,
    Disabled,
}

impl AccountStatus {
    pub(super) fn from_column(value: &str) -> Self {
        // Unknown values fail closed.
        match value {
            "active" => Self::Active,
            _ => Self::Disabled,
        }
    }
}

/// A user row loaded for authentication.
#[derive(Clone, Debug)]
pub struct Principal {
    pub user_id: Uuid,
    pub email: String,
    pub name: String,
    pub password_hash: String,
    /// Sealed TOTP secret, `None` until enrollment.
    pub totp_secret_sealed: Option<Vec<u8>>,
    /// Set once the user has confirmed their authenticator app.
    pub totp_confirmed: bool,
    pub email_2fa_enabled: bool,
    pub preferred_method: PreferredMethod,
    pub status: AccountStatus,
}

impl Principal {
    /// Disabled accounts cannot authenticate at all.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status == AccountStatus::Active
    }

    /// TOTP counts only when a secret is stored and enrollment was confirmed.
    #[must_use]
    pub fn can_use_totp(&self) -> bool {
        self.totp_secret_sealed.is_some()
            && self.totp_confirmed
            && matches!(
                self.preferred_method,
                PreferredMethod::Totp | PreferredMethod::Both
            )
    }

    #[must_use]
    pub fn can_use_email(&self) -> bool {
        self.email_2fa_enabled
            && matches!(
                self.preferred_method,
                PreferredMethod::Email | PreferredMethod::Both
            )
    }

    /// Whether login must pass the two-factor gate.
    #[must_use]
    pub fn requires_two_factor(&self) -> bool {
        self.can_use_totp() || self.can_use_email()
    }

    /// Methods the account can satisfy the gate with, in challenge order.
    #[must_use]
    pub fn available_methods(&self) -> Vec<&'static str> {
        let mut methods = Vec::with_capacity(2);
        if self.can_use_totp() {
            methods.push("totp");
        }
        if self.can_use_email() {
            methods.push("email");
        }
        methods
    }

    /// The method a client should prompt for first.
    #[must_use]
    pub fn primary_method(&self) -> Option<&'static str> {
        if self.can_use_totp() {
            Some("totp")
        } else if self.can_use_email() {
            Some("email")
        } else {
            None
        }
    }
}

#[cfg(test)]
pub(super) mod tests {
    use super::{AccountStatus, PreferredMethod, Principal};
    use uuid::Uuid;

    pub(in super::super) fn principal(
        preferred: PreferredMethod,
        totp_enrolled: bool,
        email_enabled: bool,
    ) -> Principal {
        Principal {
            user_id: Uuid::new_v4(),
            email: "curator@example.com".to_string(),
            name: "Curator".to_string(),
            password_hash: String::new(),
            totp_secret_sealed: totp_enrolled.then(|| vec![0u8; 32]),
            totp_confirmed: totp_enrolled,
            email_2fa_enabled: email_enabled,
            preferred_method: preferred,
            status: AccountStatus::Active,
        }
    }

    #[test]
    fn no_factors_means_no_gate() {
        let user = principal(PreferredMethod::Totp, false, false);
        assert!(!user.requires_two_factor());
        assert!(user.available_methods().is_empty());
        assert_eq!(user.primary_method(), None);
    }

    #[test]
    fn unconfirmed_totp_does_not_count() {
        let mut user = principal(PreferredMethod::Totp, true, false);
        user.totp_confirmed = false;
        assert!(!user.can_use_totp());
        assert!(!user.requires_two_factor());
    }

    #[test]
    fn preferred_method_filters_capabilities() {
        let user = principal(PreferredMethod::Email, true, true);
        assert!(!user.can_use_totp());
        assert!(user.can_use_email());
        assert_eq!(user.available_methods(), vec!["email"]);
        assert_eq!(user.primary_method(), Some("email"));
    }

    #[test]
    fn both_lists_totp_first() {
        let user = principal(PreferredMethod::Both, true, true);
        assert_eq!(user.available_methods(), vec!["totp", "email"]);
        assert_eq!(user.primary_method(), Some("totp"));
    }

    #[test]
    fn preferred_email_without_enablement_is_inert() {
        let user = principal(PreferredMethod::Email, true, false);
        assert!(!user.requires_two_factor());
    }

    #[test]
    fn unknown_status_fails_closed() {
        assert_eq!(AccountStatus::from_column("active"), AccountStatus::Active);
        assert_eq!(
            AccountStatus::from_column("disabled"),
            AccountStatus::Disabled
        );
        assert_eq!(
            AccountStatus::from_column("suspended"),
            AccountStatus::Disabled
        );

        let mut user = principal(PreferredMethod::Totp, false, false);
        assert!(user.is_active());
        user.status = AccountStatus::Disabled;
        assert!(!user.is_active());
    }

    #[test]
    fn preferred_method_column_round_trip() {
        assert_eq!(PreferredMethod::from_column("email"), PreferredMethod::Email);
        assert_eq!(PreferredMethod::from_column("both"), PreferredMethod::Both);
        assert_eq!(PreferredMethod::from_column("totp"), PreferredMethod::Totp);
        assert_eq!(
            PreferredMethod::from_column("unexpected"),
            PreferredMethod::Totp
        );
        assert_eq!(PreferredMethod::Both.as_str(), "both");
    }
}
