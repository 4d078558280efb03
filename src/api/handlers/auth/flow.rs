//! Client-side login flow state machine.
//!
//! The challenge flow is stateless on the server, so the client must hold the
//! submitted credentials between step 1 and step 2. `LoginFlow` makes that
//! explicit: it produces request values and consumes response values, performs
//! no I/O, and never lets pending credentials outlive the flow. A new login
//! while a challenge is outstanding simply restarts the flow with the latest
//! credentials.

use super::types::{TokenRequest, TokenVerifyRequest, TwoFactorChallenge};

/// Credentials held between the challenge and its answer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingCredentials {
    pub email: String,
    pub password: String,
    pub device_name: String,
}

enum State {
    AwaitingCredentials,
    Submitted {
        pending: PendingCredentials,
    },
    AwaitingSecondFactor {
        pending: PendingCredentials,
        challenge: TwoFactorChallenge,
    },
    Completed {
        token: String,
    },
}

pub struct LoginFlow {
    state: State,
}

impl Default for LoginFlow {
    fn default() -> Self {
        Self::new()
    }
}

impl LoginFlow {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: State::AwaitingCredentials,
        }
    }

    /// Start (or restart) the flow. Any previous pending state is discarded.
    pub fn login(&mut self, email: &str, password: &str, device_name: &str) -> TokenRequest {
        self.state = State::Submitted {
            pending: PendingCredentials {
                email: email.to_string(),
                password: password.to_string(),
                device_name: device_name.to_string(),
            },
        };
        TokenRequest {
            email: email.to_string(),
            password: password.to_string(),
            device_name: device_name.to_string(),
            two_factor_code: None,
            recovery_key: None,
            wipe_tokens: false,
        }
    }

    /// Record a challenge response; the flow now waits for a code.
    pub fn on_challenge(&mut self, challenge: TwoFactorChallenge) {
        let pending = match std::mem::replace(&mut self.state, State::AwaitingCredentials) {
            State::Submitted { pending } | State::AwaitingSecondFactor { pending, .. } => {
                Some(pending)
            }
            other => {
                // A challenge without a submission is a protocol error; drop it.
                self.state = other;
                None
            }
        };
        if let Some(pending) = pending {
            self.state = State::AwaitingSecondFactor { pending, challenge };
        }
    }

    /// Build the step-2 request from the held credentials.
    /// Returns `None` unless a challenge is outstanding.
    pub fn submit_code(&self, code: &str, method: Option<&str>) -> Option<TokenVerifyRequest> {
        let State::AwaitingSecondFactor { pending, .. } = &self.state else {
            return None;
        };
        Some(TokenVerifyRequest {
            email: pending.email.clone(),
            password: pending.password.clone(),
            device_name: pending.device_name.clone(),
            code: code.to_string(),
            method: method.map(str::to_string),
        })
    }

    /// Record a minted token; pending credentials are discarded.
    pub fn on_token(&mut self, token: String) {
        self.state = State::Completed { token };
    }

    /// Abandon the flow locally. No server call is needed because the server
    /// holds nothing.
    pub fn cancel(&mut self) {
        self.state = State::AwaitingCredentials;
    }

    #[must_use]
    pub fn awaiting_second_factor(&self) -> bool {
        matches!(self.state, State::AwaitingSecondFactor { .. })
    }

    #[must_use]
    pub fn challenge(&self) -> Option<&TwoFactorChallenge> {
        match &self.state {
            State::AwaitingSecondFactor { challenge, .. } => Some(challenge),
            _ => None,
        }
    }

    #[must_use]
    pub fn token(&self) -> Option<&str> {
        match &self.state {
            State::Completed { token } => Some(token),
            _ => None,
        }
    }

    #[cfg(test)]
    fn pending(&self) -> Option<&PendingCredentials> {
        match &self.state {
            State::Submitted { pending } | State::AwaitingSecondFactor { pending, .. } => {
                Some(pending)
            }
            _ => None,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::super::types::TwoFactorChallenge;
    use super::LoginFlow;

    fn challenge() -> TwoFactorChallenge {
        TwoFactorChallenge::new(vec!["totp".to_string()], "totp".to_string())
    }

    #[test]
    fn direct_login_completes_without_challenge() {
        let mut flow = LoginFlow::new();
        let request = flow.login("curator@example.com", "secret", "phone");
        assert_eq!(request.email, "curator@example.com");
        assert!(request.two_factor_code.is_none());

        flow.on_token("raw-token".to_string());
        assert_eq!(flow.token(), Some("raw-token"));
        assert!(flow.pending().is_none());
    }

    #[test]
    fn challenge_holds_credentials_for_step_two() {
        let mut flow = LoginFlow::new();
        flow.login("curator@example.com", "secret", "phone");
        flow.on_challenge(challenge());
        assert!(flow.awaiting_second_factor());

        let verify = flow.submit_code("123456", None).unwrap();
        assert_eq!(verify.email, "curator@example.com");
        assert_eq!(verify.password, "secret");
        assert_eq!(verify.device_name, "phone");
        assert_eq!(verify.code, "123456");
    }

    #[test]
    fn relogin_during_challenge_replaces_pending_credentials() {
        let mut flow = LoginFlow::new();
        flow.login("first@example.com", "first-pass", "phone");
        flow.on_challenge(challenge());

        flow.login("second@example.com", "second-pass", "tablet");
        flow.on_challenge(challenge());

        let pending = flow.pending().unwrap();
        assert_eq!(pending.email, "second@example.com");
        assert_eq!(pending.password, "second-pass");
        assert_eq!(pending.device_name, "tablet");
    }

    #[test]
    fn cancel_discards_everything_locally() {
        let mut flow = LoginFlow::new();
        flow.login("curator@example.com", "secret", "phone");
        flow.on_challenge(challenge());

        flow.cancel();
        assert!(!flow.awaiting_second_factor());
        assert!(flow.pending().is_none());
        assert!(flow.submit_code("123456", None).is_none());
    }

    #[test]
    fn challenge_without_submission_is_ignored() {
        let mut flow = LoginFlow::new();
        flow.on_challenge(challenge());
        assert!(!flow.awaiting_second_factor());
    }

    #[test]
    fn submit_code_carries_method_hint() {
        let mut flow = LoginFlow::new();
        flow.login("curator@example.com", "secret", "phone");
        flow.on_challenge(challenge());
        let verify = flow.submit_code("123456", Some("email")).unwrap();
        assert_eq!(verify.method.as_deref(), Some("email"));
    }
}
