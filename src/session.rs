use std::fmt;
use std::sync::{Arc, RwLock};

/// Supplies the bearer credential attached to every remote call.
///
/// Token storage, refresh and redirect-to-login live with the implementor;
/// the sync layer only reads the current token and reports rejections.
pub trait CredentialProvider: Send + Sync {
    fn bearer_token(&self) -> Option<String>;

    /// Called once per remote call that failed because the credential was
    /// rejected.
    fn credential_rejected(&self) {}
}

/// Credential holder for callers that manage the token themselves.
#[derive(Default)]
pub struct StaticCredentials {
    token: RwLock<Option<String>>,
    rejections: RwLock<u32>,
}

impl StaticCredentials {
    pub fn new(token: Option<String>) -> Self {
        Self {
            token: RwLock::new(token),
            rejections: RwLock::new(0),
        }
    }

    pub fn set_token(&self, token: Option<String>) {
        if let Ok(mut guard) = self.token.write() {
            *guard = token;
        }
    }

    /// How many times a remote call reported this credential as rejected.
    pub fn rejections(&self) -> u32 {
        self.rejections.read().map(|count| *count).unwrap_or(0)
    }
}

impl CredentialProvider for StaticCredentials {
    fn bearer_token(&self) -> Option<String> {
        self.token.read().ok().and_then(|guard| guard.clone())
    }

    fn credential_rejected(&self) {
        if let Ok(mut count) = self.rejections.write() {
            *count += 1;
        }
        log::warn!("Remote store rejected the session credential");
    }
}

/// Explicit session context handed to every remote-call boundary.
#[derive(Clone)]
pub struct Session {
    credentials: Arc<dyn CredentialProvider>,
}

impl Session {
    pub fn new(credentials: Arc<dyn CredentialProvider>) -> Self {
        Self { credentials }
    }

    /// Session with a fixed token, or none.
    pub fn with_token(token: Option<String>) -> Self {
        Self::new(Arc::new(StaticCredentials::new(token)))
    }

    pub fn anonymous() -> Self {
        Self::with_token(None)
    }

    pub fn bearer_token(&self) -> Option<String> {
        self.credentials.bearer_token()
    }

    pub fn report_rejected(&self) {
        self.credentials.credential_rejected();
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("authenticated", &self.bearer_token().is_some())
            .finish()
    }
}
