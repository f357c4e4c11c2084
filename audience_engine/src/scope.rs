// Profile-service scope lookup.
//
// Every audience operation runs against one scope: a service application
// (optionally narrowed to a tenant subscription) or whatever scope a site
// is bound to. Resolution itself belongs to the host; `ScopeRegistry` is the
// in-memory stand-in.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::directory::AudienceDirectory;
use crate::error::{AudienceError, Result};

/// How a caller names a profile-service scope
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ScopeLocator {
    ServiceApplication {
        application: String,
        subscription: Option<String>,
    },
    Site(String),
}

impl ScopeLocator {
    pub fn service_application(application: impl Into<String>) -> Self {
        ScopeLocator::ServiceApplication {
            application: application.into(),
            subscription: None,
        }
    }

    pub fn tenant(application: impl Into<String>, subscription: impl Into<String>) -> Self {
        ScopeLocator::ServiceApplication {
            application: application.into(),
            subscription: Some(subscription.into()),
        }
    }

    pub fn site(url: impl Into<String>) -> Self {
        ScopeLocator::Site(url.into())
    }

    /// Lookup key: identifiers compare case-insensitively and site URLs
    /// ignore a trailing slash.
    fn key(&self) -> ScopeLocator {
        match self {
            ScopeLocator::ServiceApplication {
                application,
                subscription,
            } => ScopeLocator::ServiceApplication {
                application: application.to_lowercase(),
                subscription: subscription.as_ref().map(|s| s.to_lowercase()),
            },
            ScopeLocator::Site(url) => ScopeLocator::Site(url.trim_end_matches('/').to_lowercase()),
        }
    }
}

impl std::fmt::Display for ScopeLocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScopeLocator::ServiceApplication {
                application,
                subscription: Some(subscription),
            } => write!(f, "{} (subscription {})", application, subscription),
            ScopeLocator::ServiceApplication { application, .. } => write!(f, "{}", application),
            ScopeLocator::Site(url) => write!(f, "site {}", url),
        }
    }
}

/// Resolves a locator to the directory backing that scope.
pub trait ScopeResolver: Send + Sync {
    fn resolve(&self, locator: &ScopeLocator) -> Result<Arc<dyn AudienceDirectory>>;
}

/// In-memory resolver
#[derive(Default)]
pub struct ScopeRegistry {
    scopes: RwLock<HashMap<ScopeLocator, Arc<dyn AudienceDirectory>>>,
}

impl ScopeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds a locator to a directory, replacing any previous binding.
    pub fn register(&self, locator: ScopeLocator, directory: Arc<dyn AudienceDirectory>) {
        self.scopes.write().insert(locator.key(), directory);
    }
}

impl ScopeResolver for ScopeRegistry {
    fn resolve(&self, locator: &ScopeLocator) -> Result<Arc<dyn AudienceDirectory>> {
        self.scopes
            .read()
            .get(&locator.key())
            .cloned()
            .ok_or_else(|| AudienceError::ScopeNotFound(locator.to_string()))
    }
}
