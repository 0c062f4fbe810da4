// Endpoint classification
// Decides which URLs belong to the protected API surface

use url::Url;

/// Path fragments that never receive credentials
pub const DEFAULT_PUBLIC_ENDPOINTS: &[&str] = &[
    "/auth/login",
    "/auth/register",
    "/auth/send-otp",
    "/auth/verify-otp",
    "/auth/forgot-password",
    "/auth/reset-password",
    "/auth/refresh-token",
    "/public/",
];

/// Where a request is headed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointKind {
    /// Outside the API origin; passed through untouched
    External,
    /// On the API but listed as public
    Public,
    /// On the API and requires a bearer token
    Protected,
}

/// Origin and base path of the marketplace API
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiOrigin {
    base: Url,
    base_path: String,
}

impl ApiOrigin {
    pub fn new(base: Url) -> Self {
        let base_path = base.path().trim_end_matches('/').to_string();
        Self { base, base_path }
    }

    pub fn parse(base: &str) -> Result<Self, url::ParseError> {
        Url::parse(base).map(Self::new)
    }

    pub fn as_url(&self) -> &Url {
        &self.base
    }

    /// Whether `url` targets this origin under the base path
    pub fn contains(&self, url: &Url) -> bool {
        if url.scheme() != self.base.scheme()
            || url.host_str() != self.base.host_str()
            || url.port_or_known_default() != self.base.port_or_known_default()
        {
            return false;
        }

        match url.path().strip_prefix(self.base_path.as_str()) {
            Some(rest) => rest.is_empty() || rest.starts_with('/'),
            None => false,
        }
    }

    /// Resolve an API-relative path such as `orders/42` or `/orders/42`
    pub fn join(&self, path: &str) -> Url {
        let mut url = self.base.clone();
        url.set_query(None);
        url.set_fragment(None);
        let joined = format!("{}/{}", self.base_path, path.trim_start_matches('/'));
        match joined.split_once('?') {
            Some((path, query)) => {
                url.set_path(path);
                url.set_query(Some(query));
            }
            None => url.set_path(&joined),
        }
        url
    }
}

/// Pure classifier over the API origin and the public allow-list
#[derive(Debug, Clone)]
pub struct EndpointClassifier {
    origin: ApiOrigin,
    public_patterns: Vec<String>,
}

impl EndpointClassifier {
    pub fn new<I, S>(origin: ApiOrigin, public_patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            origin,
            public_patterns: public_patterns.into_iter().map(Into::into).collect(),
        }
    }

    pub fn with_defaults(origin: ApiOrigin) -> Self {
        Self::new(origin, DEFAULT_PUBLIC_ENDPOINTS.iter().copied())
    }

    pub fn origin(&self) -> &ApiOrigin {
        &self.origin
    }

    pub fn is_api(&self, url: &Url) -> bool {
        self.origin.contains(url)
    }

    /// Public means on the API and matching the allow-list; external URLs are not public
    pub fn is_public(&self, url: &Url) -> bool {
        self.is_api(url) && self.matches_public(url)
    }

    pub fn classify(&self, url: &Url) -> EndpointKind {
        if !self.is_api(url) {
            EndpointKind::External
        } else if self.matches_public(url) {
            EndpointKind::Public
        } else {
            EndpointKind::Protected
        }
    }

    /// Classify a raw URL string; anything unparseable is treated as external
    pub fn classify_str(&self, url: &str) -> EndpointKind {
        Url::parse(url)
            .map(|u| self.classify(&u))
            .unwrap_or(EndpointKind::External)
    }

    fn matches_public(&self, url: &Url) -> bool {
        let path = url.path();
        self.public_patterns
            .iter()
            .any(|pattern| path.contains(pattern.as_str()))
    }
}
