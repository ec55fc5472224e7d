#![forbid(unsafe_code)]

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    Message(String),
    #[error("unable to reach the following service endpoints from the discovery VPC: {}", services.join(", "))]
    VpcConfigurationValidation { services: Vec<String> },
    #[error("another discovery task is already running against this environment")]
    DiscoveryAlreadyRunning,
    #[error("configuration aggregator `{aggregator}` was not found")]
    AggregatorNotFound { aggregator: String },
    #[error("configuration aggregator `{aggregator}` is not backed by an organization aggregation source")]
    OrgAggregatorValidation { aggregator: String },
    #[error("access denied calling {service}:{action}{}", context_suffix(account_id.as_deref(), region.as_deref()))]
    AccessDenied {
        service: String,
        action: String,
        account_id: Option<String>,
        region: Option<String>,
    },
    #[error("{service}:{action} failed with {code}: {message}")]
    ProviderApi {
        service: String,
        action: String,
        code: String,
        message: String,
    },
    #[error("search index left {} resource(s) unprocessed", ids.len())]
    UnprocessedSearchIndexResources { ids: Vec<String> },
    #[error("graph store rejected the request payload as too large")]
    PayloadTooLarge,
    #[error("graph store connection closed prematurely")]
    ConnectionClosedPrematurely,
    #[error("graph store resolver code size exceeded")]
    ResolverCodeSize,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("task join error: {0}")]
    Join(#[from] tokio::task::JoinError),
    #[error("HTTP request error: {0}")]
    Reqwest(#[from] reqwest::Error),
    #[error("JSON error: {0}")]
    SerdeJson(#[from] serde_json::Error),
    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),
    #[error("configuration error: {0}")]
    Config(#[from] ::config::ConfigError),
    #[error("{context}")]
    Context {
        context: String,
        #[source]
        source: Box<Error>,
    },
}

fn context_suffix(account_id: Option<&str>, region: Option<&str>) -> String {
    match (account_id, region) {
        (Some(account), Some(region)) => format!(" in {account}/{region}"),
        (Some(account), None) => format!(" in {account}"),
        (None, Some(region)) => format!(" in {region}"),
        (None, None) => String::new(),
    }
}

impl Error {
    pub fn new<E>(error: E) -> Self
    where
        Error: From<E>,
    {
        error.into()
    }

    pub fn msg<M>(message: M) -> Self
    where
        M: Into<String>,
    {
        Self::Message(message.into())
    }

    pub fn access_denied(service: &str, action: &str) -> Self {
        Self::AccessDenied {
            service: service.to_string(),
            action: action.to_string(),
            account_id: None,
            region: None,
        }
    }

    pub fn with_context<M>(context: M, source: Error) -> Self
    where
        M: Into<String>,
    {
        Self::Context {
            context: context.into(),
            source: Box::new(source),
        }
    }

    /// Walks `Context` wrappers down to the first concrete error kind.
    pub fn root(&self) -> &Error {
        match self {
            Error::Context { source, .. } => source.root(),
            other => other,
        }
    }

    pub fn is_access_denied(&self) -> bool {
        matches!(self.root(), Error::AccessDenied { .. })
    }

    pub fn is_payload_too_large(&self) -> bool {
        matches!(self.root(), Error::PayloadTooLarge)
    }

    pub fn is_connection_closed(&self) -> bool {
        matches!(self.root(), Error::ConnectionClosedPrematurely)
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self.root(), Error::ProviderApi { code, .. } if code.contains("NotFound"))
    }
}

pub trait Context<T> {
    fn context<C>(self, context: C) -> Result<T>
    where
        C: Into<String>;

    fn with_context<C, F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> C,
        C: Into<String>;
}

impl<T, E> Context<T> for std::result::Result<T, E>
where
    Error: From<E>,
{
    fn context<C>(self, context: C) -> Result<T>
    where
        C: Into<String>,
    {
        self.map_err(|err| Error::with_context(context.into(), err.into()))
    }

    fn with_context<C, F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> C,
        C: Into<String>,
    {
        self.map_err(|err| Error::with_context(f().into(), err.into()))
    }
}

impl From<String> for Error {
    fn from(value: String) -> Self {
        Error::Message(value)
    }
}

impl From<&str> for Error {
    fn from(value: &str) -> Self {
        Error::Message(value.to_string())
    }
}

#[macro_export]
macro_rules! err {
    ($fmt:literal $(, $arg:expr)* $(,)?) => {{
        $crate::error::Error::msg(format!($fmt $(, $arg)*))
    }};
    ($err:expr) => {{
        $crate::error::Error::new($err)
    }};
}

#[macro_export]
macro_rules! bail_err {
    ($($arg:tt)*) => {{
        return Err($crate::err!($($arg)*));
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_wrapping_preserves_root_kind() {
        let err = Error::with_context(
            "during preflight",
            Error::access_denied("config", "DescribeConfigurationRecorders"),
        );
        assert!(err.is_access_denied());
        assert!(err.to_string().contains("during preflight"));
    }

    #[test]
    fn vpc_validation_lists_offending_services() {
        let err = Error::VpcConfigurationValidation {
            services: vec!["sts".to_string(), "config".to_string()],
        };
        assert!(err.to_string().contains("sts, config"));
    }
}
