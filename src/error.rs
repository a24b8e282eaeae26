use derive_more::From;
use k8s_openapi::serde_json;

pub type Result<T> = core::result::Result<T, Error>;

#[derive(Debug, From)]
pub enum Error {
    #[from]
    Json(serde_json::Error),

    #[from]
    Kube(kube::Error),

    #[from]
    Infer(kube::config::InferConfigError),

    #[from]
    Http(reqwest::Error),

    #[from]
    Tls(rustls::Error),

    #[from]
    Io(std::io::Error),

    /// TLS mode name that has no matching configuration
    UnknownTlsMode(String),

    /// Border client type with no registered implementation
    UnknownClientType(String),

    /// PEM or DER material that could not be parsed
    Certificate(String),

    /// A TLS mode needs material that was not supplied
    MissingCertificate(&'static str),

    /// Non-success answer from the NGINX Plus API
    NginxApi { status: u16, message: String },

    /// Server address absent from the upstream it should be removed from
    ServerNotFound { upstream: String, server: String },

    /// Resource could not be turned into server updates
    Translation(String),

    /// Custom error message
    Custom(String),
}

impl From<crate::border::UnknownClientType> for Error {
    fn from(err: crate::border::UnknownClientType) -> Self {
        Self::UnknownClientType(err.client_type().to_string())
    }
}

impl core::fmt::Display for Error {
    fn fmt(&self, fmt: &mut core::fmt::Formatter) -> core::result::Result<(), core::fmt::Error> {
        write!(fmt, "{self:?}")
    }
}

impl std::error::Error for Error {}
