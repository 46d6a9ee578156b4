use miette::Diagnostic;
use thiserror::Error;

use crate::authz::AuthzError;

#[derive(Debug, Error, Diagnostic)]
pub enum AppError {
    #[error("I/O error: {0}")]
    #[diagnostic(code(authzd::io))]
    Io(#[from] std::io::Error),

    #[error("Failed to bind `{addr}`")]
    #[diagnostic(
        code(authzd::bind),
        help("Check server.host and server.port, e.g. 0.0.0.0:8090, and that the port is free")
    )]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Authz(#[from] AuthzError),
}
