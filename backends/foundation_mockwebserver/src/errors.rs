use derive_more::From;
use std::{error, io};

pub type BoxedError = Box<dyn error::Error + Send + Sync + 'static>;

pub type MockServerResult<T> = std::result::Result<T, MockServerError>;

#[derive(From, Debug)]
pub enum MockServerError {
    /// The listening socket could not be bound; never retried.
    #[from(ignore)]
    Bind(io::Error),

    AlreadyStarted,
    AlreadyStopped,
    NotAQueueDispatcher,
    TlsAfterStart,

    #[from(ignore)]
    Tls(TlsSetupError),

    #[from(ignore)]
    Url(url::ParseError),

    #[from(ignore)]
    IO(io::Error),
}

impl From<io::Error> for MockServerError {
    fn from(value: io::Error) -> Self {
        Self::IO(value)
    }
}

impl From<TlsSetupError> for MockServerError {
    fn from(value: TlsSetupError) -> Self {
        Self::Tls(value)
    }
}

impl From<url::ParseError> for MockServerError {
    fn from(value: url::ParseError) -> Self {
        Self::Url(value)
    }
}

impl error::Error for MockServerError {}

impl core::fmt::Display for MockServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

pub type ProtocolResult<T> = std::result::Result<T, ProtocolError>;

/// Violations of HTTP/1.1 framing by the client. Each one aborts the
/// connection it was observed on and nothing else.
#[derive(From, Debug)]
pub enum ProtocolError {
    #[from(ignore)]
    InvalidRequestLine(String),

    #[from(ignore)]
    InvalidHeaderLine(String),

    #[from(ignore)]
    InvalidChunkSize(String),

    #[from(ignore)]
    InvalidContentLength(String),

    HeaderSectionTooLarge,
    UnsupportedTransferEncoding,
    UnexpectedEof,

    #[from(ignore)]
    IO(io::Error),
}

impl Eq for ProtocolError {}

impl PartialEq for ProtocolError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::IO(m1), Self::IO(m2)) => m1.kind() == m2.kind(),
            (Self::InvalidRequestLine(m1), Self::InvalidRequestLine(m2))
            | (Self::InvalidHeaderLine(m1), Self::InvalidHeaderLine(m2))
            | (Self::InvalidChunkSize(m1), Self::InvalidChunkSize(m2))
            | (Self::InvalidContentLength(m1), Self::InvalidContentLength(m2)) => m1 == m2,
            (Self::HeaderSectionTooLarge, Self::HeaderSectionTooLarge)
            | (Self::UnsupportedTransferEncoding, Self::UnsupportedTransferEncoding)
            | (Self::UnexpectedEof, Self::UnexpectedEof) => true,
            _ => false,
        }
    }
}

impl From<io::Error> for ProtocolError {
    fn from(value: io::Error) -> Self {
        match value.kind() {
            io::ErrorKind::UnexpectedEof => Self::UnexpectedEof,
            _ => Self::IO(value),
        }
    }
}

impl error::Error for ProtocolError {}

impl core::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

pub type DispatchResult<T> = std::result::Result<T, DispatchError>;

#[derive(From, Debug)]
pub enum DispatchError {
    /// Shutdown released a caller that was waiting for a script.
    Aborted,

    #[from(ignore)]
    Failed(BoxedError),
}

impl From<BoxedError> for DispatchError {
    fn from(value: BoxedError) -> Self {
        Self::Failed(value)
    }
}

impl error::Error for DispatchError {}

impl core::fmt::Display for DispatchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum TakeRequestError {
    /// No request arrived before the deadline.
    Timeout,

    /// The log is empty and the server stopped, nothing else will arrive.
    Exhausted,
}

impl error::Error for TakeRequestError {}

impl core::fmt::Display for TakeRequestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

pub type CertificateResult<T> = std::result::Result<T, CertificateError>;

#[derive(From, Debug)]
pub enum CertificateError {
    #[from(ignore)]
    Generation(rcgen::Error),

    #[from(ignore)]
    InvalidName(String),

    InvalidValidity,
}

impl From<rcgen::Error> for CertificateError {
    fn from(value: rcgen::Error) -> Self {
        Self::Generation(value)
    }
}

impl error::Error for CertificateError {}

impl core::fmt::Display for CertificateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

pub type TlsSetupResult<T> = std::result::Result<T, TlsSetupError>;

#[derive(From, Debug)]
pub enum TlsSetupError {
    #[from(ignore)]
    Rustls(rustls::Error),

    #[from(ignore)]
    Pem(rustls::pki_types::pem::Error),

    #[from(ignore)]
    Certificate(CertificateError),
}

impl From<rustls::Error> for TlsSetupError {
    fn from(value: rustls::Error) -> Self {
        Self::Rustls(value)
    }
}

impl From<rustls::pki_types::pem::Error> for TlsSetupError {
    fn from(value: rustls::pki_types::pem::Error) -> Self {
        Self::Pem(value)
    }
}

impl From<CertificateError> for TlsSetupError {
    fn from(value: CertificateError) -> Self {
        Self::Certificate(value)
    }
}

impl error::Error for TlsSetupError {}

impl core::fmt::Display for TlsSetupError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_error_from_eof_io_error() {
        let err: ProtocolError = io::Error::from(io::ErrorKind::UnexpectedEof).into();
        assert_eq!(err, ProtocolError::UnexpectedEof);

        let err: ProtocolError = io::Error::from(io::ErrorKind::ConnectionReset).into();
        assert_eq!(
            err,
            ProtocolError::IO(io::Error::from(io::ErrorKind::ConnectionReset))
        );
    }

    #[test]
    fn test_display_uses_debug_repr() {
        let err = ProtocolError::InvalidChunkSize("G".into());
        assert_eq!(err.to_string(), "InvalidChunkSize(\"G\")");
        assert_eq!(TakeRequestError::Exhausted.to_string(), "Exhausted");
    }
}
