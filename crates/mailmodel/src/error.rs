use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum MailModelError {
    #[error("invalid header: {0}")]
    HeaderParse(String),
    #[error("invalid body: {0}")]
    BodyParse(String),
    #[error("invalid date: {0}")]
    ChronoError(String),
    #[error("invalid Content-Transfer-Encoding: {0}")]
    InvalidContentTransferEncoding(String),
    #[error("cannot decode the body of a multipart message; decode the parts instead")]
    MultipartBodyDecode,
    #[error("multipart message is missing its boundary parameter")]
    MissingBoundary,
    #[error("a multipart container can hold at most 255 immediate children")]
    TooManyParts,
    #[error("i/o error writing message")]
    WriteMessageIOError,
    #[error("invalid delivery status report: {0}")]
    DeliveryStatusParse(String),
    #[error("unable to read {0}")]
    FileRead(String),
    #[error("builder: {0}")]
    BuildError(&'static str),
}
