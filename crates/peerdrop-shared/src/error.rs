use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Frame was not valid JSON or did not match any known message.
    /// Bad base64 in payload content lands here too.
    #[error("Malformed message: {0}")]
    Malformed(#[from] serde_json::Error),
}
