use crate::Source;

#[derive(thiserror::Error, Debug)]
pub enum SshError {
    #[error("source should be one of {valid:?}, received '{received}'")]
    InvalidSource {
        valid: Vec<&'static str>,
        received: String,
    },
    #[error("source '{0}' does not support data retrieval")]
    RetrieveUnsupported(Source),
    #[error("groupname should be one of {valid:?}, '{received}' is not valid")]
    InvalidGroup {
        valid: Vec<&'static str>,
        received: String,
    },
    #[error("sscid not found for id {id} in group {group}")]
    SscIdNotFound { id: String, group: String },
    #[error("more than 1 sscid found for id {id} in group {group}:\n{matches}")]
    SscIdAmbiguous {
        id: String,
        group: String,
        matches: String,
    },
    #[error("catalog for source '{0}' does not contain time_min and time_max, no time subsetting possible")]
    MissingTimeExtents(Source),
    #[error("empty catalog provided")]
    EmptyCatalog,
    #[error("a catalog with multiple sources was passed ({0:?}), this is not supported")]
    MixedSources(Vec<Source>),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("file not found: {path}. {hint}")]
    FileNotFound { path: String, hint: String },
    #[error("feature '{feature}' is required to retrieve data from '{source_name}'")]
    FeatureDisabled {
        feature: &'static str,
        source_name: Source,
    },
    #[error("request to {url} failed with status {status}: {body}")]
    HttpStatus {
        url: String,
        status: u16,
        body: String,
    },
    #[error("provider error: {0}")]
    Provider(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("failed to parse {what}: {message}")]
    Parse { what: String, message: String },
    #[error("coordinate transform failed: {0}")]
    Crs(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("zip archive error: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),
    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),
    #[cfg(feature = "netcdf")]
    #[error("NetCDF error: {0}")]
    Netcdf(#[from] netcdf::Error),
    #[error("failed to format time: {0}")]
    TimeFormat(#[from] time::error::Format),
}

impl SshError {
    pub fn parse(what: impl Into<String>, message: impl std::fmt::Display) -> Self {
        SshError::Parse {
            what: what.into(),
            message: message.to_string(),
        }
    }
}

pub type Result<T, E = SshError> = std::result::Result<T, E>;
