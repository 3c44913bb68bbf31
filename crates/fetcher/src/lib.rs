mod crs;
mod dispatch;
pub mod domains;
mod error;
mod export;
mod http;
mod linkage;
mod names;
mod overview;
mod parquet_handler;
mod station;
mod timeseries;
mod timeutil;
mod utils;

pub use crs::*;
pub use dispatch::*;
pub use domains::{
    provider_for, CatalogOptions, ProviderContext, ProviderSettings, RetrieveOptions, SshProvider,
};
pub use error::*;
pub use export::*;
pub use http::*;
pub use linkage::*;
pub use names::*;
pub use overview::*;
pub use parquet_handler::*;
pub use station::*;
pub use timeseries::*;
pub use timeutil::*;
pub use utils::*;
