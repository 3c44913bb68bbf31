//! Catalog subsetting and bulk retrieval on top of the provider adapters.

use std::path::{Path, PathBuf};

use slog::{error, info, warn, Logger};
use time::OffsetDateTime;

use crate::{
    domains::{provider_for, CatalogOptions, ProviderContext, RetrieveOptions},
    parquet_handler::save_waterlevel,
    Catalog, Result, Source, SshError, Station, StationTimeseries,
};

/// Inclusive longitude/latitude box, defaults to the whole globe
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub lon_min: f64,
    pub lon_max: f64,
    pub lat_min: f64,
    pub lat_max: f64,
}

impl Default for BoundingBox {
    fn default() -> Self {
        BoundingBox {
            lon_min: -180.0,
            lon_max: 180.0,
            lat_min: -90.0,
            lat_max: 90.0,
        }
    }
}

impl BoundingBox {
    pub fn new(lon_min: f64, lon_max: f64, lat_min: f64, lat_max: f64) -> Result<Self> {
        if lon_min >= lon_max || lat_min >= lat_max {
            return Err(SshError::InvalidArgument(format!(
                "bounding box needs min < max, received lon {}..{} lat {}..{}",
                lon_min, lon_max, lat_min, lat_max
            )));
        }
        Ok(BoundingBox {
            lon_min,
            lon_max,
            lat_min,
            lat_max,
        })
    }

    pub fn contains(&self, station: &Station) -> bool {
        let (lon, lat) = (station.longitude(), station.latitude());
        lon >= self.lon_min && lon <= self.lon_max && lat >= self.lat_min && lat <= self.lat_max
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CatalogQuery {
    pub bbox: BoundingBox,
    pub time_min: Option<OffsetDateTime>,
    pub time_max: Option<OffsetDateTime>,
}

impl CatalogQuery {
    pub fn has_time_bounds(&self) -> bool {
        self.time_min.is_some() || self.time_max.is_some()
    }

    /// Station extents overlap the query window; unknown extents never do
    pub fn overlaps(&self, station: &Station) -> bool {
        let (Some(start), Some(end)) = (station.time_min, station.time_max) else {
            return false;
        };
        self.time_max.map_or(true, |max| start < max) && self.time_min.map_or(true, |min| end > min)
    }
}

/// Apply `query` to an already read catalog, sorted by station id
pub fn subset_catalog(
    logger: &Logger,
    mut catalog: Catalog,
    source: Source,
    query: &CatalogQuery,
) -> Result<Catalog> {
    catalog.retain(|station| query.bbox.contains(station));
    catalog.sort_by_station_id();
    if query.has_time_bounds() {
        let unknown = catalog
            .iter()
            .filter(|s| s.time_min.is_none() || s.time_max.is_none())
            .count();
        if unknown > 0 && catalog.iter().all(|s| s.time_min.is_none() && s.time_max.is_none()) {
            return Err(SshError::MissingTimeExtents(source));
        }
        if unknown > 0 {
            warn!(
                logger,
                "dropping {} {} stations with unknown time extents from time subset", unknown, source
            );
        }
        catalog.retain(|station| query.overlaps(station));
    }
    Ok(catalog)
}

pub async fn ssh_catalog_subset(
    ctx: &ProviderContext,
    source: Source,
    query: &CatalogQuery,
    options: &CatalogOptions,
) -> Result<Catalog> {
    let provider = provider_for(source, ctx);
    let mut catalog = provider.read_catalog(options).await?;
    for station in catalog.stations.iter_mut() {
        station.source = source;
    }
    catalog.retain(|station| query.bbox.contains(station));

    if query.has_time_bounds() {
        catalog = provider.complete_time_extents(catalog).await?;
    }
    let catalog = subset_catalog(&ctx.logger, catalog, source, query)?;
    info!(ctx.logger, "{} {} stations in subset", catalog.len(), source);
    Ok(catalog)
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RetrieveSummary {
    pub written: Vec<PathBuf>,
    /// `station_name_unique` of stations without data in the window
    pub nodata: Vec<String>,
}

pub async fn ssh_retrieve_data(
    ctx: &ProviderContext,
    catalog: &Catalog,
    dir_output: &Path,
    time_min: Option<OffsetDateTime>,
    time_max: Option<OffsetDateTime>,
    options: &RetrieveOptions,
) -> Result<RetrieveSummary> {
    let source = catalog.single_source()?;
    if !source.supports_retrieval() {
        return Err(SshError::RetrieveUnsupported(source));
    }
    sealevel_core::create_dir_all(dir_output)?;

    let provider = provider_for(source, ctx);
    let mut summary = RetrieveSummary::default();
    let total = catalog.len();
    for (idx, station) in catalog.iter().enumerate() {
        info!(
            ctx.logger,
            "retrieving data for {} ({}/{})",
            station.station_name_unique,
            idx + 1,
            total
        );
        let series = match provider.retrieve_data(station, time_min, time_max, options).await {
            Ok(Some(series)) if !series.is_empty() => series,
            Ok(_) => {
                warn!(ctx.logger, "[NODATA] {}", station.station_name_unique);
                summary.nodata.push(station.station_name_unique.clone());
                continue;
            }
            Err(e) => {
                error!(ctx.logger, "failed to retrieve {}: {}", station.station_name_unique, e);
                return Err(e);
            }
        };
        let data = StationTimeseries::new(station.clone(), series.into_meters())?;
        summary.written.push(save_waterlevel(&ctx.logger, &data, dir_output)?);
    }
    info!(
        ctx.logger,
        "wrote {} files to {}, {} stations without data",
        summary.written.len(),
        dir_output.display(),
        summary.nodata.len()
    );
    Ok(summary)
}
