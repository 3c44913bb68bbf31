use std::{fs::File, io::Write, sync::Arc};

use crate::helpers::{not_found, ok, spawn_context, test_logger, MockHttp, IOC_STATIONS_BODY, UHSLC_META_BODY};
use geo::Point;
use sealevel::{
    domains::{
        gesla3::{DATA_FILE_NAME, META_FILE_NAME},
        ioc::{data_url, station_list_url, ShowAll},
        uhslc::{erddap_url, UhslcDataset, META_URL},
    },
    read_waterlevel, ssh_catalog_subset, ssh_retrieve_data, Catalog, CatalogOptions, CatalogQuery,
    ProviderContext, ProviderSettings, RetrieveOptions, Source, SshError, Station, StationDetails,
};
use time::macros::datetime;
use zip::write::SimpleFileOptions;

fn bare_station(source: Source, id: &str) -> Station {
    Station {
        source,
        station_id: id.to_string(),
        station_name: id.to_string(),
        station_name_unique: format!("{}-{}", source, id),
        country: String::new(),
        location: Point::new(0.0, 0.0),
        time_min: None,
        time_max: None,
        details: StationDetails::None,
    }
}

fn assert_close(actual: Option<f32>, expected: f32) {
    let actual = actual.unwrap();
    assert!((actual - expected).abs() < 1e-5, "{} != {}", actual, expected);
}

#[tokio::test]
async fn ioc_month_is_written_to_parquet() {
    let time_min = datetime!(2020-01-01 0:00 UTC);
    let time_max = datetime!(2020-01-01 2:00 UTC);
    let month_url = data_url("dzao", time_min, datetime!(2020-02-01 0:00 UTC)).unwrap();

    let mut http = MockHttp::new();
    http.expect_send().times(2).returning(move |request| {
        if request.url == station_list_url(ShowAll::Active) {
            ok(IOC_STATIONS_BODY)
        } else if request.url == month_url {
            ok(r#"[
                {"slevel": 1.5, "stime": "2020-01-01 00:00:00", "sensor": "prs"},
                {"slevel": null, "stime": "2020-01-01 01:00:00", "sensor": "prs"},
                {"slevel": 1.7, "stime": "2020-01-01 01:00:00", "sensor": "prs"},
                {"slevel": 2.0, "stime": "2020-01-01 03:00:00", "sensor": "prs"}
            ]"#)
        } else {
            panic!("unexpected request to {}", request.url)
        }
    });
    let test = spawn_context(http);

    let options = CatalogOptions {
        drop_uhslc: false,
        ..Default::default()
    };
    let mut catalog = ssh_catalog_subset(&test.ctx, Source::Ioc, &CatalogQuery::default(), &options)
        .await
        .unwrap();
    catalog.retain(|s| s.station_id == "dzao");

    let out = tempfile::tempdir().unwrap();
    let summary = ssh_retrieve_data(
        &test.ctx,
        &catalog,
        out.path(),
        Some(time_min),
        Some(time_max),
        &RetrieveOptions::default(),
    )
    .await
    .unwrap();
    assert!(summary.nodata.is_empty());
    assert_eq!(summary.written, vec![out.path().join("ioc-dzao-1021.parquet")]);

    let file = read_waterlevel(&summary.written[0]).unwrap();
    assert_eq!(file.station_name, "dzao");
    assert_eq!(file.metadata.get("source").map(String::as_str), Some("ioc"));
    assert_eq!(file.longitude, 45.26);
    assert_eq!(
        file.times,
        vec![datetime!(2020-01-01 0:00 UTC), datetime!(2020-01-01 1:00 UTC)]
    );
    assert_close(file.values[0], 1.5);
    // the later of two records at the same time wins
    assert_close(file.values[1], 1.7);
}

#[tokio::test]
async fn ioc_needs_a_closed_window() {
    let test = spawn_context(MockHttp::new());
    let catalog = Catalog::new(vec![bare_station(Source::Ioc, "abas")]);
    let out = tempfile::tempdir().unwrap();
    let result = ssh_retrieve_data(
        &test.ctx,
        &catalog,
        out.path(),
        Some(datetime!(2020-01-01 0:00 UTC)),
        None,
        &RetrieveOptions::default(),
    )
    .await;
    assert!(matches!(result, Err(SshError::InvalidArgument(_))));
}

#[tokio::test]
async fn uhslc_merges_datasets_and_reports_stations_without_data() {
    let time_min = datetime!(2020-01-01 0:00 UTC);
    let time_max = datetime!(2020-01-02 0:00 UTC);
    let rqds_57 = erddap_url(UhslcDataset::ResearchQuality, "57", Some(time_min), Some(time_max)).unwrap();
    let fast_57 = erddap_url(UhslcDataset::FastDelivery, "57", Some(time_min), Some(time_max)).unwrap();

    let mut http = MockHttp::new();
    http.expect_send().times(5).returning(move |request| {
        if request.url == META_URL {
            ok(UHSLC_META_BODY)
        } else if request.url == rqds_57 {
            ok("time,sea_level\nUTC,millimeters\n2020-01-01T00:00:00Z,1000\n2020-01-01T01:00:00Z,1100\n")
        } else if request.url == fast_57 {
            ok("time,sea_level\nUTC,millimeters\n2020-01-01T01:00:00Z,1111\n2020-01-01T02:00:00Z,1200\n")
        } else {
            not_found()
        }
    });
    let test = spawn_context(http);

    let mut catalog = ssh_catalog_subset(
        &test.ctx,
        Source::Uhslc,
        &CatalogQuery::default(),
        &CatalogOptions::default(),
    )
    .await
    .unwrap();
    catalog.retain(|s| s.station_id != "7");

    let out = tempfile::tempdir().unwrap();
    let summary = ssh_retrieve_data(
        &test.ctx,
        &catalog,
        out.path(),
        Some(time_min),
        Some(time_max),
        &RetrieveOptions::default(),
    )
    .await
    .unwrap();
    assert_eq!(summary.written, vec![out.path().join("uhslc-057.parquet")]);
    assert_eq!(summary.nodata, vec!["uhslc-058".to_string()]);

    let file = read_waterlevel(&summary.written[0]).unwrap();
    assert_eq!(file.times.len(), 3);
    assert_close(file.values[0], 1.0);
    // research quality wins over fast delivery
    assert_close(file.values[1], 1.1);
    assert_close(file.values[2], 1.2);
    assert_eq!(file.metadata.get("waterlevel_units").map(String::as_str), Some("m"));
}

#[tokio::test]
async fn unsupported_and_invalid_catalogs() {
    let test = spawn_context(MockHttp::new());
    let out = tempfile::tempdir().unwrap();
    let retrieve = |catalog: Catalog| {
        let ctx = test.ctx.clone();
        let dir = out.path().to_path_buf();
        async move { ssh_retrieve_data(&ctx, &catalog, &dir, None, None, &RetrieveOptions::default()).await }
    };

    let ssc = Catalog::new(vec![bare_station(Source::Ssc, "SSC-abas")]);
    assert!(matches!(
        retrieve(ssc).await,
        Err(SshError::RetrieveUnsupported(Source::Ssc))
    ));

    let mixed = Catalog::new(vec![bare_station(Source::Ioc, "abas"), bare_station(Source::Uhslc, "57")]);
    assert!(matches!(retrieve(mixed).await, Err(SshError::MixedSources(_))));

    assert!(matches!(retrieve(Catalog::default()).await, Err(SshError::EmptyCatalog)));
}

const GESLA3_META: &str = "\
FILE NAME,SITE NAME,SITE CODE,COUNTRY,NULL VALUE,LATITUDE,LONGITUDE,START DATE/TIME,END DATE/TIME,GAUGE TYPE
aberdeen-p038-uk-bodc,Aberdeen,P038,GBR,-99.9999,57.14,-2.08,1990/01/01 00:00:00,1990/01/01 04:00:00,Coastal
";

const GESLA3_DATA: &str = "\
# SITE NAME Aberdeen
# NULL VALUE -99.9999
1990/01/01 00:00:00     0.5210 1 1
1990/01/01 01:00:00     0.5500 0 1
1990/01/01 02:00:00   -99.9999 1 1
1990/01/01 03:00:00     0.6000 1 1
1990/01/01 04:00:00     0.6500 1 1
";

fn write_gesla3_files(dir: &std::path::Path) {
    std::fs::write(dir.join(META_FILE_NAME), GESLA3_META).unwrap();
    let mut archive = zip::ZipWriter::new(File::create(dir.join(DATA_FILE_NAME)).unwrap());
    archive
        .start_file("aberdeen-p038-uk-bodc", SimpleFileOptions::default())
        .unwrap();
    archive.write_all(GESLA3_DATA.as_bytes()).unwrap();
    archive.finish().unwrap();
}

#[tokio::test]
async fn gesla3_reads_local_archive_and_masks_bad_values() {
    let gesla3_dir = tempfile::tempdir().unwrap();
    write_gesla3_files(gesla3_dir.path());
    let settings = ProviderSettings {
        gesla3_dir: Some(gesla3_dir.path().to_path_buf()),
        cache_dir: gesla3_dir.path().join("cache"),
        ..Default::default()
    };
    let ctx = ProviderContext::new(test_logger(), Arc::new(MockHttp::new()), settings);

    let catalog = ssh_catalog_subset(
        &ctx,
        Source::Gesla3,
        &CatalogQuery {
            time_min: Some(datetime!(1989-01-01 0:00 UTC)),
            ..Default::default()
        },
        &CatalogOptions::default(),
    )
    .await
    .unwrap();
    assert_eq!(catalog.len(), 1);

    let out = tempfile::tempdir().unwrap();
    let summary = ssh_retrieve_data(
        &ctx,
        &catalog,
        out.path(),
        None,
        Some(datetime!(1990-01-01 3:00 UTC)),
        &RetrieveOptions::default(),
    )
    .await
    .unwrap();
    let file = read_waterlevel(&summary.written[0]).unwrap();
    assert_eq!(file.times.len(), 4);
    assert_close(file.values[0], 0.521);
    assert_eq!(file.values[1], None);
    assert_eq!(file.values[2], None);
    assert_close(file.values[3], 0.6);
}

#[tokio::test]
async fn gesla3_without_local_files_explains_where_to_get_them() {
    let empty = tempfile::tempdir().unwrap();
    let settings = ProviderSettings {
        gesla3_dir: Some(empty.path().to_path_buf()),
        ..Default::default()
    };
    let ctx = ProviderContext::new(test_logger(), Arc::new(MockHttp::new()), settings);
    let result = ssh_catalog_subset(&ctx, Source::Gesla3, &CatalogQuery::default(), &CatalogOptions::default()).await;
    assert!(matches!(result, Err(SshError::FileNotFound { .. })));
}
