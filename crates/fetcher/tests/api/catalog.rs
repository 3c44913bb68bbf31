use crate::helpers::{ok, spawn_context, MockHttp, IOC_STATIONS_BODY, SSC_BODY, UHSLC_META_BODY};
use sealevel::{
    domains::{
        ioc::{station_list_url, ShowAll},
        ssc::SSC_URL,
        uhslc::META_URL,
    },
    ssh_catalog_subset, BoundingBox, CatalogOptions, CatalogQuery, Source, SshError,
};
use time::macros::datetime;

fn ids(catalog: &sealevel::Catalog) -> Vec<&str> {
    catalog.iter().map(|s| s.station_id.as_str()).collect()
}

#[tokio::test]
async fn uhslc_subset_by_bbox_and_time() {
    let mut http = MockHttp::new();
    http.expect_send()
        .times(2)
        .withf(|request| request.url == META_URL)
        .returning(|_| ok(UHSLC_META_BODY));
    let test = spawn_context(http);

    let everything = ssh_catalog_subset(
        &test.ctx,
        Source::Uhslc,
        &CatalogQuery::default(),
        &CatalogOptions::default(),
    )
    .await
    .unwrap();
    assert_eq!(ids(&everything), vec!["7", "57", "58"]);
    assert_eq!(everything.get("7").unwrap().longitude(), -45.537);

    let query = CatalogQuery {
        bbox: BoundingBox::new(0.0, 10.0, 50.0, 55.0).unwrap(),
        time_min: Some(datetime!(2000-01-01 0:00 UTC)),
        time_max: None,
    };
    let subset = ssh_catalog_subset(&test.ctx, Source::Uhslc, &query, &CatalogOptions::default())
        .await
        .unwrap();
    assert_eq!(ids(&subset), vec!["57"]);
    assert_eq!(subset.stations[0].station_name_unique, "uhslc-057");
}

#[tokio::test]
async fn ioc_drops_uhslc_dart_and_nonutc_stations() {
    let mut http = MockHttp::new();
    http.expect_send().times(3).returning(|request| {
        if request.url == SSC_URL {
            ok(SSC_BODY)
        } else if request.url == station_list_url(ShowAll::Active) {
            ok(IOC_STATIONS_BODY)
        } else {
            panic!("unexpected request to {}", request.url)
        }
    });
    let test = spawn_context(http);

    let filtered = ssh_catalog_subset(
        &test.ctx,
        Source::Ioc,
        &CatalogQuery::default(),
        &CatalogOptions::default(),
    )
    .await
    .unwrap();
    assert_eq!(ids(&filtered), vec!["dzao"]);
    assert_eq!(filtered.stations[0].station_name_unique, "ioc-dzao-1021");

    let options = CatalogOptions {
        drop_uhslc: false,
        drop_dart: false,
        drop_nonutc: false,
        ..Default::default()
    };
    let all = ssh_catalog_subset(&test.ctx, Source::Ioc, &CatalogQuery::default(), &options)
        .await
        .unwrap();
    assert_eq!(all.len(), 4);
    assert_eq!(all.sources(), vec![Source::Ioc]);
}

#[tokio::test]
async fn ssc_cannot_be_subset_in_time() {
    let mut http = MockHttp::new();
    http.expect_send()
        .times(1)
        .withf(|request| request.url == SSC_URL)
        .returning(|_| ok(SSC_BODY));
    let test = spawn_context(http);

    let query = CatalogQuery {
        time_max: Some(datetime!(2020-01-01 0:00 UTC)),
        ..Default::default()
    };
    let result = ssh_catalog_subset(&test.ctx, Source::Ssc, &query, &CatalogOptions::default()).await;
    assert!(matches!(result, Err(SshError::MissingTimeExtents(Source::Ssc))));
}

#[tokio::test]
async fn service_failure_is_an_error() {
    let mut http = MockHttp::new();
    http.expect_send()
        .times(1)
        .returning(|_| Ok(sealevel::HttpResponse::new(503, "maintenance")));
    let test = spawn_context(http);

    let result = ssh_catalog_subset(
        &test.ctx,
        Source::Uhslc,
        &CatalogQuery::default(),
        &CatalogOptions::default(),
    )
    .await;
    assert!(matches!(result, Err(SshError::HttpStatus { status: 503, .. })));
}
