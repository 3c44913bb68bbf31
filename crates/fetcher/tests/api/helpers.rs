use std::sync::Arc;

use async_trait::async_trait;
use mockall::mock;
use sealevel::{HttpRequest, HttpResponse, HttpSource, ProviderContext, ProviderSettings};
use slog::{o, Discard, Logger};
use tempfile::TempDir;

mock! {
    pub Http {}
    #[async_trait]
    impl HttpSource for Http {
        async fn send(&self, request: HttpRequest) -> sealevel::Result<HttpResponse>;
    }
}

pub struct TestContext {
    pub ctx: ProviderContext,
    // keeps the cache directory alive for the duration of the test
    pub cache: TempDir,
}

pub fn test_logger() -> Logger {
    Logger::root(Discard, o!())
}

pub fn spawn_context(http: MockHttp) -> TestContext {
    let cache = tempfile::tempdir().unwrap();
    let settings = ProviderSettings {
        cache_dir: cache.path().to_path_buf(),
        ..Default::default()
    };
    TestContext {
        ctx: ProviderContext::new(test_logger(), Arc::new(http), settings),
        cache,
    }
}

pub fn ok(body: &str) -> sealevel::Result<HttpResponse> {
    Ok(HttpResponse::new(200, body.to_string()))
}

pub fn not_found() -> sealevel::Result<HttpResponse> {
    Ok(HttpResponse::new(404, "Not Found"))
}

pub const SSC_BODY: &str = r#"[
    {"ssc_id": "SSC-abas", "name": "Abashiri", "country": "JP", "geo:lat": 44.02, "geo:lon": 144.28,
     "ioc": "abas", "uhslc": 347},
    {"ssc_id": "SSC-dzaou", "name": "Dzaoudzi", "country": "YT", "geo:lat": -12.78, "geo:lon": 45.26,
     "ioc": "dzao", "uhslc": null}
]"#;

pub const IOC_STATIONS_BODY: &str = r#"[
    {"Code": "abas", "code": 347, "Location": "Abashiri", "country": "JPN",
     "lat": 44.02, "lon": 144.28, "UTCOffset": 0,
     "date_created": "2009-09-08 13:51:12", "lasttime": "2024-05-01 10:00:00"},
    {"Code": "dzao", "code": 1021, "Location": "Dzaoudzi", "country": "FRA",
     "lat": -12.78, "lon": 45.26, "UTCOffset": 0,
     "date_created": "2011-01-01 00:00:00", "lasttime": "2024-05-01 10:00:00"},
    {"Code": "dart1", "code": 9, "Location": "DART 21413", "country": "USA",
     "lat": 30.5, "lon": 152.1, "UTCOffset": 0},
    {"Code": "kush", "code": 400, "Location": "Kushiro", "country": "JPN",
     "lat": 42.97, "lon": 144.37, "UTCOffset": 9}
]"#;

pub const UHSLC_META_BODY: &str = r#"{"type": "FeatureCollection", "features": [
    {"type": "Feature", "geometry": {"type": "Point", "coordinates": [314.463, -7.9]},
     "properties": {"uhslc_id": 7, "name": "Sao Tome", "country": "Brazil",
        "rq_span": {"oldest": "1980-01-01T00:00:00Z", "latest": "2020-12-31T23:00:00Z"}}},
    {"type": "Feature", "geometry": {"type": "Point", "coordinates": [4.5, 52.0]},
     "properties": {"uhslc_id": 57, "name": "Hoek", "country": "Netherlands",
        "fd_span": {"oldest": "1990-01-01T00:00:00Z", "latest": "2024-01-01T00:00:00Z"}}},
    {"type": "Feature", "geometry": {"type": "Point", "coordinates": [5.0, 53.0]},
     "properties": {"uhslc_id": 58, "name": "Old", "country": "Netherlands",
        "rq_span": {"oldest": "1950-01-01T00:00:00Z", "latest": "1960-01-01T00:00:00Z"}}}
]}"#;
