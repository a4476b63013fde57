//! STAC client and live-source tests against a local mock server.
//!
//! Tests marked `#[ignore]` need network access to Planetary Computer.
//! Run with: `cargo test -p lcexport-cloud -- --ignored`

use std::time::Duration;

use httpmock::prelude::*;
use serde_json::{json, Value};

use lcexport_cloud::cog::CogReaderOptions;
use lcexport_cloud::export::{run_export, ExportOptions, YearRange};
use lcexport_cloud::stac_client::{StacCatalog, StacClient, StacClientOptions};
use lcexport_cloud::stac_models::StacSearchParams;
use lcexport_cloud::StacSource;
use lcexport_core::io::write_geotiff_to_buffer;
use lcexport_core::{Aoi, GeoTransform, Raster, CRS};

fn options(server: &MockServer) -> StacClientOptions {
    StacClientOptions {
        request_timeout: Duration::from_secs(5),
        max_retries: 1,
        retry_base: Duration::from_millis(1),
        sas_endpoint: server.url("/sas"),
        ..Default::default()
    }
}

fn feature(id: &str, year: i32, href: &str) -> Value {
    json!({
        "type": "Feature",
        "id": id,
        "collection": "io-lulc-annual-v02",
        "bbox": [134.9, -15.5, 135.5, -14.5],
        "properties": {
            "datetime": null,
            "start_datetime": format!("{year}-01-01T00:00:00Z"),
            "end_datetime": format!("{}-01-01T00:00:00Z", year + 1),
            "proj:code": "EPSG:32753"
        },
        "assets": { "data": { "href": href, "type": "image/tiff; application=geotiff; profile=cloud-optimized" } }
    })
}

#[tokio::test]
async fn search_all_follows_post_pagination() {
    let server = MockServer::start_async().await;
    let page2 = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/search/next")
                .json_body_partial(r#"{"token": "page2", "collections": ["io-lulc-annual-v02"]}"#);
            then.status(200).json_body(json!({
                "type": "FeatureCollection",
                "features": [feature("53L-2018", 2018, "https://x/b.tif")],
                "links": []
            }));
        })
        .await;
    let page1 = server
        .mock_async(|when, then| {
            when.method(POST).path("/search");
            then.status(200).json_body(json!({
                "type": "FeatureCollection",
                "features": [feature("53L-2017", 2017, "https://x/a.tif")],
                "links": [{
                    "rel": "next",
                    "href": server.url("/search/next"),
                    "method": "POST",
                    "body": { "token": "page2" },
                    "merge": true
                }]
            }));
        })
        .await;

    let client = StacClient::new(StacCatalog::Custom(server.base_url()), options(&server)).unwrap();
    let params = StacSearchParams::new()
        .bbox(135.0, -15.01, 135.01, -15.0)
        .collections(&["io-lulc-annual-v02"])
        .years(2017, 2018);
    let items = client.search_all(&params).await.unwrap();

    page1.assert_hits_async(1).await;
    page2.assert_hits_async(1).await;
    let ids: Vec<&str> = items.iter().map(|i| i.id.as_str()).collect();
    assert_eq!(ids, vec!["53L-2017", "53L-2018"]);
    assert_eq!(items[1].year(), Some(2018));
}

#[tokio::test]
async fn search_all_stops_at_max_items() {
    let server = MockServer::start_async().await;
    let search = server
        .mock_async(|when, then| {
            when.method(POST).path("/search");
            then.status(200).json_body(json!({
                "type": "FeatureCollection",
                "features": [
                    feature("53L-2017", 2017, "https://x/a.tif"),
                    feature("53K-2017", 2017, "https://x/b.tif"),
                    feature("53L-2018", 2018, "https://x/c.tif")
                ],
                "links": [{ "rel": "next", "href": server.url("/search"), "method": "POST" }]
            }));
        })
        .await;

    let mut opts = options(&server);
    opts.max_items = 2;
    let client = StacClient::new(StacCatalog::Custom(server.base_url()), opts).unwrap();
    let items = client.search_all(&StacSearchParams::new()).await.unwrap();

    assert_eq!(items.len(), 2);
    search.assert_hits_async(1).await;
}

#[test]
fn stac_source_signs_without_prior_search() {
    let server = MockServer::start();
    let token = server.mock(|when, then| {
        when.method(GET).path("/sas/token/io-lulc-9-class");
        then.status(200)
            .json_body(json!({ "msft:expiry": "2099-01-01T00:00:00Z", "token": "sig=xyz" }));
    });

    let mut opts = options(&server);
    opts.force_signing = true;
    let source = StacSource::new(StacCatalog::Custom(server.base_url()), opts, CogReaderOptions::default())
        .unwrap()
        .with_collection("io-lulc-9-class");

    let mut item = feature("53L-2019", 2019, "https://ioannualv2.blob.core.windows.net/x/53L.tif");
    item.as_object_mut().unwrap().remove("collection");
    let item: lcexport_cloud::StacItem = serde_json::from_value(item).unwrap();

    let signed = source.signed_href(&item, "data").unwrap();
    assert_eq!(signed, "https://ioannualv2.blob.core.windows.net/x/53L.tif?sig=xyz");
    token.assert_hits(1);
    assert!(source.signed_href(&item, "rendered_preview").is_err());
}

#[tokio::test]
async fn search_error_is_reported() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/search");
            then.status(400).body(r#"{"code":"BadRequest","description":"bad bbox"}"#);
        })
        .await;

    let client = StacClient::new(StacCatalog::Custom(server.base_url()), options(&server)).unwrap();
    let err = client.search(&StacSearchParams::new()).await.unwrap_err();
    assert!(err.to_string().contains("400"));
}

#[tokio::test]
async fn sas_token_is_fetched_once_per_collection() {
    let server = MockServer::start_async().await;
    let token = server
        .mock_async(|when, then| {
            when.method(GET).path("/sas/token/io-lulc-annual-v02");
            then.status(200).json_body(json!({
                "msft:expiry": "2099-01-01T00:00:00Z",
                "token": "st=2099&se=2099&sp=rl&sig=abc%3D"
            }));
        })
        .await;

    let mut opts = options(&server);
    opts.force_signing = true;
    let client = StacClient::new(StacCatalog::Custom(server.base_url()), opts).unwrap();

    let href = "https://ioannualv2.blob.core.windows.net/io-annual-lulc-v02/2019/53L.tif";
    let a = client.sign_asset_href(href, "io-lulc-annual-v02").await.unwrap();
    let b = client.sign_asset_href(href, "io-lulc-annual-v02").await.unwrap();
    assert_eq!(a, format!("{href}?st=2099&se=2099&sp=rl&sig=abc%3D"));
    assert_eq!(a, b);

    let other = client
        .sign_asset_href("https://example.com/x.tif", "io-lulc-annual-v02")
        .await
        .unwrap();
    assert_eq!(other, "https://example.com/x.tif");
    token.assert_hits_async(1).await;
}

#[test]
fn stac_source_exports_from_remote_items() {
    let server = MockServer::start();

    // 10 m tile in UTM 53S covering the AOI below with a wide margin
    let tile = Raster::filled(300, 300, 8)
        .with_georef(GeoTransform::new(499_000.0, 8_342_000.0, 10.0, -10.0), Some(CRS::from_epsg(32753)))
        .with_nodata(Some(0));
    let bytes = write_geotiff_to_buffer(&tile, None).unwrap();
    let cog = server.mock(|when, then| {
        when.method(GET).path("/cogs/53L-2020.tif");
        then.status(200).body(bytes.clone());
    });
    server.mock(|when, then| {
        when.method(POST).path("/search");
        then.status(200).json_body(json!({
            "type": "FeatureCollection",
            "features": [feature("53L-2020", 2020, &server.url("/cogs/53L-2020.tif"))],
            "links": []
        }));
    });

    let mut source = StacSource::new(
        StacCatalog::Custom(server.base_url()),
        options(&server),
        CogReaderOptions::default(),
    )
    .unwrap();
    let aoi = Aoi::from_bbox(135.0, -15.006, 135.006, -15.0).unwrap();
    let dir = tempfile::tempdir().unwrap();
    let opts = ExportOptions {
        years: Some(YearRange::new(2020, 2020).unwrap()),
        ..Default::default()
    };
    let report = run_export(&mut source, &aoi, dir.path(), &opts).unwrap();

    assert_eq!(report.written.len(), 1);
    assert!(report.written[0].path.ends_with("io_land_cover_20200101_0.tif"));
    assert!(report.written[0].valid_pixels > 0);
    assert!(cog.hits() >= 1);
}

#[tokio::test]
#[ignore]
async fn planetary_computer_io_lulc() {
    let client = StacClient::new(StacCatalog::PlanetaryComputer, StacClientOptions::default())
        .expect("failed to create client");

    let params = StacSearchParams::new()
        .bbox(135.0, -15.01, 135.01, -15.0)
        .collections(&["io-lulc-annual-v02"])
        .years(2017, 2023);
    let items = client.search_all(&params).await.expect("search failed");

    assert!(!items.is_empty(), "should find annual items");
    for item in &items {
        println!("  {} {:?} {:?}", item.id, item.year(), item.crs());
        assert!(item.asset("data").is_some());
        assert!(item.crs().is_some());
    }

    let href = &items[0].asset("data").unwrap().href;
    let signed = client.sign_asset_href(href, "io-lulc-annual-v02").await.unwrap();
    assert!(signed.contains("sig="));
}
