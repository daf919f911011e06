use chrono::{TimeZone, Utc};
use isamples_export::{
    Error, ExportOptions, Exporter, Prefetch, QueryContext, Stage,
    geoparquet::{self, MEDIA_TYPE},
    manifest,
    source::{ExportServiceSource, RetryPolicy},
};
use mockito::{Matcher, Mock, Server, ServerGuard};
use serde_json::{Value, json};
use std::{
    fs::File,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};
use tempfile::TempDir;

const JWT: &str = "eyJhbGciOiJIUzI1NiJ9.e30.signature";

fn sample(i: usize, latitude: f64, longitude: f64, result_time: &str) -> Value {
    json!({
        "@id": format!("metadata/21547/ODP0{i}"),
        "sample_identifier": format!("IGSN:ODP0{i}"),
        "label": format!("169-1038I-{i}R-1"),
        "description": "Sulfide-bearing sediment from the Escanaba Trough",
        "source_collection": "SESAR",
        "has_specimen_category": [{"label": "Other solid object"}],
        "has_material_category": [{"label": "Rock"}],
        "has_context_category": [{"label": "Marine water body bottom"}],
        "keywords": [{"keyword": "basalt"}, {"keyword": "core"}],
        "produced_by": {
            "label": "Ocean Drilling Program Leg 169",
            "result_time": result_time,
            "sampling_site": {
                "label": "Escanaba Trough",
                "place_name": ["Gorda Ridge"],
                "sample_location": {
                    "elevation": "-3200 m",
                    "latitude": latitude,
                    "longitude": longitude
                }
            }
        },
        "curation": {"label": "Gulf Coast Repository"},
        "registrant": {"name": "Ocean Drilling Program"}
    })
}

fn jsonl(samples: &[Value]) -> String {
    samples
        .iter()
        .map(|sample| sample.to_string() + "\n")
        .collect()
}

async fn create(server: &mut ServerGuard, query: &str, uuid: &str) -> Mock {
    server
        .mock("GET", "/create")
        .match_query(Matcher::AllOf(vec![
            Matcher::UrlEncoded("q".into(), query.into()),
            Matcher::UrlEncoded("export_format".into(), "jsonl".into()),
        ]))
        .match_header("authorization", format!("Bearer {JWT}").as_str())
        .with_header("content-type", "application/json")
        .with_body(json!({"uuid": uuid}).to_string())
        .create_async()
        .await
}

/// Reports the job as started `running` times, then as completed.
async fn status(server: &mut ServerGuard, query: &str, uuid: &str, running: usize) -> Mock {
    let checks = Arc::new(AtomicUsize::new(0));
    let solr_query = json!({"q": query, "fl": "*"}).to_string();
    server
        .mock("GET", "/status")
        .match_query(Matcher::UrlEncoded("uuid".into(), uuid.into()))
        .match_header("authorization", format!("Bearer {JWT}").as_str())
        .with_header("content-type", "application/json")
        .with_body_from_request(move |_| {
            let status = if checks.fetch_add(1, Ordering::SeqCst) < running {
                "started"
            } else {
                "completed"
            };
            json!({"status": status, "query": solr_query})
                .to_string()
                .into_bytes()
        })
        .expect(running + 1)
        .create_async()
        .await
}

/// Serves a job result without byte range support.
async fn download(server: &mut ServerGuard, uuid: &str, body: String) -> Mock {
    server
        .mock("GET", "/download")
        .match_query(Matcher::UrlEncoded("uuid".into(), uuid.into()))
        .match_header("authorization", format!("Bearer {JWT}").as_str())
        .with_header("content-type", "application/x-ndjson")
        .with_body(body)
        .create_async()
        .await
}

fn source(url: &str) -> ExportServiceSource {
    ExportServiceSource::new(url)
        .unwrap()
        .with_jwt(JWT.to_string())
        .with_poll_interval(Duration::from_millis(1))
}

fn options(url: &str) -> ExportOptions {
    ExportOptions::default()
        .with_page_size(2)
        .with_batch_size(2)
        .with_prefetch(Prefetch::Pipelined(1))
        .with_retry(RetryPolicy::default().with_initial_backoff(Duration::from_millis(1)))
        .with_server_url(url.to_string())
}

#[tokio::test]
async fn export() {
    let mut server = Server::new_async().await;
    let url = server.url();
    let create = create(&mut server, "source:SESAR", "0b4e3b6c").await;
    let status = status(&mut server, "source:SESAR", "0b4e3b6c", 2).await;
    let download = download(
        &mut server,
        "0b4e3b6c",
        jsonl(&[
            sample(1, 32.5, -117.25, "2001-02-03 04:05:06"),
            sample(2, -12.0, 45.0, "1999"),
            sample(3, 70.0, 10.0, "2015-07-01"),
        ]),
    )
    .await;

    let destination = TempDir::new().unwrap();
    let context = QueryContext::starting_at(
        "source:SESAR",
        Utc.with_ymd_and_hms(2024, 5, 8, 8, 57, 12).unwrap(),
    );
    let report = Exporter::new(source(&url), options(&url))
        .export(&context, destination.path())
        .await
        .unwrap();
    create.assert_async().await;
    status.assert_async().await;
    download.assert_async().await;

    assert_eq!(report.records, 3);
    assert!(report.is_valid(), "{:?}", report.validation.errors);
    assert_eq!(report.extent.spatial, Some([-117.25, -12.0, 45.0, 70.0]));

    let metadata = geoparquet::read_metadata(&report.data_file.path)
        .unwrap()
        .unwrap();
    assert_eq!(metadata.primary_column, "geometry");
    assert_eq!(metadata.bbox(), Some(&[-117.25, -12.0, 45.0, 70.0][..]));
    let records = geoparquet::read_records(&report.data_file.path).unwrap();
    assert_eq!(records.len(), 3);
    let location = records[0].location().unwrap();
    assert_eq!((location.x(), location.y()), (-117.25, 32.5));
    assert_eq!(
        records[0].get("keywords").unwrap().as_array().unwrap(),
        ["basalt", "core"]
    );
    assert_eq!(
        records[2].get("has_material_category").unwrap().as_array().unwrap(),
        ["Rock"]
    );

    let collection: Value =
        serde_json::from_reader(File::open(&report.collection_path).unwrap()).unwrap();
    assert_eq!(
        collection["id"],
        "isamples-stac-collection-2024_05_08_08_57_12"
    );
    assert_eq!(collection["table:row_count"], 3);
    assert_eq!(
        collection["extent"]["temporal"]["interval"],
        json!([["1999-01-01T00:00:00Z", "2015-07-01T00:00:00Z"]])
    );
    assert_eq!(collection["assets"]["data"]["type"], MEDIA_TYPE);
    assert_eq!(
        collection["assets"]["data"]["href"],
        "./isamples_export_2024_05_08_08_57_12.parquet"
    );

    let entries = manifest::read(destination.path()).unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].num_results, 3);
    assert_eq!(entries[0].start_time, "2024-05-08T08:57:12.000000Z");
    assert_eq!(entries[0].export_server_url.as_deref(), Some(url.as_str()));
}

#[tokio::test]
async fn failed_job() {
    let mut server = Server::new_async().await;
    let url = server.url();
    let _create = create(&mut server, "source:(", "5d2a7f10").await;
    let status = server
        .mock("GET", "/status")
        .match_query(Matcher::UrlEncoded("uuid".into(), "5d2a7f10".into()))
        .with_body(json!({"status": "error", "query": "{\"q\": \"source:(\"}"}).to_string())
        .expect(1)
        .create_async()
        .await;

    let destination = TempDir::new().unwrap();
    let context = QueryContext::starting_at(
        "source:(",
        Utc.with_ymd_and_hms(2024, 5, 8, 8, 57, 12).unwrap(),
    );
    let error = Exporter::new(source(&url), options(&url))
        .export(&context, destination.path())
        .await
        .unwrap_err();
    status.assert_async().await;
    assert_eq!(error.stage(), Some(Stage::Source));
    let Error::Stage { source, .. } = error else {
        panic!("untagged error");
    };
    assert!(matches!(*source, Error::ExportJob { ref uuid, .. } if uuid == "5d2a7f10"));
    assert!(!destination.path().join("2024_05_08_08_57_12").exists());
    assert!(!destination.path().join("manifest.json").exists());
}

#[tokio::test]
async fn refresh() {
    let mut server = Server::new_async().await;
    let url = server.url();
    let refreshed_query = "source:SESAR AND indexUpdatedTime:[2024-05-08T08:57:12.000000Z TO *]";
    let _create = create(&mut server, "source:SESAR", "0b4e3b6c").await;
    let _status = status(&mut server, "source:SESAR", "0b4e3b6c", 0).await;
    let _download = download(
        &mut server,
        "0b4e3b6c",
        jsonl(&[sample(1, 1.0, 1.0, "2001")]),
    )
    .await;
    let refreshed = create(&mut server, refreshed_query, "9c81d2e4").await;
    let _refreshed_status = status(&mut server, refreshed_query, "9c81d2e4", 1).await;
    let _refreshed_download = download(
        &mut server,
        "9c81d2e4",
        jsonl(&[sample(2, 2.0, 2.0, "2002")]),
    )
    .await;

    let destination = TempDir::new().unwrap();
    let exporter = Exporter::new(source(&url), options(&url));
    let _ = exporter
        .export(
            &QueryContext::starting_at(
                "source:SESAR",
                Utc.with_ymd_and_hms(2024, 5, 8, 8, 57, 12).unwrap(),
            ),
            destination.path(),
        )
        .await
        .unwrap();

    let context = QueryContext::refresh_from(destination.path()).unwrap();
    assert_eq!(context.query(), "source:SESAR");
    assert_eq!(context.effective_query(), refreshed_query);
    let report = exporter.export(&context, destination.path()).await.unwrap();
    refreshed.assert_async().await;
    assert_eq!(report.records, 1);

    let entries = manifest::read(destination.path()).unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[1].query, "source:SESAR");
    assert_eq!(
        entries[1].query_with_timestamp.as_deref(),
        Some(refreshed_query)
    );

    let catalog: Value =
        serde_json::from_reader(File::open(&report.catalog_path).unwrap()).unwrap();
    let children = catalog["links"]
        .as_array()
        .unwrap()
        .iter()
        .filter(|link| link["rel"] == "child")
        .count();
    assert_eq!(children, 2);
}

#[tokio::test]
async fn missing_manifest() {
    let destination = TempDir::new().unwrap();
    assert!(QueryContext::refresh_from(destination.path()).is_err());
}
