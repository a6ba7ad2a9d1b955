use axum::body::Body;
use axum::http::{Method, Request, Response, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use kontain::materialize::Materializer;
use kontain::oci::image::parse_image_manifest;
use kontain::oci::layer::{layer_from_tar, single_file_tar};
use kontain::oci::model::descriptor_digest;
use kontain::oci::{base_config, Image};
use kontain::serve::build_router;
use kontain::serve::state::AppState;
use kontain::store::{ContentStore, MemoryStore};
use kontain::strategy::{
    FlattenStrategy, InProcessQueue, MirrorStrategy, RandomStrategy, Strategy, WaitStrategy,
};
use kontain::upstream::RegistryClient;
use mockito::{Matcher, Mock, Server};
use std::sync::Arc;
use std::time::Duration;

const PUBLIC_URL: &str = "http://kontain.test";

fn router<S: Strategy>(store: &Arc<MemoryStore>, strategy: S) -> Router {
    let materializer = Materializer::new(store.clone());
    build_router(AppState::new(materializer, strategy), true)
}

async fn send(app: &Router, method: Method, uri: &str) -> Response<Body> {
    tower::ServiceExt::oneshot(
        app.clone(),
        Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap(),
    )
    .await
    .unwrap()
}

fn header(response: &Response<Body>, name: &str) -> String {
    response
        .headers()
        .get(name)
        .unwrap_or_else(|| panic!("missing {name} header"))
        .to_str()
        .unwrap()
        .to_string()
}

async fn body_bytes(response: Response<Body>) -> Vec<u8> {
    response.into_body().collect().await.unwrap().to_bytes().to_vec()
}

async fn error_of(response: Response<Body>) -> (String, String) {
    let json: serde_json::Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
    let entry = &json["errors"][0];
    (
        entry["code"].as_str().unwrap().to_string(),
        entry["message"].as_str().unwrap().to_string(),
    )
}

fn location_key(response: &Response<Body>) -> String {
    let location = header(response, "Location");
    location
        .strip_prefix(&format!("{PUBLIC_URL}/blobs/"))
        .unwrap_or_else(|| panic!("unexpected location {location}"))
        .to_string()
}

fn upstream_image() -> Image {
    let layers = vec![
        layer_from_tar(&single_file_tar("etc/hello", b"hello").unwrap()).unwrap(),
        layer_from_tar(&single_file_tar("etc/world", b"world").unwrap()).unwrap(),
    ];
    Image::build(base_config("amd64", "linux").unwrap(), layers).unwrap()
}

/// Mocks serving `image` for every manifest reference under `repository`.
/// Blob mocks expect exactly one fetch each.
struct UpstreamMocks {
    _manifest: Mock,
    blobs: Vec<Mock>,
}

async fn mock_upstream(server: &mut Server, repository: &str, image: &Image) -> UpstreamMocks {
    let manifest_path = Matcher::Regex(format!(r"^/v2/{repository}/manifests/[^/]+$"));
    let digest = image.digest().to_string();
    let manifest = server
        .mock("GET", manifest_path)
        .with_status(200)
        .with_header("content-type", image.media_type())
        .with_header("docker-content-digest", &digest)
        .with_body(image.manifest_bytes().to_vec())
        .create_async()
        .await;

    let config = image.config();
    let mut contents = vec![(config.digest().to_string(), config.data().to_vec())];
    for layer in image.layers() {
        contents.push((layer.digest().to_string(), layer.compressed().to_vec()));
    }
    let mut blobs = Vec::new();
    for (digest, data) in contents {
        let mock = server
            .mock("GET", format!("/v2/{repository}/blobs/{digest}").as_str())
            .with_status(200)
            .with_body(data)
            .expect(1)
            .create_async()
            .await;
        blobs.push(mock);
    }
    UpstreamMocks {
        _manifest: manifest,
        blobs,
    }
}

fn registry_client() -> Arc<RegistryClient> {
    Arc::new(RegistryClient::new(true))
}

#[tokio::test]
async fn test_v2_base_returns_200() {
    let store = Arc::new(MemoryStore::new(PUBLIC_URL));
    let app = router(&store, RandomStrategy::default());

    for uri in ["/v2/", "/v2"] {
        let response = send(&app, Method::GET, uri).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(header(&response, "Docker-Distribution-API-Version"), "registry/2.0");
        assert!(body_bytes(response).await.is_empty());
    }
}

#[tokio::test]
async fn test_nonexistent_route_returns_404() {
    let store = Arc::new(MemoryStore::new(PUBLIC_URL));
    let app = router(&store, RandomStrategy::default());

    let response = send(&app, Method::GET, "/nonexistent").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_mirror_tag_redirects_to_upstream_digest() {
    let mut server = Server::new_async().await;
    let image = upstream_image();
    let mocks = mock_upstream(&mut server, "lib/app", &image).await;

    let store = Arc::new(MemoryStore::new(PUBLIC_URL));
    let strategy = MirrorStrategy::new(registry_client(), server.host_with_port(), None);
    let app = router(&store, strategy);

    let first = send(&app, Method::GET, "/v2/lib/app/manifests/latest").await;
    assert_eq!(first.status(), StatusCode::SEE_OTHER);
    assert_eq!(header(&first, "Docker-Content-Digest"), image.digest().to_string());
    assert_eq!(location_key(&first), image.digest().to_string());
    let writes = store.write_count();

    let second = send(&app, Method::GET, "/v2/lib/app/manifests/latest").await;
    assert_eq!(second.status(), StatusCode::SEE_OTHER);
    assert_eq!(header(&second, "Location"), header(&first, "Location"));
    assert_eq!(store.write_count(), writes);

    for mock in &mocks.blobs {
        mock.assert_async().await;
    }

    let manifest = send(&app, Method::GET, &format!("/blobs/{}", image.digest())).await;
    assert_eq!(manifest.status(), StatusCode::OK);
    assert_eq!(body_bytes(manifest).await, image.manifest_bytes().to_vec());
}

#[tokio::test]
async fn test_mirror_unstored_digest_is_pulled() {
    let mut server = Server::new_async().await;
    let image = upstream_image();
    let _mocks = mock_upstream(&mut server, "lib", &image).await;

    let store = Arc::new(MemoryStore::new(PUBLIC_URL));
    let strategy = MirrorStrategy::new(registry_client(), server.host_with_port(), None);
    let app = router(&store, strategy);

    let uri = format!("/v2/lib/manifests/{}", image.digest());
    let response = send(&app, Method::GET, &uri).await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(
        header(&response, "Location"),
        format!("{PUBLIC_URL}/blobs/{}", image.digest())
    );

    let layers = image.layers().iter().map(|l| l.digest());
    for blob in std::iter::once(image.config().digest()).chain(layers) {
        assert!(store.exists(&blob.to_string()).await.unwrap().is_some());
    }
}

#[tokio::test]
async fn test_missing_upstream_tag_is_manifest_unknown() {
    let mut server = Server::new_async().await;
    let _missing = server
        .mock("GET", "/v2/lib/app/manifests/missing-tag")
        .with_status(404)
        .with_header("content-type", "application/json")
        .with_body(r#"{"errors":[{"code":"MANIFEST_UNKNOWN","message":"manifest unknown"}]}"#)
        .create_async()
        .await;

    let store = Arc::new(MemoryStore::new(PUBLIC_URL));
    let strategy = MirrorStrategy::new(registry_client(), server.host_with_port(), None);
    let app = router(&store, strategy);

    let response = send(&app, Method::GET, "/v2/lib/app/manifests/missing-tag").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(header(&response, "Content-Type"), "application/json");
    let (code, message) = error_of(response).await;
    assert_eq!(code, "MANIFEST_UNKNOWN");
    assert!(message.contains("missing-tag"));
    assert_eq!(store.len().await, 0);
}

#[tokio::test]
async fn test_upstream_failures_keep_their_status() {
    let mut server = Server::new_async().await;
    let _busy = server
        .mock("GET", "/v2/lib/app/manifests/latest")
        .with_status(429)
        .with_header("content-type", "application/json")
        .with_body(r#"{"errors":[{"code":"TOOMANYREQUESTS","message":"slow down"}]}"#)
        .create_async()
        .await;

    let store = Arc::new(MemoryStore::new(PUBLIC_URL));
    let strategy = MirrorStrategy::new(registry_client(), server.host_with_port(), None);
    let app = router(&store, strategy);

    let response = send(&app, Method::HEAD, "/v2/lib/app/manifests/latest").await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn test_flatten_serves_single_layer_image() {
    let mut server = Server::new_async().await;
    let image = upstream_image();
    let _mocks = mock_upstream(&mut server, "lib/app", &image).await;

    let store = Arc::new(MemoryStore::new(PUBLIC_URL));
    let strategy = FlattenStrategy::new(registry_client(), server.host_with_port(), None);
    let app = router(&store, strategy);

    let head = send(&app, Method::HEAD, "/v2/lib/app/manifests/latest").await;
    assert_eq!(head.status(), StatusCode::OK);
    let digest = header(&head, "Docker-Content-Digest");
    assert_ne!(digest, image.digest().to_string());

    let get = send(&app, Method::GET, "/v2/lib/app/manifests/latest").await;
    assert_eq!(get.status(), StatusCode::SEE_OTHER);
    assert_eq!(header(&get, "Docker-Content-Digest"), digest);
    let key = location_key(&get);
    assert!(key.starts_with("flatten-"));

    let manifest = send(&app, Method::GET, &format!("/blobs/{key}")).await;
    assert_eq!(manifest.status(), StatusCode::OK);
    let parsed = parse_image_manifest(&body_bytes(manifest).await).unwrap();
    assert_eq!(parsed.layers().len(), 1);
}

#[tokio::test]
async fn test_head_and_get_report_the_same_digest() {
    let store = Arc::new(MemoryStore::new(PUBLIC_URL));
    let app = router(&store, RandomStrategy::default());

    let head = send(&app, Method::HEAD, "/v2/random/manifests/2x100").await;
    assert_eq!(head.status(), StatusCode::OK);
    let digest = header(&head, "Docker-Content-Digest");
    let length: u64 = header(&head, "Content-Length").parse().unwrap();
    assert!(length > 0);
    assert_eq!(
        header(&head, "Content-Type"),
        "application/vnd.oci.image.manifest.v1+json"
    );
    assert!(body_bytes(head).await.is_empty());

    let get = send(&app, Method::GET, "/v2/random/manifests/2x100").await;
    assert_eq!(get.status(), StatusCode::SEE_OTHER);
    assert_eq!(header(&get, "Docker-Content-Digest"), digest);
    assert!(location_key(&get).starts_with("random-"));
}

#[tokio::test]
async fn test_stored_digests_take_the_fast_path() {
    let store = Arc::new(MemoryStore::new(PUBLIC_URL));
    let app = router(&store, RandomStrategy::default());

    let tagged = send(&app, Method::GET, "/v2/random/manifests/1x10").await;
    let digest = header(&tagged, "Docker-Content-Digest");

    let by_digest = send(&app, Method::GET, &format!("/v2/random/manifests/{digest}")).await;
    assert_eq!(by_digest.status(), StatusCode::SEE_OTHER);
    assert_eq!(header(&by_digest, "Location"), format!("{PUBLIC_URL}/blobs/{digest}"));

    let unknown = format!("sha256:{}", "0".repeat(64));
    let response = send(&app, Method::GET, &format!("/v2/random/manifests/{unknown}")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(error_of(response).await.0, "MANIFEST_UNKNOWN");
}

#[tokio::test]
async fn test_concurrent_misses_serve_one_image() {
    let store = Arc::new(MemoryStore::new(PUBLIC_URL));
    let app = router(&store, RandomStrategy::default());

    let (a, b) = tokio::join!(
        send(&app, Method::GET, "/v2/random/manifests/3x64"),
        send(&app, Method::GET, "/v2/random/manifests/3x64"),
    );
    assert_eq!(a.status(), StatusCode::SEE_OTHER);
    assert_eq!(b.status(), StatusCode::SEE_OTHER);
    assert_eq!(
        header(&a, "Docker-Content-Digest"),
        header(&b, "Docker-Content-Digest")
    );
}

#[tokio::test]
async fn test_blob_requests() {
    let store = Arc::new(MemoryStore::new(PUBLIC_URL));
    let app = router(&store, RandomStrategy::default());

    let tagged = send(&app, Method::GET, "/v2/random/manifests/1x32").await;
    let key = location_key(&tagged);
    let (_, manifest) = store.read(&key).await.unwrap().unwrap();
    let layer = parse_image_manifest(&manifest).unwrap().layers()[0].clone();
    let layer_digest = descriptor_digest(&layer).unwrap();

    let uri = format!("/v2/random/blobs/{layer_digest}");
    let head = send(&app, Method::HEAD, &uri).await;
    assert_eq!(head.status(), StatusCode::OK);
    assert_eq!(header(&head, "Content-Length"), layer.size().to_string());
    assert_eq!(header(&head, "Docker-Content-Digest"), layer_digest.to_string());

    let get = send(&app, Method::GET, &uri).await;
    assert_eq!(get.status(), StatusCode::SEE_OTHER);
    assert_eq!(header(&get, "Location"), format!("{PUBLIC_URL}/blobs/{layer_digest}"));

    let missing = format!("/v2/random/blobs/sha256:{}", "1".repeat(64));
    let response = send(&app, Method::GET, &missing).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(error_of(response).await.0, "BLOB_UNKNOWN");

    for bad in ["/v2/random/blobs/latest", "/v2/random/blobs/sha256:nothex"] {
        let response = send(&app, Method::GET, bad).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{bad}");
        assert_eq!(error_of(response).await.0, "DIGEST_INVALID");
    }
}

#[tokio::test]
async fn test_invalid_requests_are_rejected() {
    let store = Arc::new(MemoryStore::new(PUBLIC_URL));
    let app = router(&store, RandomStrategy::new(1_000));

    let response = send(&app, Method::GET, "/v2/Random/manifests/latest").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(error_of(response).await.0, "NAME_INVALID");

    let response = send(&app, Method::GET, "/v2/random/manifests/99x99999").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(error_of(response).await.0, "NAME_INVALID");

    let response = send(&app, Method::PUT, "/v2/random/manifests/latest").await;
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(error_of(response).await.0, "UNSUPPORTED");

    let response = send(&app, Method::GET, "/blobs/sha256:absent").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(store.len().await, 0);
}

#[tokio::test(start_paused = true)]
async fn test_wait_defers_then_serves() {
    let store = Arc::new(MemoryStore::new(PUBLIC_URL));
    let strategy = WaitStrategy::new(Materializer::new(store.clone()), Arc::new(InProcessQueue));
    let app = router(&store, strategy);

    let first = send(&app, Method::GET, "/v2/wait/manifests/5s").await;
    assert_eq!(first.status(), StatusCode::ACCEPTED);
    let (code, message) = error_of(first).await;
    assert_eq!(code, "MANIFEST_UNKNOWN");
    assert_eq!(message, "enqueued task to generate image in 5s");
    assert_eq!(store.len().await, 1);

    let second = send(&app, Method::GET, "/v2/wait/manifests/5s").await;
    assert_eq!(second.status(), StatusCode::ACCEPTED);
    assert_eq!(error_of(second).await.1, "waiting for image...");

    tokio::time::sleep(Duration::from_secs(6)).await;

    let ready = send(&app, Method::GET, "/v2/wait/manifests/5s").await;
    assert_eq!(ready.status(), StatusCode::SEE_OTHER);
    assert!(location_key(&ready).starts_with("wait-"));
    assert!(store
        .keys()
        .await
        .iter()
        .all(|key| !key.starts_with("placeholder-")));
}

#[tokio::test]
async fn test_wait_rejects_long_durations() {
    let store = Arc::new(MemoryStore::new(PUBLIC_URL));
    let strategy = WaitStrategy::new(Materializer::new(store.clone()), Arc::new(InProcessQueue));
    let app = router(&store, strategy);

    let response = send(&app, Method::GET, "/v2/wait/manifests/2h").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(error_of(response).await.0, "NAME_INVALID");
}
