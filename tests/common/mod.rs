#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

use offline_cache::BoxFuture;
use offline_cache::cache::{Bucket, CacheStore, MemoryCacheStore, RequestKey};
use offline_cache::config::ControllerConfig;
use offline_cache::controller::Controller;
use offline_cache::http::{Method, Request, Response, ResponseKind, StatusCode};
use offline_cache::network::{Network, NetworkError};
use url::Url;

pub const ORIGIN: &str = "http://localhost:8080";

static TRACING: Once = Once::new();

/// Routes `tracing` output to the test harness. Set `RUST_LOG` to see it.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

pub fn url(path: &str) -> Url {
    Url::parse(ORIGIN).unwrap().join(path).unwrap()
}

pub fn navigation(path: &str) -> Request {
    Request::get(url(path)).header("Accept", "text/html,application/xhtml+xml")
}

pub fn asset(path: &str) -> Request {
    Request::get(url(path)).header("Accept", "*/*")
}

#[derive(Debug, Clone)]
struct Route {
    status: u16,
    content_type: &'static str,
    body: String,
}

/// A scripted origin. Unknown URLs answer `404`; `set_offline(true)` makes
/// every fetch fail.
#[derive(Default)]
pub struct FakeNetwork {
    routes: Mutex<HashMap<String, Route>>,
    offline: AtomicBool,
    delay: Mutex<Option<Duration>>,
    calls: AtomicUsize,
    requests: Mutex<Vec<(Method, String, Vec<u8>)>>,
}

impl FakeNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// An origin serving every default pre-cache entry.
    pub fn site() -> Arc<Self> {
        let network = Self::new();
        for path in ControllerConfig::default().precache {
            let content_type = content_type_for(&path);
            network.route(&path, 200, content_type, &format!("precached {path}"));
        }
        network
    }

    pub fn route(&self, path: &str, status: u16, content_type: &'static str, body: &str) {
        self.route_url(url(path).as_str(), status, content_type, body);
    }

    pub fn route_url(&self, url: &str, status: u16, content_type: &'static str, body: &str) {
        self.routes.lock().unwrap().insert(
            url.to_owned(),
            Route {
                status,
                content_type,
                body: body.to_owned(),
            },
        );
    }

    pub fn unroute(&self, path: &str) {
        self.routes.lock().unwrap().remove(url(path).as_str());
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<(Method, String, Vec<u8>)> {
        self.requests.lock().unwrap().clone()
    }
}

impl Network for FakeNetwork {
    fn fetch(&self, request: Request) -> BoxFuture<'_, Result<Response, NetworkError>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let delay = *self.delay.lock().unwrap();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            if self.offline.load(Ordering::SeqCst) {
                return Err(NetworkError::Offline);
            }

            let url = request.url().clone();
            self.requests.lock().unwrap().push((
                request.method().clone(),
                url.to_string(),
                request.body_bytes().to_vec(),
            ));

            let route = self.routes.lock().unwrap().get(url.as_str()).cloned();
            let route = route.unwrap_or(Route {
                status: 404,
                content_type: "text/plain",
                body: "not found".into(),
            });
            let kind = if url.origin() == Url::parse(ORIGIN).unwrap().origin() {
                ResponseKind::Basic
            } else {
                ResponseKind::Opaque
            };
            Ok(Response::new(StatusCode::from_u16(route.status))
                .header("Content-Type", route.content_type)
                .body(route.body)
                .kind(kind)
                .url(url))
        })
    }
}

fn content_type_for(path: &str) -> &'static str {
    if path.ends_with(".css") {
        "text/css"
    } else if path.ends_with(".js") {
        "application/javascript"
    } else if path.ends_with(".png") {
        "image/png"
    } else if path.ends_with(".json") {
        "application/manifest+json"
    } else {
        "text/html; charset=utf-8"
    }
}

pub fn controller(
    config: ControllerConfig,
    store: &MemoryCacheStore,
    network: &Arc<FakeNetwork>,
) -> Controller {
    init_tracing();
    Controller::new(config, Arc::new(store.clone()), network.clone()).unwrap()
}

/// A controller for the default config that has been installed and activated.
pub async fn activated(store: &MemoryCacheStore, network: &Arc<FakeNetwork>) -> Controller {
    let controller = controller(ControllerConfig::default(), store, network);
    controller.install().await.unwrap();
    controller.activate().await.unwrap();
    controller
}

pub fn body(response: &Response) -> String {
    String::from_utf8(response.body_bytes().to_vec()).unwrap()
}

/// The body stored for `path` in `bucket`, if any.
pub async fn cached_body(store: &MemoryCacheStore, bucket: &str, path: &str) -> Option<String> {
    let bucket = store.bucket(bucket).await.unwrap()?;
    let hit = bucket.get(&RequestKey::get(&url(path))).await.unwrap()?;
    Some(body(&hit))
}
