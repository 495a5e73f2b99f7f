//! End-to-end crawl tests against a local fixture HTTP server.
//!
//! Completion order between documents is unspecified, so multi-document
//! assertions compare sorted results or multisets.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::response::Html;
use axum::routing::{get, MethodRouter};
use axum::Router;
use tokio::net::TcpListener;
use tokio_stream::StreamExt;
use wxpath::{Engine, RunOptions, Settings, Value};

fn fast_settings() -> Settings {
    let mut settings = Settings::default();
    settings.http.respect_robots = false;
    settings.throttle.start_delay_secs = 0.0;
    settings
}

async fn serve(router: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}

/// A page route that counts its GETs.
fn counted_page(counter: Arc<AtomicUsize>, body: &str) -> MethodRouter {
    let body = body.to_string();
    get(move || {
        let counter = Arc::clone(&counter);
        let body = body.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Html(body)
        }
    })
}

async fn collect(engine: &Engine, expr: &str, depth: usize, options: RunOptions) -> Vec<Value> {
    let mut stream = engine.run(expr, depth, options).unwrap();
    let mut out = Vec::new();
    while let Some(value) = stream.next().await {
        out.push(value);
    }
    out
}

fn sorted_strings(values: &[Value]) -> Vec<String> {
    let mut strings: Vec<String> = values
        .iter()
        .filter_map(|v| v.as_str().map(str::to_string))
        .collect();
    strings.sort();
    strings
}

#[tokio::test(flavor = "multi_thread")]
async fn seed_only_extraction_resolves_relative_hrefs() {
    let gets = Arc::new(AtomicUsize::new(0));
    let router = Router::new().route(
        "/a",
        counted_page(
            Arc::clone(&gets),
            r#"<html><body><a href="x">X</a><a href="y">Y</a></body></html>"#,
        ),
    );
    let base = serve(router).await;

    let engine = Engine::new(fast_settings()).unwrap();
    let results = collect(
        &engine,
        &format!("url('{base}/a')//a/@href"),
        0,
        RunOptions::default(),
    )
    .await;

    let strings = sorted_strings(&results);
    assert_eq!(strings, vec![format!("{base}/x"), format!("{base}/y")]);
    assert_eq!(gets.load(Ordering::SeqCst), 1, "seed-only crawl fetches once");
}

#[tokio::test(flavor = "multi_thread")]
async fn one_hop_extracts_from_linked_pages() {
    let gets = Arc::new(AtomicUsize::new(0));
    let router = Router::new()
        .route(
            "/a",
            counted_page(
                Arc::clone(&gets),
                r#"<html><body><a href="/b">b</a><a href="/c">c</a></body></html>"#,
            ),
        )
        .route(
            "/b",
            counted_page(
                Arc::clone(&gets),
                "<html><head><title>B</title></head><body></body></html>",
            ),
        )
        .route(
            "/c",
            counted_page(
                Arc::clone(&gets),
                "<html><head><title>C</title></head><body></body></html>",
            ),
        );
    let base = serve(router).await;

    let engine = Engine::new(fast_settings()).unwrap();
    let results = collect(
        &engine,
        &format!("url('{base}/a')//url(//a/@href)//title/text()"),
        1,
        RunOptions::default(),
    )
    .await;

    assert_eq!(sorted_strings(&results), vec!["B", "C"]);
    assert_eq!(gets.load(Ordering::SeqCst), 3);
}

#[tokio::test(flavor = "multi_thread")]
async fn deep_crawl_deduplicates_cycles() {
    let gets = Arc::new(AtomicUsize::new(0));
    let router = Router::new()
        .route(
            "/a",
            counted_page(
                Arc::clone(&gets),
                r#"<html><body><a href="/b">to b</a></body></html>"#,
            ),
        )
        .route(
            "/b",
            counted_page(
                Arc::clone(&gets),
                r#"<html><body><a href="/a">back to a</a></body></html>"#,
            ),
        );
    let base = serve(router).await;

    let engine = Engine::new(fast_settings()).unwrap();
    let results = collect(
        &engine,
        &format!("url('{base}/a')///url(//a/@href)"),
        5,
        RunOptions::default(),
    )
    .await;

    assert_eq!(
        gets.load(Ordering::SeqCst),
        2,
        "the cycle must be broken by global deduplication"
    );
    assert_eq!(results.len(), 2, "both visited documents are emitted");
    assert!(results.iter().all(|v| matches!(v, Value::Element(_))));
    assert_eq!(engine.stats().deduplicated, 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn per_host_limit_is_enforced() {
    let current = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let links: String = (0..10)
        .map(|i| format!(r#"<a href="/p{i}">p{i}</a>"#))
        .collect();
    let mut router = Router::new().route(
        "/seed",
        get(move || {
            let links = links.clone();
            async move { Html(format!("<html><body>{links}</body></html>")) }
        }),
    );
    for i in 0..10 {
        let current = Arc::clone(&current);
        let peak = Arc::clone(&peak);
        router = router.route(
            &format!("/p{i}"),
            get(move || {
                let current = Arc::clone(&current);
                let peak = Arc::clone(&peak);
                async move {
                    let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    current.fetch_sub(1, Ordering::SeqCst);
                    Html(format!(
                        "<html><head><title>p{i}</title></head><body></body></html>"
                    ))
                }
            }),
        );
    }
    let base = serve(router).await;

    let mut settings = fast_settings();
    settings.http.per_host = 2;
    let engine = Engine::new(settings).unwrap();
    let results = collect(
        &engine,
        &format!("url('{base}/seed')//url(//a/@href)//title/text()"),
        1,
        RunOptions::default(),
    )
    .await;

    assert_eq!(results.len(), 10, "every page completes");
    assert!(
        peak.load(Ordering::SeqCst) <= 2,
        "in-flight per host exceeded the limit: {}",
        peak.load(Ordering::SeqCst)
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn robots_denial_yields_error_datum() {
    let router = Router::new()
        .route(
            "/robots.txt",
            get(|| async { "User-agent: *\nDisallow: /x\n" }),
        )
        .route(
            "/seed",
            get(|| async {
                Html(r#"<html><body><a href="/x">x</a><a href="/y">y</a></body></html>"#)
            }),
        )
        .route(
            "/x",
            get(|| async { Html("<html><head><title>X</title></head><body></body></html>") }),
        )
        .route(
            "/y",
            get(|| async { Html("<html><head><title>Y</title></head><body></body></html>") }),
        );
    let base = serve(router).await;

    let mut settings = fast_settings();
    settings.http.respect_robots = true;
    let engine = Engine::new(settings).unwrap();
    let results = collect(
        &engine,
        &format!("url('{base}/seed')//url(//a/@href)//title/text()"),
        1,
        RunOptions {
            yield_errors: true,
            ..RunOptions::default()
        },
    )
    .await;

    let errors: Vec<_> = results
        .iter()
        .filter_map(|v| match v {
            Value::Error(e) => Some(e),
            _ => None,
        })
        .collect();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].url.ends_with("/x"));
    assert!(errors[0].reason.contains("robots"));

    assert_eq!(sorted_strings(&results), vec!["Y"]);
    assert_eq!(engine.stats().robots_denied, 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn map_extraction_preserves_key_and_document_order() {
    let router = Router::new().route(
        "/a",
        get(|| async {
            Html(
                r#"<html><body>
                    <item><h2>First</h2><a href="/one">one</a></item>
                    <item><h2>Second</h2><a href="/two">two</a></item>
                </body></html>"#,
            )
        }),
    );
    let base = serve(router).await;

    let engine = Engine::new(fast_settings()).unwrap();
    let results = collect(
        &engine,
        &format!("url('{base}/a')//item/map{{'t': (.//h2)[1], 'u': .//a/@href}}"),
        0,
        RunOptions::default(),
    )
    .await;

    assert_eq!(results.len(), 2);
    let first = results[0].as_map().unwrap();
    let second = results[1].as_map().unwrap();
    assert_eq!(first[0].0, "t");
    assert_eq!(first[1].0, "u");
    match &first[0].1 {
        Value::Element(el) => assert!(el.markup.contains("First")),
        other => panic!("expected an element, got {other:?}"),
    }
    assert_eq!(first[1].1.as_str(), Some(format!("{base}/one").as_str()));
    assert_eq!(second[1].1.as_str(), Some(format!("{base}/two").as_str()));
}

#[tokio::test(flavor = "multi_thread")]
async fn max_depth_zero_fetches_only_the_seed() {
    let gets = Arc::new(AtomicUsize::new(0));
    let router = Router::new()
        .route(
            "/a",
            counted_page(
                Arc::clone(&gets),
                r#"<html><body><a href="/b">b</a><a href="/c">c</a></body></html>"#,
            ),
        )
        .route(
            "/b",
            counted_page(Arc::clone(&gets), "<html><body>b</body></html>"),
        );
    let base = serve(router).await;

    let engine = Engine::new(fast_settings()).unwrap();
    let results = collect(
        &engine,
        &format!("url('{base}/a')//url(//a/@href)//title/text()"),
        0,
        RunOptions::default(),
    )
    .await;

    assert!(results.is_empty(), "no descent, no extraction from children");
    assert_eq!(gets.load(Ordering::SeqCst), 1);
    assert_eq!(engine.stats().depth_dropped, 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn follow_extracts_the_seed_but_deep_does_not() {
    fn fixture() -> Router {
        Router::new()
            .route(
                "/a",
                get(|| async {
                    Html(r#"<html><body><h1>A</h1><a href="/b">b</a></body></html>"#)
                }),
            )
            .route(
                "/b",
                get(|| async { Html("<html><body><h1>B</h1></body></html>") }),
            )
    }

    let base = serve(fixture()).await;
    let engine = Engine::new(fast_settings()).unwrap();
    let with_follow = collect(
        &engine,
        &format!("url('{base}/a', follow=.//a/@href)//h1/text()"),
        1,
        RunOptions::default(),
    )
    .await;
    assert_eq!(sorted_strings(&with_follow), vec!["A", "B"]);

    let base = serve(fixture()).await;
    let engine = Engine::new(fast_settings()).unwrap();
    let with_deep = collect(
        &engine,
        &format!("url('{base}/a')///url(.//a/@href)//h1/text()"),
        1,
        RunOptions::default(),
    )
    .await;
    assert_eq!(sorted_strings(&with_deep), vec!["B"]);
}

#[tokio::test(flavor = "multi_thread")]
async fn backlink_and_depth_are_visible_to_xpath() {
    let router = Router::new()
        .route(
            "/a",
            get(|| async { Html(r#"<html><body><a href="/b">b</a></body></html>"#) }),
        )
        .route(
            "/b",
            get(|| async { Html("<html><body><h1>B</h1></body></html>") }),
        );
    let base = serve(router).await;

    let engine = Engine::new(fast_settings()).unwrap();
    let results = collect(
        &engine,
        &format!(
            "url('{base}/a')//url(//a/@href)/map{{'from': wx:backlink(.), 'depth': wx:depth(.), 'at': base-uri(.)}}"
        ),
        1,
        RunOptions::default(),
    )
    .await;

    assert_eq!(results.len(), 1);
    let map = results[0].as_map().unwrap();
    assert_eq!(map[0].1.as_str(), Some(format!("{base}/a").as_str()));
    assert_eq!(map[1].1, Value::Number(1.0));
    assert_eq!(map[2].1.as_str(), Some(format!("{base}/b").as_str()));
}

#[tokio::test(flavor = "multi_thread")]
async fn cancellation_terminates_the_stream() {
    let links: String = (0..50)
        .map(|i| format!(r#"<a href="/slow{i}">s</a>"#))
        .collect();
    let mut router = Router::new().route(
        "/seed",
        get(move || {
            let links = links.clone();
            async move { Html(format!("<html><body>{links}</body></html>")) }
        }),
    );
    for i in 0..50 {
        router = router.route(
            &format!("/slow{i}"),
            get(|| async {
                tokio::time::sleep(Duration::from_millis(200)).await;
                Html("<html><head><title>slow</title></head><body></body></html>")
            }),
        );
    }
    let base = serve(router).await;

    let engine = Engine::new(fast_settings()).unwrap();
    let mut stream = engine
        .run(
            &format!("url('{base}/seed')//url(//a/@href)//title/text()"),
            1,
            RunOptions::default(),
        )
        .unwrap();

    // let the crawl get going, then cancel
    tokio::time::sleep(Duration::from_millis(100)).await;
    stream.cancel();

    let drained = tokio::time::timeout(Duration::from_secs(10), async {
        let mut n = 0usize;
        while stream.next().await.is_some() {
            n += 1;
        }
        n
    })
    .await
    .expect("cancelled stream must terminate");

    assert!(drained < 50, "cancellation should prevent most fetches");
}

#[test]
fn blocking_wrapper_materialises_results() {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let base = rt.block_on(serve(Router::new().route(
        "/a",
        get(|| async { Html(r#"<html><body><a href="x">X</a></body></html>"#) }),
    )));

    let engine = Engine::new(fast_settings()).unwrap();
    let results = engine
        .run_blocking(
            &format!("url('{base}/a')//a/@href"),
            0,
            RunOptions::default(),
        )
        .unwrap();

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].as_str(), Some(format!("{base}/x").as_str()));
}
