//! End-to-end tests for the Trellis build pipeline.
//!
//! These tests build small sites in temporary directories and drive
//! incremental updates through the event bus.

use std::{
    fs,
    path::{Path, PathBuf},
    sync::{Arc, mpsc},
    time::Duration,
};

use parking_lot::Mutex;
use serde_json::json;
use tempfile::{TempDir, tempdir};
use trellis_core::{
    Config, ContentEntry, FrontMatter, Parsed, TypeConfig,
    content::{DATA, LAYOUTS, PAGES, PARTIALS},
};
use trellis_generator::{
    Action, BuildMode, Builder, BuiltinTemplater, Event, GlobalCache, Rendered, SourceEvent,
    Templater, TemplaterOptions, Update,
};

fn write(dir: &Path, rel: &str, body: &str) -> PathBuf {
    let path = dir.join(rel);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("create dir");
    }
    fs::write(&path, body).expect("write file");
    path
}

fn site_config(dir: &Path) -> Config {
    let root = dir.to_string_lossy().into_owned();
    let mut config = Config {
        cwd: root.clone(),
        dest: format!("{root}/dist"),
        collections: vec!["sitemap".into()],
        ..Default::default()
    };
    config.allow.yfm_layout = true;
    config.allow.yfm_context_data = true;
    config
        .types
        .insert(PAGES.into(), TypeConfig::new("pages", &["**/*.hbs"]));
    config
        .types
        .insert(LAYOUTS.into(), TypeConfig::new("layouts", &["**/*.hbs"]));
    config.types.insert(
        PARTIALS.into(),
        TypeConfig::new("partials", &["**/*.hbs"]).with_deep_ids(None),
    );
    config
        .types
        .insert(DATA.into(), TypeConfig::new("data", &["**/*.json"]));
    config
}

fn builder(config: Config) -> Builder {
    let templater = Arc::new(BuiltinTemplater::new(TemplaterOptions::from(&config)));
    Builder::new(config, templater).expect("builder")
}

fn new_site() -> (TempDir, Config) {
    let dir = tempdir().expect("create temp dir");
    let config = site_config(dir.path());
    (dir, config)
}

/// Record every route-register event of a bus.
fn record_routes(builder: &Builder) -> Arc<Mutex<Vec<(String, String)>>> {
    let routes = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&routes);
    let bus = builder.bus();
    bus.on(bus.route_register_name(), move |event| {
        if let Event::RouteRegister { id, route } = event {
            sink.lock().push((id.clone(), route.clone()));
        }
        Ok(())
    });
    routes
}

fn page(id: &str, front: serde_json::Value, content: &str) -> ContentEntry {
    ContentEntry {
        id: id.into(),
        kind: PAGES.into(),
        filename: id.into(),
        parsed: Parsed {
            data: FrontMatter::from_value(front).expect("front matter"),
            content: content.into(),
        },
        ..Default::default()
    }
}

#[test]
fn test_render_all_with_global_and_local_data() {
    let mut cache = GlobalCache::new(Vec::new());
    cache.add_to_cache(DATA, "globalTitle", json!("Global Title"));
    cache.add_to_cache(PAGES, "a", page("a", json!({}), "a"));
    cache.add_to_cache(PAGES, "b", page("b", json!({}), "{{globalTitle}}"));
    cache.add_to_cache(PAGES, "c", page("c", json!({ "title": "c" }), "{{title}}"));

    let templater = BuiltinTemplater::new(TemplaterOptions::default());
    let results = templater.render_all(cache.repository(PAGES), cache.pages(), &cache);

    let outputs: Vec<(String, Rendered)> = results
        .into_iter()
        .map(|(id, result)| (id, result.expect("render")))
        .collect();
    assert_eq!(
        outputs,
        [
            ("a".to_string(), Rendered::Content("a".into())),
            ("b".to_string(), Rendered::Content("Global Title".into())),
            ("c".to_string(), Rendered::Content("c".into())),
        ]
    );
}

#[test]
fn test_render_one_with_context_data_and_settings() {
    let (_dir, config) = new_site();
    let mut cache = GlobalCache::new(Vec::new());
    cache.add_to_cache(DATA, "a", json!({ "a": "test" }));
    cache.add_to_cache(DATA, "tester.settings", json!({ "label": "from settings" }));
    let tester = page(
        "tester",
        json!({ "contextData": "a" }),
        "Lorem {{a}} / {{label}} / {{currentPage.id}}",
    );
    cache.add_to_cache(PAGES, "tester", tester.clone());

    let templater = BuiltinTemplater::new(TemplaterOptions {
        write_to_disk: false,
        ..TemplaterOptions::from(&config)
    });
    let rendered = templater.render_one(&tester, &cache).expect("render");
    assert_eq!(
        rendered,
        Rendered::Content("Lorem test / from settings / tester".into())
    );

    let missing = page("other", json!({ "contextData": "nope" }), "x");
    assert!(templater.render_one(&missing, &cache).is_err());
}

#[test]
fn test_page_add_registers_route() {
    let (dir, config) = new_site();
    write(dir.path(), "pages/index.hbs", "index");

    let builder = builder(config);
    builder.build().expect("build");
    let events = builder.subscribe();
    let routes = record_routes(&builder);

    let path = write(dir.path(), "pages/docs/intro.hbs", "---\nsitemap: docs\n---\nintro");
    builder.bus().emit_source(SourceEvent {
        kind: PAGES.into(),
        action: Action::Add,
        path,
    });
    let updates = builder.drain(&events);

    assert!(matches!(
        updates.as_slice(),
        [Update::Page { id, added: true, rendered: Some(Rendered::Written(_)) }] if id == "intro"
    ));
    let cache = builder.cache();
    let cache = cache.read();
    assert_eq!(cache.repository(PAGES), ["index", "intro"]);
    assert_eq!(cache.collection("sitemap", "docs"), ["intro"]);
    assert_eq!(
        *routes.lock(),
        [("intro".to_string(), "docs/intro".to_string())]
    );
    assert!(dir.path().join("dist/docs/intro.html").exists());
}

#[test]
fn test_page_change_moves_collection_bucket() {
    let (dir, config) = new_site();
    let path = write(dir.path(), "pages/a.hbs", "---\nsitemap: main\n---\na");

    let builder = builder(config);
    builder.build().expect("build");
    let events = builder.subscribe();
    let routes = record_routes(&builder);

    write(dir.path(), "pages/a.hbs", "---\nsitemap: docs\n---\na");
    builder.bus().emit_source(SourceEvent {
        kind: PAGES.into(),
        action: Action::Changed,
        path,
    });
    builder.drain(&events);

    let cache = builder.cache();
    let cache = cache.read();
    assert_eq!(cache.repository(PAGES), ["a"]);
    assert!(cache.collection("sitemap", "main").is_empty());
    assert_eq!(cache.collection("sitemap", "docs"), ["a"]);
    assert!(routes.lock().is_empty());
}

#[test]
fn test_layout_change_rerenders_every_page() {
    let (dir, config) = new_site();
    let layout = write(dir.path(), "layouts/base.hbs", "<old>{{{yield}}}</old>");
    write(dir.path(), "pages/a.hbs", "---\nlayout: base\n---\na");
    write(dir.path(), "pages/b.hbs", "---\nlayout: base\n---\nb");

    let builder = builder(config);
    builder.build().expect("build");
    let events = builder.subscribe();

    let updated = Arc::new(Mutex::new(0usize));
    let counter = Arc::clone(&updated);
    let bus = builder.bus();
    bus.on(bus.cache_updated_name(), move |_| {
        *counter.lock() += 1;
        Ok(())
    });

    write(dir.path(), "layouts/base.hbs", "<new>{{{yield}}}</new>");
    bus.emit_source(SourceEvent {
        kind: LAYOUTS.into(),
        action: Action::Changed,
        path: layout,
    });
    let updates = builder.drain(&events);

    assert!(matches!(
        updates.as_slice(),
        [Update::Template { id, render: Some(summary), .. }] if id == "base" && summary.rendered == 2
    ));
    assert_eq!(*updated.lock(), 1);
    for name in ["a", "b"] {
        let html = fs::read_to_string(dir.path().join(format!("dist/{name}.html"))).expect("read");
        assert_eq!(html, format!("<new>{name}</new>"));
    }
}

#[test]
fn test_partial_change_is_reregistered() {
    let (dir, config) = new_site();
    let partial = write(dir.path(), "partials/ui/button.hbs", "<button>old</button>");
    write(dir.path(), "pages/a.hbs", "{{> ui/button }}");

    let builder = builder(config);
    builder.build().expect("build");
    let events = builder.subscribe();

    write(dir.path(), "partials/ui/button.hbs", "<button>new</button>");
    builder.bus().emit_source(SourceEvent {
        kind: PARTIALS.into(),
        action: Action::Changed,
        path: partial,
    });
    builder.drain(&events);

    let html = fs::read_to_string(dir.path().join("dist/a.html")).expect("read");
    assert_eq!(html, "<button>new</button>");
}

#[test]
fn test_pages_generated_from_data() {
    let (dir, mut config) = new_site();
    config.generate_pages_from = Some("catalog".into());
    write(dir.path(), "pages/old.hbs", "old");
    let catalog = write(
        dir.path(),
        "data/catalog.json",
        r#"{
            "button": { "title": "Button", "content": "<h1>{{title}}</h1>" },
            "card": { "title": "Card", "content": "<h1>{{title}}</h1>" }
        }"#,
    );

    let builder = builder(config);
    let stats = builder.build().expect("build");
    assert_eq!(stats.generated, 2);
    {
        let cache = builder.cache();
        let cache = cache.read();
        assert_eq!(cache.repository(PAGES), ["button", "card"]);
        assert!(cache.page("old").is_none());
    }
    let html = fs::read_to_string(dir.path().join("dist/button.html")).expect("read");
    assert_eq!(html, "<h1>Button</h1>");

    let events = builder.subscribe();
    let routes = record_routes(&builder);
    write(
        dir.path(),
        "data/catalog.json",
        r#"{ "alpha": { "content": "a" }, "beta": { "content": "b" } }"#,
    );
    builder.bus().emit_source(SourceEvent {
        kind: DATA.into(),
        action: Action::Changed,
        path: catalog.clone(),
    });
    let updates = builder.drain(&events);

    assert!(matches!(
        updates.as_slice(),
        [Update::PagesGenerated { ids, .. }] if ids == &["alpha", "beta"]
    ));
    {
        let cache = builder.cache();
        let cache = cache.read();
        assert_eq!(cache.repository(PAGES), ["alpha", "beta"]);
        assert_eq!(cache.pages().len(), 2);
    }
    assert_eq!(routes.lock().len(), 2);

    // Only keys that were not pages before get a new route.
    routes.lock().clear();
    write(
        dir.path(),
        "data/catalog.json",
        r#"{ "beta": { "content": "b2" }, "gamma": { "content": "g" } }"#,
    );
    builder.bus().emit_source(SourceEvent {
        kind: DATA.into(),
        action: Action::Changed,
        path: catalog,
    });
    builder.drain(&events);

    assert_eq!(builder.cache().read().repository(PAGES), ["beta", "gamma"]);
    assert_eq!(*routes.lock(), [("gamma".to_string(), "gamma".to_string())]);
}

#[test]
fn test_data_change_rerenders_pages() {
    let (dir, config) = new_site();
    let data = write(dir.path(), "data/site.json", r#"{ "title": "One" }"#);
    write(dir.path(), "pages/a.hbs", "{{ site.title }}");
    write(dir.path(), "pages/b.hbs", "{{ site.title }}!");

    let builder = builder(config);
    builder.build().expect("build");
    let events = builder.subscribe();

    write(dir.path(), "data/site.json", r#"{ "title": "Two" }"#);
    builder.bus().emit_source(SourceEvent {
        kind: DATA.into(),
        action: Action::Changed,
        path: data,
    });
    builder.drain(&events);

    let a = fs::read_to_string(dir.path().join("dist/a.html")).expect("read");
    let b = fs::read_to_string(dir.path().join("dist/b.html")).expect("read");
    assert_eq!((a.as_str(), b.as_str()), ("Two", "Two!"));
}

#[test]
fn test_serve_mode_caches_without_writing() {
    let (dir, config) = new_site();
    write(dir.path(), "pages/a.hbs", "a");

    let builder = builder(config).with_mode(BuildMode::Serve);
    builder.build().expect("build");
    let events = builder.subscribe();
    let routes = record_routes(&builder);

    let path = write(dir.path(), "pages/b.hbs", "b");
    builder.bus().emit_source(SourceEvent {
        kind: PAGES.into(),
        action: Action::Add,
        path,
    });
    let updates = builder.drain(&events);

    assert!(matches!(
        updates.as_slice(),
        [Update::Page { added: true, rendered: None, .. }]
    ));
    assert_eq!(*routes.lock(), [("b".to_string(), "b".to_string())]);
    assert!(!dir.path().join("dist").exists());
}

#[test]
fn test_watcher_publishes_add_events() {
    let (dir, config) = new_site();
    write(dir.path(), "pages/a.hbs", "a");
    write(dir.path(), "layouts/.keep.hbs", "");
    write(dir.path(), "partials/.keep.hbs", "");
    write(dir.path(), "data/site.json", "{}");

    let builder = builder(config);
    builder.build().expect("build");

    let (tx, rx) = mpsc::channel();
    let bus = builder.bus();
    bus.on(bus.source_event_name(PAGES, Action::Add), move |event| {
        if let Event::Source(source) = event {
            tx.send(source.clone())?;
        }
        Ok(())
    });
    let _watchers = builder.watch().expect("watch");

    let created = write(dir.path(), "pages/new.hbs", "new");
    let event = rx
        .recv_timeout(Duration::from_secs(10))
        .expect("add event from watcher");

    assert_eq!(event.kind, PAGES);
    assert_eq!(event.action, Action::Add);
    assert!(event.path.ends_with("pages/new.hbs"));
    assert_eq!(builder.entry_id(PAGES, &created).expect("id"), "new");
}

#[test]
fn test_live_session_renders_new_page() {
    let (dir, config) = new_site();
    write(dir.path(), "pages/a.hbs", "a");
    write(dir.path(), "layouts/.keep.hbs", "");
    write(dir.path(), "partials/.keep.hbs", "");
    write(dir.path(), "data/site.json", r#"{ "title": "Live" }"#);

    let builder = Arc::new(builder(config));
    builder.build().expect("build");
    let events = builder.subscribe();
    let watchers = builder.watch().expect("watch");

    let (done_tx, done_rx) = mpsc::channel();
    let worker = {
        let builder = Arc::clone(&builder);
        std::thread::spawn(move || {
            builder.run(events);
            done_tx.send(()).expect("signal done");
        })
    };

    write(dir.path(), "pages/new.hbs", "{{ site.title }} page");
    let output = dir.path().join("dist/new.html");
    let mut html = String::new();
    for _ in 0..100 {
        html = fs::read_to_string(&output).unwrap_or_default();
        if html == "Live page" {
            break;
        }
        std::thread::sleep(Duration::from_millis(100));
    }
    assert_eq!(html, "Live page");

    drop(watchers);
    assert!(builder.unsubscribe() > 0);
    done_rx
        .recv_timeout(Duration::from_secs(5))
        .expect("update loop stopped");
    worker.join().expect("join worker");
    assert!(builder.cache().read().page("new").is_some());
}

#[test]
fn test_watch_fails_fast_on_missing_root() {
    let (dir, config) = new_site();
    write(dir.path(), "pages/a.hbs", "a");

    let builder = builder(config);
    builder.build().expect("build");
    let result = builder.watch();

    assert!(result.is_err());
}
