use super::*;
use serde_json::json;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

fn entry(title: &str, url: &str) -> Entry {
    Entry::with_title_url(title, url)
}

#[test]
fn test_is_valid() {
    assert!(entry("a", "http://a").is_valid());
    assert!(entry("", "").is_valid());

    let mut missing_url = Entry::new();
    missing_url.set("title", json!("a"));
    assert!(!missing_url.is_valid());

    let mut numeric_title = Entry::new();
    numeric_title.set("title", json!(5));
    numeric_title.set("url", json!("http://a"));
    assert!(!numeric_title.is_valid());
}

#[test]
fn test_original_url_sticks() {
    let mut e = entry("a", "http://one");
    e.set("url", json!("http://two"));
    e.set("title", json!("b"));
    assert_eq!(e.peek_str("url"), Some("http://two"));
    assert_eq!(e.peek_str("original_url"), Some("http://one"));
    assert_eq!(e.peek_str("original_title"), Some("a"));
}

#[test]
fn test_set_bytes_requires_utf8() {
    let mut e = Entry::new();
    e.set_bytes("description", "caf\u{e9}".as_bytes().to_vec()).unwrap();
    assert_eq!(e.peek_str("description"), Some("caf\u{e9}"));
    let err = e.set_bytes("description", vec![0xff, 0xfe]).unwrap_err();
    assert_eq!(err, EntryError::NotText("description".to_string()));
}

#[test]
fn test_reject_wins_over_accept() {
    let mut e = entry("a", "http://a");
    e.accept(Some("first"));
    assert!(e.is_accepted());
    e.reject(Some("later filter"));
    assert!(e.is_rejected());
    e.accept(Some("too late"));
    assert!(e.is_rejected());
    assert!(e
        .traces()
        .iter()
        .any(|t| t.message == "tried to accept rejected entry"));
}

#[test]
fn test_reject_twice_is_traced_noop() {
    let mut e = entry("a", "http://a");
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    e.add_hook(
        "reject",
        move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
        },
        Map::new(),
    )
    .unwrap();
    e.reject(Some("one"));
    e.reject(Some("two"));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(e.reason(), Some("one"));
    assert_eq!(e.traces().len(), 2);
}

#[test]
fn test_immortal_suppresses_reject() {
    let mut e = entry("a", "http://a");
    e.set("immortal", json!(true));
    e.reject(Some("x"));
    assert_eq!(e.state(), EntryState::Undecided);
    assert_eq!(e.traces()[0].message, "Tried to reject immortal (x)");

    e.accept(None);
    e.reject(Some("x"));
    assert_eq!(e.state(), EntryState::Accepted);
}

#[test]
fn test_fail_is_idempotent() {
    let mut e = entry("a", "http://a");
    e.fail(Some("broken"));
    e.fail(Some("broken again"));
    assert!(e.is_failed());
    assert_eq!(e.reason(), Some("broken"));
}

#[test]
fn test_failed_entry_stays_failed() {
    let calls = Arc::new(AtomicUsize::new(0));
    let mut e = entry("a", "http://a");
    for action in ["accept", "reject"] {
        let counter = calls.clone();
        e.add_hook(
            action,
            move |_, _| {
                counter.fetch_add(1, Ordering::SeqCst);
            },
            Map::new(),
        )
        .unwrap();
    }
    e.fail(Some("broken"));

    e.accept(Some("late accept"));
    assert!(e.is_failed());
    e.reject(Some("late reject"));
    assert!(e.is_failed());

    assert_eq!(e.reason(), Some("broken"));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    let messages: Vec<&str> = e.traces().iter().map(|t| t.message.as_str()).collect();
    assert!(messages.contains(&"tried to accept failed entry"));
    assert!(messages.contains(&"tried to reject failed entry"));
}

#[test]
fn test_trace_dedup_and_plugin() {
    let scope = Arc::new(EntryScope::new("task"));
    let mut e = entry("a", "http://a");
    e.attach_scope(scope.clone());
    scope.set_current_plugin(Some("regexp"));
    e.trace("matched", None);
    e.trace("matched", None);
    assert_eq!(e.traces().len(), 1);
    assert_eq!(e.traces()[0].plugin.as_deref(), Some("regexp"));

    scope.set_current_plugin(None);
    e.trace("matched", None);
    assert_eq!(e.traces().len(), 2);
    assert!("bogus".parse::<TraceOperation>().is_err());
}

#[test]
fn test_hooks_receive_merged_kwargs() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let mut e = entry("a", "http://a");
    let mut bound = Map::new();
    bound.insert("who".to_string(), json!("bound"));
    bound.insert("keep".to_string(), json!(1));
    e.add_hook(
        "accept",
        move |entry, ctx| {
            sink.lock().unwrap().push((
                entry.peek_str("title").map(str::to_string),
                ctx.reason.clone(),
                ctx.kwargs.clone(),
            ));
        },
        bound,
    )
    .unwrap();

    let mut call = Map::new();
    call.insert("who".to_string(), json!("call"));
    e.accept_with(Some("ok"), call);

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    let (title, reason, kwargs) = &seen[0];
    assert_eq!(title.as_deref(), Some("a"));
    assert_eq!(reason.as_deref(), Some("ok"));
    assert_eq!(kwargs["who"], json!("call"));
    assert_eq!(kwargs["keep"], json!(1));
}

#[test]
fn test_invalid_hook_action() {
    let mut e = Entry::new();
    let err = e.add_hook("explode", |_, _| {}, Map::new()).unwrap_err();
    assert_eq!(err, EntryError::InvalidHookAction("explode".to_string()));
}

#[test]
fn test_complete_hook_keeps_state() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let mut e = entry("a", "http://a");
    e.add_hook(
        "complete",
        move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
        },
        Map::new(),
    )
    .unwrap();
    e.complete(Map::new());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(e.is_undecided());
}

#[test]
fn test_identity_equality_and_hash() {
    let mut a = entry("Show S01E01", "http://a");
    let b = entry("Show S01E01", "http://a");
    a.set("url", json!("http://rewritten"));
    a.set("title", json!("Show.S01E01"));
    assert_eq!(a, b);

    let mut set = HashSet::new();
    set.insert(a);
    assert!(set.contains(&b));
    assert!(!set.contains(&entry("Show S01E01", "http://other")));
}

fn scope_with_lookup(calls: Arc<AtomicUsize>) -> Arc<EntryScope> {
    let scope = Arc::new(EntryScope::new("task"));
    scope.lookups.register("imdb", move |entry: &Entry, field: &LazyField| {
        calls.fetch_add(1, Ordering::SeqCst);
        let mut out = Map::new();
        out.insert(
            "imdb_name".to_string(),
            json!(format!("{} (lookup)", entry.peek_str("title").unwrap_or_default())),
        );
        out.insert("imdb_year".to_string(), field.kwargs["year"].clone());
        Ok(out)
    });
    scope.lookups.register("broken", |_: &Entry, _: &LazyField| {
        Err(anyhow::anyhow!("service unavailable"))
    });
    scope
}

#[test]
fn test_lazy_fields_evaluate_once() {
    let calls = Arc::new(AtomicUsize::new(0));
    let mut e = entry("Movie", "http://m");
    e.attach_scope(scope_with_lookup(calls.clone()));
    let mut kwargs = Map::new();
    kwargs.insert("year".to_string(), json!(1999));
    e.add_lazy_fields("imdb", &["imdb_name", "imdb_year"], vec![], kwargs);

    assert!(e.contains("imdb_name"));
    assert!(e.peek("imdb_name").is_none());
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    assert_eq!(e.get("imdb_name").unwrap(), Some(&json!("Movie (lookup)")));
    assert_eq!(e.get("imdb_year").unwrap(), Some(&json!(1999)));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(e.lazy_fields().is_empty());
}

#[test]
fn test_lazy_skips_concrete_fields() {
    let calls = Arc::new(AtomicUsize::new(0));
    let mut e = entry("Movie", "http://m");
    e.attach_scope(scope_with_lookup(calls.clone()));
    e.set("imdb_name", json!("already known"));
    e.add_lazy_fields("imdb", &["imdb_name"], vec![], Map::new());
    assert!(e.lazy_fields().is_empty());
    assert_eq!(e.get("imdb_name").unwrap(), Some(&json!("already known")));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[test]
fn test_lazy_failure_sets_null() {
    let mut e = entry("Movie", "http://m");
    e.attach_scope(scope_with_lookup(Arc::new(AtomicUsize::new(0))));
    e.add_lazy_fields("broken", &["rating"], vec![], Map::new());
    assert_eq!(e.get("rating").unwrap(), Some(&Value::Null));
    assert!(!e.is_lazy("rating"));
}

#[test]
fn test_unknown_lookup_is_error() {
    let mut e = entry("Movie", "http://m");
    e.add_lazy_fields("nobody", &["rating"], vec![], Map::new());
    let err = e.get("rating").unwrap_err();
    assert_eq!(err, EntryError::UnknownLookup("nobody".to_string()));
    assert!(e.is_lazy("rating"));
}

#[test]
fn test_serialize_round_trip() {
    let mut e = entry("Show", "http://one");
    e.set("url", json!("http://two"));
    e.set("quality", json!("720p"));
    e.set("_backlog", json!(true));
    let mut kwargs = Map::new();
    kwargs.insert("year".to_string(), json!(2001));
    e.add_lazy_fields("imdb", &["imdb_name"], vec![json!("arg")], kwargs);

    let data = e.serialize();
    assert!(!data.fields.contains_key("_backlog"));
    assert!(!data.fields.contains_key("imdb_name"));

    let json = serde_json::to_value(&data).unwrap();
    let restored = Entry::from_value(json).unwrap();
    assert_eq!(restored, e);
    assert_eq!(restored.peek_str("title"), Some("Show"));
    assert_eq!(restored.peek_str("url"), Some("http://two"));
    assert_eq!(restored.peek_str("original_url"), Some("http://one"));
    assert_eq!(restored.peek_str("quality"), Some("720p"));
    assert_eq!(restored.lazy_fields(), e.lazy_fields());
}

#[test]
fn test_update_using_map() {
    let source = json!({
        "info": {"year": 2010, "genres": ["drama", "crime"]},
        "name": "The Show",
        "missing": null
    });
    let mut e = Entry::new();
    e.update_using_map(
        &[
            ("title", FieldSource::path("name")),
            ("year", FieldSource::path("info.year")),
            ("genre", FieldSource::path("info.genres.0")),
            ("nothing", FieldSource::path("missing")),
            (
                "genre_count",
                FieldSource::Func(Arc::new(|v: &Value| {
                    json!(v["info"]["genres"].as_array().map_or(0, Vec::len))
                })),
            ),
        ],
        &source,
        true,
    );
    assert_eq!(e.peek_str("title"), Some("The Show"));
    assert_eq!(e.peek("year"), Some(&json!(2010)));
    assert_eq!(e.peek_str("genre"), Some("drama"));
    assert_eq!(e.peek("genre_count"), Some(&json!(2)));
    assert!(!e.contains("nothing"));
}

#[test]
fn test_render() {
    let mut e = entry("Show", "http://a");
    e.set("season", json!(2));
    assert_eq!(e.render("{title} - S{season} {missing}"), "Show - S2 {missing}");
}
