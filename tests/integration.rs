use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use expect_test::expect;
use parking_lot::Mutex;
use surface_tracker::dom::{Dom, NodeId, ShadowMode};
use surface_tracker::{load_settings, Surface, SurfaceManager, TrackerConfig};

const ORIGIN: &str = "https://example.com";

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// One line per surface: `<id> <kind> <text>`.
fn describe(surfaces: &[Arc<Surface>]) -> String {
    surfaces
        .iter()
        .map(|s| format!("{} {:?} {:?}\n", s.id(), s.kind(), s.text()))
        .collect()
}

/// One line per event, in the order they were recorded.
type EventLog = Arc<Mutex<Vec<String>>>;

fn render(log: &EventLog) -> String {
    log.lock().iter().map(|line| format!("{line}\n")).collect()
}

fn id_of(surface: Option<&Arc<Surface>>) -> String {
    surface.map_or("none".to_string(), |s| s.id().to_string())
}

fn config(debounce_ms: u64, settle_delay_ms: u64) -> TrackerConfig {
    TrackerConfig {
        debounce: Duration::from_millis(debounce_ms),
        settle_delay: Duration::from_millis(settle_delay_ms),
        ..TrackerConfig::default()
    }
}

fn editing_host(dom: &Dom, parent: NodeId) -> NodeId {
    let host = dom.append_element(parent, "div");
    dom.set_attribute(host, "contenteditable", "true");
    host
}

fn textarea(dom: &Dom, parent: NodeId, value: &str) -> NodeId {
    let field = dom.append_element(parent, "textarea");
    dom.set_value(field, value);
    field
}

/// Let spawned tasks run.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

async fn advance(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
}

// ---------------------------------------------------------------------------
// Tests: text and selection
// ---------------------------------------------------------------------------

#[test]
fn paragraphs_read_as_lines() {
    let dom = Dom::new(ORIGIN);
    let host = editing_host(&dom, dom.document());
    for text in ["Hello", "World"] {
        let p = dom.append_element(host, "p");
        dom.append_text(p, text);
    }
    let manager = SurfaceManager::new(dom, TrackerConfig::default());
    manager.init();

    let actual = describe(&manager.surfaces());
    let expected = expect![[r#"
        surface-1 StructuredContent "Hello\nWorld"
    "#]];
    expected.assert_eq(&actual);
}

#[test]
fn replace_in_flat_and_structured_surfaces() {
    let dom = Dom::new(ORIGIN);
    textarea(&dom, dom.document(), "Hello world");
    let host = editing_host(&dom, dom.document());
    for text in ["Hello", "World"] {
        let p = dom.append_element(host, "p");
        dom.append_text(p, text);
    }
    let manager = SurfaceManager::new(dom, TrackerConfig::default());
    manager.init();

    let surfaces = manager.surfaces();
    surfaces[0].replace(0, 5, "Hi");
    surfaces[1].replace(6, 11, "Rust");

    let actual: String = surfaces
        .iter()
        .map(|s| format!("{} {:?} {}\n", s.id(), s.text(), s.selection()))
        .collect();
    let expected = expect![[r#"
        surface-1 "Hi world" 2..2
        surface-2 "Hello\nRust" 10..10
    "#]];
    expected.assert_eq(&actual);
}

#[test]
fn stale_offsets_are_skipped() {
    let dom = Dom::new(ORIGIN);
    let host = editing_host(&dom, dom.document());
    dom.append_text(host, "short");
    let manager = SurfaceManager::new(dom, TrackerConfig::default());
    manager.init();

    let surface = manager.surfaces().remove(0);
    surface.set_selection(1, 2);
    surface.set_selection(3, 40);
    surface.replace(10, 12, "ignored");
    assert_eq!(surface.text(), "short");
    assert_eq!(surface.selection().to_string(), "1..2");
}

// ---------------------------------------------------------------------------
// Tests: discovery
// ---------------------------------------------------------------------------

#[test]
fn discovers_through_shadow_roots_and_same_origin_frames() {
    let dom = Dom::new(ORIGIN);
    let body = dom.append_element(dom.document(), "body");
    textarea(&dom, body, "top");

    let app = dom.append_element(body, "x-app");
    let app_shadow = dom.attach_shadow(app, ShadowMode::Open).unwrap();
    let editor = dom.append_element(app_shadow, "x-editor");
    let editor_shadow = dom.attach_shadow(editor, ShadowMode::Open).unwrap();
    let deep = editing_host(&dom, editor_shadow);
    dom.append_text(deep, "deep");

    let frame = dom.append_element(body, "iframe");
    let frame_doc = dom.create_document(ORIGIN);
    dom.load_frame(frame, frame_doc);
    let framed = dom.append_element(frame_doc, "input");
    dom.set_value(framed, "framed");

    let ad = dom.append_element(body, "iframe");
    let ad_doc = dom.create_document("https://ads.example.net");
    dom.load_frame(ad, ad_doc);
    textarea(&dom, ad_doc, "cross-origin");

    let password = dom.append_element(body, "input");
    dom.set_attribute(password, "type", "password");

    let manager = SurfaceManager::new(dom, TrackerConfig::default());
    manager.init();

    let actual = describe(&manager.surfaces());
    let expected = expect![[r#"
        surface-1 FlatValue "top"
        surface-2 StructuredContent "deep"
        surface-3 FlatValue "framed"
    "#]];
    expected.assert_eq(&actual);
}

#[test]
fn rescan_keeps_identity() {
    let dom = Dom::new(ORIGIN);
    textarea(&dom, dom.document(), "a");
    editing_host(&dom, dom.document());
    let manager = SurfaceManager::new(dom.clone(), TrackerConfig::default());
    manager.init();
    let before = manager.surfaces();

    let result = manager.rescan();
    assert!(result.is_unchanged());
    for (old, new) in before.iter().zip(&result.surfaces) {
        assert!(Arc::ptr_eq(old, new));
    }

    textarea(&dom, dom.document(), "b");
    let result = manager.rescan();
    assert_eq!(result.added.len(), 1);
    assert!(Arc::ptr_eq(&before[0], &result.surfaces[0]));
}

#[test]
fn settings_fixture_shapes_eligibility() {
    let fixture = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/strict");
    let config = load_settings(&fixture.join("surfaces.toml")).resolve().unwrap();
    assert_eq!(config.debounce, Duration::from_millis(50));
    assert_eq!(config.settle_delay, Duration::from_millis(100));

    let dom = Dom::new(ORIGIN);
    let private = textarea(&dom, dom.document(), "private");
    dom.set_attribute(private, "data-private", "");
    let email = dom.append_element(dom.document(), "input");
    dom.set_attribute(email, "type", "email");
    let text = dom.append_element(dom.document(), "input");
    dom.set_value(text, "plain");
    // defaults no longer apply once the list is configured
    let gramm = textarea(&dom, dom.document(), "gramm");
    dom.set_attribute(gramm, "data-gramm", "false");

    let manager = SurfaceManager::new(dom, config);
    manager.init();

    let actual = describe(&manager.surfaces());
    let expected = expect![[r#"
        surface-1 FlatValue "plain"
        surface-2 FlatValue "gramm"
    "#]];
    expected.assert_eq(&actual);
}

// ---------------------------------------------------------------------------
// Tests: live updates
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn mutations_add_and_remove_surfaces() {
    let dom = Dom::new(ORIGIN);
    let manager = SurfaceManager::new(dom.clone(), TrackerConfig::default());
    let log: EventLog = Arc::default();
    let sink = Arc::clone(&log);
    let _add = manager.on_surface_add(move |s| sink.lock().push(format!("add {}", s.id())));
    let sink = Arc::clone(&log);
    let _remove = manager.on_surface_remove(move |s| {
        sink.lock().push(format!("remove {}", s.id()));
    });
    manager.init();

    let field = textarea(&dom, dom.document(), "");
    settle().await;
    let host = dom.append_element(dom.document(), "x-widget");
    let shadow = dom.attach_shadow(host, ShadowMode::Open).unwrap();
    editing_host(&dom, shadow);
    settle().await;
    dom.remove(field);
    settle().await;
    dom.set_attribute(host, "hidden", "");
    settle().await;

    let actual = render(&log);
    let expected = expect![[r#"
        add surface-1
        add surface-2
        remove surface-1
        remove surface-2
    "#]];
    expected.assert_eq(&actual);
}

#[tokio::test(start_paused = true)]
async fn revealed_regions_are_discovered() {
    let dom = Dom::new(ORIGIN);
    let modal = dom.append_element(dom.document(), "div");
    dom.set_attribute(modal, "style", "display: none");
    textarea(&dom, modal, "draft");
    let wrapper = dom.append_element(dom.document(), "div");
    dom.set_attribute(wrapper, "data-surface-ignore", "");
    let host = dom.append_element(wrapper, "x-widget");
    let shadow = dom.attach_shadow(host, ShadowMode::Open).unwrap();
    textarea(&dom, shadow, "inner");

    let manager = SurfaceManager::new(dom.clone(), TrackerConfig::default());
    let log: EventLog = Arc::default();
    let sink = Arc::clone(&log);
    let _add = manager.on_surface_add(move |s| {
        sink.lock().push(format!("add {} {:?}", s.id(), s.text()));
    });
    manager.init();
    assert!(manager.surfaces().is_empty());

    dom.remove_attribute(modal, "style");
    settle().await;
    dom.remove_attribute(wrapper, "data-surface-ignore");
    settle().await;

    let actual = render(&log);
    let expected = expect![[r#"
        add surface-1 "draft"
        add surface-2 "inner"
    "#]];
    expected.assert_eq(&actual);
}

#[tokio::test(start_paused = true)]
async fn navigation_rescans_after_settling() {
    let dom = Dom::new(ORIGIN);
    let field = textarea(&dom, dom.document(), "late");
    dom.set_rendered_size(field, 0.0, 0.0);
    let manager = SurfaceManager::new(dom.clone(), config(300, 500));
    manager.init();
    assert!(manager.surfaces().is_empty());

    // layout changes are invisible to the mutation observer
    dom.set_rendered_size(field, 200.0, 40.0);
    dom.navigate("https://example.com/next");
    advance(300).await;
    dom.navigate("https://example.com/next#section");
    advance(400).await;
    assert!(manager.surfaces().is_empty());

    advance(200).await;
    assert_eq!(describe(&manager.surfaces()), "surface-1 FlatValue \"late\"\n");
}

#[tokio::test(start_paused = true)]
async fn watch_surface_debounces_changes() {
    let dom = Dom::new(ORIGIN);
    textarea(&dom, dom.document(), "");
    let manager = SurfaceManager::new(dom, config(100, 500));
    manager.init();
    let surface = manager.surfaces().remove(0);

    let log: EventLog = Arc::default();
    let sink = Arc::clone(&log);
    let _watch = manager.watch_surface(&surface, move |text, selection| {
        sink.lock().push(format!("{text:?} {selection}"));
    });

    for _ in 0..5 {
        let end = surface.text().chars().count();
        surface.replace(end, end, "x");
        advance(10).await;
    }
    assert!(log.lock().is_empty());

    advance(200).await;
    let actual = render(&log);
    let expected = expect![[r#"
        "xxxxx" 5..5
    "#]];
    expected.assert_eq(&actual);
}

#[tokio::test(start_paused = true)]
async fn structured_changes_are_debounced_across_signals() {
    let dom = Dom::new(ORIGIN);
    let host = editing_host(&dom, dom.document());
    let text = dom.append_text(host, "draft");
    let manager = SurfaceManager::new(dom.clone(), config(100, 500));
    manager.init();
    let surface = manager.surfaces().remove(0);

    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let _watch = manager.watch_surface(&surface, move |_, _| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    // a host-side edit only shows up as a mutation batch
    dom.set_text(text, "draft 2");
    advance(50).await;
    surface.replace(0, 5, "final");
    advance(300).await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(surface.text(), "final 2");
}

#[tokio::test(start_paused = true)]
async fn watching_again_replaces_the_subscription() {
    let dom = Dom::new(ORIGIN);
    textarea(&dom, dom.document(), "");
    let manager = SurfaceManager::new(dom, config(50, 500));
    manager.init();
    let surface = manager.surfaces().remove(0);

    let log: EventLog = Arc::default();
    let sink = Arc::clone(&log);
    let first = manager.watch_surface(&surface, move |text, _| {
        sink.lock().push(format!("first {text}"));
    });
    let sink = Arc::clone(&log);
    let _second = manager.watch_surface(&surface, move |text, _| {
        sink.lock().push(format!("second {text}"));
    });
    // disposing the replaced handle must not cancel its successor
    first.dispose();

    surface.replace(0, 0, "typed");
    advance(100).await;

    let actual = render(&log);
    let expected = expect![[r#"
        second typed
    "#]];
    expected.assert_eq(&actual);
}

// ---------------------------------------------------------------------------
// Tests: focus
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn focus_moves_without_intermediate_unfocus() {
    let dom = Dom::new(ORIGIN);
    let a = textarea(&dom, dom.document(), "a");
    let b = editing_host(&dom, dom.document());
    let inner = dom.append_element(b, "p");
    let manager = SurfaceManager::new(dom.clone(), TrackerConfig::default());
    manager.init();

    let log: EventLog = Arc::default();
    let sink = Arc::clone(&log);
    let _focus = manager.on_focus_change(move |current, previous| {
        sink.lock().push(format!("{} <- {}", id_of(current), id_of(previous)));
    });

    dom.focus(a);
    settle().await;
    dom.focus(inner);
    settle().await;
    dom.focus(b);
    settle().await;
    dom.blur();
    settle().await;

    let actual = render(&log);
    let expected = expect![[r#"
        surface-1 <- none
        surface-2 <- surface-1
        none <- surface-2
    "#]];
    expected.assert_eq(&actual);
    assert!(manager.focused_surface().is_none());
}

#[tokio::test(start_paused = true)]
async fn removing_focused_surface_clears_focus() {
    let dom = Dom::new(ORIGIN);
    let field = textarea(&dom, dom.document(), "");
    dom.focus(field);
    let manager = SurfaceManager::new(dom.clone(), TrackerConfig::default());
    manager.init();
    assert_eq!(id_of(manager.focused_surface().as_ref()), "surface-1");

    let log: EventLog = Arc::default();
    let sink = Arc::clone(&log);
    let _focus = manager.on_focus_change(move |current, previous| {
        let line = format!("focus {} <- {}", id_of(current), id_of(previous));
        sink.lock().push(line);
    });
    let sink = Arc::clone(&log);
    let _remove = manager.on_surface_remove(move |s| {
        sink.lock().push(format!("remove {}", s.id()));
    });

    dom.remove(field);
    settle().await;

    let actual = render(&log);
    let expected = expect![[r#"
        focus none <- surface-1
        remove surface-1
    "#]];
    expected.assert_eq(&actual);
}

#[tokio::test(start_paused = true)]
async fn focus_on_a_fresh_region_is_tracked() {
    let dom = Dom::new(ORIGIN);
    let manager = SurfaceManager::new(dom.clone(), TrackerConfig::default());
    let log: EventLog = Arc::default();
    let sink = Arc::clone(&log);
    let _focus = manager.on_focus_change(move |current, previous| {
        let line = format!("focus {} <- {}", id_of(current), id_of(previous));
        sink.lock().push(line);
    });
    manager.init();

    // Inserted and focused before discovery has seen it.
    let field = textarea(&dom, dom.document(), "");
    dom.focus(field);
    settle().await;
    assert_eq!(id_of(manager.focused_surface().as_ref()), "surface-1");

    // An already-focused element that becomes editable.
    let note = dom.append_element(dom.document(), "div");
    dom.focus(note);
    settle().await;
    assert!(manager.focused_surface().is_none());
    dom.set_attribute(note, "contenteditable", "true");
    settle().await;

    let actual = render(&log);
    let expected = expect![[r#"
        focus surface-1 <- none
        focus none <- surface-1
        focus surface-2 <- none
    "#]];
    expected.assert_eq(&actual);
}

// ---------------------------------------------------------------------------
// Tests: lifecycle
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn dispose_forgets_focus() {
    let dom = Dom::new(ORIGIN);
    let field = textarea(&dom, dom.document(), "");
    dom.focus(field);
    let manager = SurfaceManager::new(dom.clone(), TrackerConfig::default());
    manager.init();
    assert!(manager.focused_surface().is_some());

    manager.dispose();
    assert!(manager.focused_surface().is_none());
    assert_eq!(manager.focus_state(), surface_tracker::FocusState::Unfocused);
}

#[tokio::test(start_paused = true)]
async fn dispose_stops_all_updates() {
    let dom = Dom::new(ORIGIN);
    textarea(&dom, dom.document(), "");
    let manager = SurfaceManager::new(dom.clone(), config(50, 500));
    manager.dispose();
    manager.init();
    let surface = manager.surfaces().remove(0);

    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let _add = manager.on_surface_add(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    let counter = Arc::clone(&calls);
    let _watch = manager.watch_surface(&surface, move |_, _| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    manager.dispose();
    manager.dispose();
    textarea(&dom, dom.document(), "");
    surface.replace(0, 0, "x");
    advance(200).await;

    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert!(!manager.is_watched(&surface));
}

#[tokio::test(start_paused = true)]
async fn init_twice_is_a_noop() {
    let dom = Dom::new(ORIGIN);
    textarea(&dom, dom.document(), "");
    let manager = SurfaceManager::new(dom.clone(), TrackerConfig::default());

    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let _add = manager.on_surface_add(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    manager.init();
    manager.init();
    textarea(&dom, dom.document(), "");
    settle().await;

    // one add from the first scan, one from the mutation; no duplicates
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn panicking_listener_does_not_break_tracking() {
    let dom = Dom::new(ORIGIN);
    let manager = SurfaceManager::new(dom.clone(), TrackerConfig::default());
    let _bad = manager.on_surface_add(|_| panic!("consumer bug"));
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let _good = manager.on_surface_add(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    manager.init();

    textarea(&dom, dom.document(), "");
    settle().await;
    textarea(&dom, dom.document(), "");
    settle().await;

    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(manager.surfaces().len(), 2);
}
