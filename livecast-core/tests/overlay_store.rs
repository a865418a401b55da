use tempfile::TempDir;

use livecast_core::{NewOverlay, OverlayError, OverlayPatch, SqliteOverlayStore};

fn store(dir: &TempDir) -> SqliteOverlayStore {
    let store = SqliteOverlayStore::builder()
        .path(dir.path().join("data").join("overlays.sqlite"))
        .build()
        .unwrap();
    store.initialize().unwrap();
    store
}

fn ticker() -> NewOverlay {
    NewOverlay {
        text: Some("LIVE".into()),
        x: Some(100.0),
        y: Some(50.0),
        font_size: Some(32.0),
        color: Some("#ff0000".into()),
        ..NewOverlay::named("ticker")
    }
}

#[test]
fn builder_creates_parent_directory_and_schema_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let store = store(&dir);
    assert!(dir.path().join("data").is_dir());
    store.initialize().unwrap();
    store.ping().unwrap();
    assert!(store.list().unwrap().is_empty());
}

#[test]
fn create_then_get_returns_stored_fields() {
    let dir = TempDir::new().unwrap();
    let store = store(&dir);

    let created = store.create(ticker()).unwrap();
    assert!(created.created_at.is_some());

    let fetched = store.get("ticker").unwrap().unwrap();
    assert_eq!(fetched.text, "LIVE");
    assert_eq!(fetched.x, 100.0);
    assert_eq!(fetched.y, 50.0);
    assert_eq!(fetched.font_size, 32.0);
    assert_eq!(fetched.color, "#ff0000");
    assert!(fetched.enabled);
    assert_eq!(fetched.created_at, created.created_at);
}

#[test]
fn disabled_flag_survives_create_and_re_enable() {
    let dir = TempDir::new().unwrap();
    let store = store(&dir);

    let hidden = NewOverlay {
        enabled: Some(false),
        ..NewOverlay::named("logo")
    };
    store.create(hidden).unwrap();
    assert!(!store.get("logo").unwrap().unwrap().enabled);

    let patch = OverlayPatch {
        enabled: Some(true),
        ..OverlayPatch::default()
    };
    store.update("logo", patch).unwrap();
    assert!(store.get("logo").unwrap().unwrap().enabled);
    assert_eq!(
        store.list().unwrap().iter().filter(|o| o.enabled).count(),
        1
    );
}

#[test]
fn duplicate_name_is_rejected() {
    let dir = TempDir::new().unwrap();
    let store = store(&dir);

    store.create(ticker()).unwrap();
    let err = store.create(NewOverlay::named("ticker")).unwrap_err();
    assert!(matches!(err, OverlayError::AlreadyExists { ref name } if name == "ticker"));
    assert_eq!(store.list().unwrap().len(), 1);
}

#[test]
fn invalid_payload_is_not_stored() {
    let dir = TempDir::new().unwrap();
    let store = store(&dir);

    let err = store.create(NewOverlay::default()).unwrap_err();
    assert!(matches!(err, OverlayError::Invalid(_)));
    let bad_color = NewOverlay {
        color: Some("blue".into()),
        ..NewOverlay::named("logo")
    };
    assert!(store.create(bad_color).is_err());
    assert!(store.list().unwrap().is_empty());
}

#[test]
fn list_returns_every_overlay() {
    let dir = TempDir::new().unwrap();
    let store = store(&dir);

    store.create(ticker()).unwrap();
    store.create(NewOverlay::named("logo")).unwrap();

    let mut names: Vec<_> = store
        .list()
        .unwrap()
        .into_iter()
        .map(|overlay| overlay.name)
        .collect();
    names.sort();
    assert_eq!(names, vec!["logo", "ticker"]);
}

#[test]
fn update_merges_patch_and_keeps_name() {
    let dir = TempDir::new().unwrap();
    let store = store(&dir);
    store.create(ticker()).unwrap();

    let patch = OverlayPatch {
        text: Some("BREAKING".into()),
        enabled: Some(false),
        ..OverlayPatch::default()
    };
    let updated = store.update("ticker", patch).unwrap();
    assert_eq!(updated.name, "ticker");
    assert_eq!(updated.text, "BREAKING");
    assert!(!updated.enabled);
    assert_eq!(updated.font_size, 32.0);

    let fetched = store.get("ticker").unwrap().unwrap();
    assert_eq!(fetched.text, "BREAKING");
    assert!(!fetched.enabled);
    assert!(fetched.updated_at >= fetched.created_at);
}

#[test]
fn update_rejects_invalid_values_without_writing() {
    let dir = TempDir::new().unwrap();
    let store = store(&dir);
    store.create(ticker()).unwrap();

    let patch = OverlayPatch {
        font_size: Some(-4.0),
        ..OverlayPatch::default()
    };
    assert!(matches!(
        store.update("ticker", patch),
        Err(OverlayError::Invalid(_))
    ));
    assert_eq!(store.get("ticker").unwrap().unwrap().font_size, 32.0);
}

#[test]
fn missing_overlay_reports_not_found() {
    let dir = TempDir::new().unwrap();
    let store = store(&dir);

    assert!(store.get("ghost").unwrap().is_none());
    assert!(matches!(
        store.update("ghost", OverlayPatch::default()),
        Err(OverlayError::NotFound { .. })
    ));
    assert!(matches!(
        store.delete("ghost"),
        Err(OverlayError::NotFound { .. })
    ));
}

#[test]
fn delete_removes_overlay() {
    let dir = TempDir::new().unwrap();
    let store = store(&dir);
    store.create(ticker()).unwrap();

    store.delete("ticker").unwrap();
    assert!(store.get("ticker").unwrap().is_none());
    assert!(store.list().unwrap().is_empty());
}

#[test]
fn read_only_store_requires_existing_database() {
    let dir = TempDir::new().unwrap();
    let store = SqliteOverlayStore::builder()
        .path(dir.path().join("missing.sqlite"))
        .read_only(true)
        .build()
        .unwrap();
    assert!(store.is_read_only());
    assert!(matches!(
        store.ping(),
        Err(OverlayError::OpenDatabase { .. })
    ));
}
