//! Integration tests for the account lifecycle: detect, sync, edit locally,
//! sync again, log out.
//!
//! Each test runs against its own wiremock server and in-memory database.

use std::sync::Arc;

use ocsync::api::{self, ApiError, Credentials, HttpConfig};
use ocsync::config::Config;
use ocsync::login_error::{LoginError, Section};
use ocsync::preferences::{Preference, PreferenceStore};
use ocsync::storage::{Database, ItemFilter, ItemQuery, SortField, SortOrder, ROOT_FOLDER_ID};
use ocsync::sync::{SyncRequest, SyncService, SyncType};
use pretty_assertions::assert_eq;
use secrecy::SecretString;
use serde_json::json;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const BASE: &str = "/index.php/apps/news/api/v2";

async fn setup() -> (MockServer, Database, Arc<PreferenceStore>) {
    let server = MockServer::start().await;
    let db = Database::open(":memory:").await.unwrap();
    let prefs = Arc::new(PreferenceStore::load(&Config::default(), &db).await.unwrap());
    (server, db, prefs)
}

async fn login(server: &MockServer, db: &Database, prefs: &Arc<PreferenceStore>) -> SyncService {
    let credentials = Credentials::new(
        &server.uri(),
        "alice",
        SecretString::from("secret".to_string()),
    )
    .unwrap();
    let http = HttpConfig::default();

    let (level, _status) = api::detect_api_level(&credentials, &http).await.unwrap();
    prefs
        .set_string(Preference::Url, credentials.root_url.as_str())
        .await
        .unwrap();
    prefs.set_string(Preference::Username, "alice").await.unwrap();
    prefs.set_string(Preference::Password, "secret").await.unwrap();
    prefs
        .set_string(Preference::DetectedApiLevel, level.as_str())
        .await
        .unwrap();
    assert!(prefs.has_credentials());

    let api = api::connect_stored(&http, db.clone(), Arc::clone(prefs)).unwrap();
    SyncService::new(api, Arc::clone(prefs)).await
}

async fn mount_metadata(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path(format!("{BASE}/")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "version": "9.0.0",
            "user": {"userId": "alice", "displayName": "Alice"}
        })))
        .mount(server)
        .await;
}

fn starred_query() -> ItemQuery {
    ItemQuery {
        filter: ItemFilter::Starred,
        only_unread: false,
        sort_field: SortField::Id,
        order: SortOrder::Ascending,
        limit: None,
    }
}

#[tokio::test]
async fn test_login_sync_edit_resync_logout() {
    let (server, db, prefs) = setup().await;
    mount_metadata(&server).await;

    Mock::given(method("GET"))
        .and(path(format!("{BASE}/sync")))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Etag", "\"v1\"")
                .set_body_json(json!({
                    "folders": [{"id": 1, "name": "Linux"}],
                    "feeds": [
                        {"id": 10, "url": "https://lwn.net/rss", "name": "LWN", "folderId": 1},
                        {"id": 11, "url": "https://blog.rust-lang.org/feed.xml", "name": "Rust", "folderId": null}
                    ],
                    "items": [
                        {"id": 100, "feedId": 10, "title": "Kernel", "isUnread": true, "isStarred": false, "contentHash": "a"},
                        {"id": 101, "feedId": 10, "title": "Distro", "isUnread": true, "isStarred": false, "contentHash": "b"},
                        {"id": 102, "feedId": 11, "title": "Release", "isUnread": false, "isStarred": true, "contentHash": "c"}
                    ]
                })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let service = login(&server, &db, &prefs).await;
    let user = service.api().user().await.unwrap();
    assert_eq!(user.display_name.as_deref(), Some("Alice"));

    let summary = service.run(SyncRequest::initial()).await.unwrap();
    assert_eq!(summary.feeds, 2);
    assert_eq!(summary.items, 3);
    assert_eq!(db.get_feed(10).await.unwrap().unwrap().unread_count, 2);
    assert_eq!(db.get_feed(11).await.unwrap().unwrap().folder_id, ROOT_FOLDER_ID);
    assert!(prefs.bool(Preference::NeedsUpdateAfterSync));

    // Local edits: read one item, unstar another
    assert!(db.set_item_unread(100, false).await.unwrap());
    assert!(db.set_item_starred(102, false).await.unwrap());

    Mock::given(method("POST"))
        .and(path(format!("{BASE}/sync")))
        .and(header("if-none-match", "\"v1\""))
        .and(body_json(json!({
            "items": [
                {"id": 100, "isUnread": false, "isStarred": false, "contentHash": "a"},
                {"id": 102, "isUnread": false, "isStarred": false, "contentHash": "c"}
            ]
        })))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Etag", "\"v2\"")
                .set_body_json(json!({
                    "folders": [{"id": 1, "name": "Linux"}],
                    "feeds": [
                        {"id": 10, "url": "https://lwn.net/rss", "name": "LWN", "folderId": 1}
                    ],
                    "items": [
                        {"id": 100, "feedId": 10, "title": "Kernel", "isUnread": false, "isStarred": false, "contentHash": "a"}
                    ]
                })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let summary = service
        .run(SyncRequest::new(SyncType::SyncChangesOnly))
        .await
        .unwrap();

    // Feed 11 vanished: its item is pruned along with it
    assert_eq!(summary.pruned_items, 1);
    assert_eq!(db.get_feed(11).await.unwrap(), None);
    assert!(db.get_items(&starred_query()).await.unwrap().is_empty());
    assert!(db.get_changed_items().await.unwrap().is_empty());
    assert_eq!(db.get_feed(10).await.unwrap().unwrap().unread_count, 1);
    assert_eq!(prefs.string(Preference::Etag).as_deref(), Some("\"v2\""));

    db.clear_account_data().await.unwrap();
    for pref in [
        Preference::Username,
        Preference::Password,
        Preference::Url,
        Preference::DetectedApiLevel,
        Preference::Etag,
    ] {
        prefs.remove(pref).await.unwrap();
    }
    assert!(!prefs.has_credentials());
    assert!(db.get_feeds().await.unwrap().is_empty());
    assert_eq!(db.get_user().await.unwrap(), None);
}

#[tokio::test]
async fn test_wrong_password_maps_to_user_section() {
    let (server, _db, _prefs) = setup().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let credentials = Credentials::new(
        &server.uri(),
        "alice",
        SecretString::from("wrong".to_string()),
    )
    .unwrap();
    let err = api::detect_api_level(&credentials, &HttpConfig::default())
        .await
        .unwrap_err();

    let login = LoginError::from_api_error(&err);
    assert_eq!(login.section, Section::User);
    assert_eq!(login.message, "Incorrect username or password");
}

#[tokio::test]
async fn test_unreachable_server_maps_to_url_section() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let credentials = Credentials::new(
        &format!("http://{}", addr),
        "alice",
        SecretString::from("secret".to_string()),
    )
    .unwrap();
    let err = api::detect_api_level(&credentials, &HttpConfig::default())
        .await
        .unwrap_err();

    assert!(matches!(err, ApiError::Transport { .. }));
    let login = LoginError::from_api_error(&err);
    assert_eq!(login.section, Section::Url);
    assert_eq!(login.message, "Could not connect to server");
}

#[tokio::test]
async fn test_load_more_is_rejected_without_request() {
    let (server, db, prefs) = setup().await;
    mount_metadata(&server).await;
    let service = login(&server, &db, &prefs).await;

    Mock::given(method("GET"))
        .and(path(format!("{BASE}/sync")))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let err = service
        .run(SyncRequest::new(SyncType::LoadMore))
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::Unsupported(_)));
    assert!(!service.is_running());
    assert_eq!(LoginError::from_api_error(&err).section, Section::Unknown);
}
