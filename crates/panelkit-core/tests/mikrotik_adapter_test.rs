#![allow(clippy::unwrap_used)]
// MikroTik adapter tests against an in-process RouterOS API emulator.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use panelkit_api::routeros::Attributes;
use panelkit_api::routeros::codec::{SentenceDecoder, encode_sentence};
use panelkit_core::{
    BackendIdentity, Capability, Expiry, MikrotikAdapter, PanelAdapter, PanelConfig, PanelError,
    PanelType, UserPatch, UserSpec,
};

// ── Fake router ─────────────────────────────────────────────────────

#[derive(Default)]
struct FakeRouter {
    secrets: Vec<Attributes>,
    next_id: u32,
    commands: Vec<Vec<String>>,
}

fn reply(kind: &str, attrs: &Attributes) -> Vec<String> {
    std::iter::once(kind.to_owned())
        .chain(attrs.iter().map(|(k, v)| format!("={k}={v}")))
        .collect()
}

fn trap(message: &str) -> Vec<Vec<String>> {
    vec![
        vec!["!trap".into(), format!("=message={message}")],
        vec!["!done".into()],
    ]
}

fn done() -> Vec<Vec<String>> {
    vec![vec!["!done".into()]]
}

impl FakeRouter {
    fn with_secret(name: &str, comment: &str) -> Self {
        let mut router = Self::default();
        router.insert(&Attributes::from([
            ("name".to_owned(), name.to_owned()),
            ("password".to_owned(), "x".to_owned()),
            ("disabled".to_owned(), "no".to_owned()),
            ("comment".to_owned(), comment.to_owned()),
        ]));
        router
    }

    fn insert(&mut self, attrs: &Attributes) -> String {
        self.next_id += 1;
        let id = format!("*{:X}", self.next_id);
        let mut row = Attributes::new();
        row.insert(".id".into(), id.clone());
        row.insert("profile".into(), "default".into());
        for (k, v) in attrs {
            row.insert(k.clone(), normalize(k, v));
        }
        self.secrets.push(row);
        id
    }

    fn handle(&mut self, words: &[String]) -> Vec<Vec<String>> {
        self.commands.push(words.to_vec());
        // Hotspot users sit in their own table but answer the same verbs.
        let path = words[0].replacen("/ip/hotspot/user/", "/ppp/secret/", 1);
        let attrs: Attributes = words
            .iter()
            .filter_map(|w| w.strip_prefix('=')?.split_once('='))
            .map(|(k, v)| (k.to_owned(), v.to_owned()))
            .collect();
        let name_query = words
            .iter()
            .find_map(|w| w.strip_prefix("?name="))
            .map(str::to_owned);

        match path.as_str() {
            "/login" => {
                if attrs.get("password").map(String::as_str) == Some("pw") {
                    done()
                } else {
                    trap("invalid user name or password (6)")
                }
            }
            "/ppp/secret/print" => {
                let mut out: Vec<Vec<String>> = self
                    .secrets
                    .iter()
                    .filter(|row| name_query.as_ref().is_none_or(|n| row.get("name") == Some(n)))
                    .map(|row| reply("!re", row))
                    .collect();
                out.push(vec!["!done".into()]);
                out
            }
            "/ppp/secret/add" => {
                let id = self.insert(&attrs);
                vec![vec!["!done".into(), format!("=ret={id}")]]
            }
            "/ppp/secret/set" => {
                let Some(row) = self.secrets.iter_mut().find(|r| r.get(".id") == attrs.get(".id"))
                else {
                    return trap("no such item");
                };
                for (k, v) in attrs.iter().filter(|(k, _)| k.as_str() != ".id") {
                    row.insert(k.clone(), normalize(k, v));
                }
                done()
            }
            "/ppp/secret/remove" => {
                let before = self.secrets.len();
                self.secrets.retain(|r| r.get(".id") != attrs.get(".id"));
                if self.secrets.len() == before { trap("no such item") } else { done() }
            }
            "/ppp/secret/reset-counters" => {
                let Some(row) = self.secrets.iter_mut().find(|r| r.get(".id") == attrs.get(".id"))
                else {
                    return trap("no such item");
                };
                row.insert("bytes-in".into(), "0".into());
                row.insert("bytes-out".into(), "0".into());
                done()
            }
            "/ppp/active/print" | "/ppp/profile/print" | "/ip/hotspot/active/print" => done(),
            "/system/resource/print" => vec![
                reply(
                    "!re",
                    &Attributes::from([
                        ("uptime".to_owned(), "1d2h".to_owned()),
                        ("version".to_owned(), "7.14.2 (stable)".to_owned()),
                        ("cpu-load".to_owned(), "12".to_owned()),
                        ("free-memory".to_owned(), "300".to_owned()),
                        ("total-memory".to_owned(), "1000".to_owned()),
                        ("board-name".to_owned(), "hAP ax2".to_owned()),
                    ]),
                ),
                vec!["!done".into()],
            ],
            "/system/identity/print" => vec![
                reply("!re", &Attributes::from([("name".to_owned(), "core".to_owned())])),
                vec!["!done".into()],
            ],
            _ => trap("no such command prefix"),
        }
    }
}

/// RouterOS answers `disabled` as `true`/`false` however it was set.
fn normalize(key: &str, value: &str) -> String {
    match (key, value) {
        ("disabled", "yes") => "true".into(),
        ("disabled", "no") => "false".into(),
        _ => value.to_owned(),
    }
}

struct Harness {
    port: u16,
    router: Arc<Mutex<FakeRouter>>,
    connections: Arc<AtomicUsize>,
}

impl Harness {
    async fn start(router: FakeRouter) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let router = Arc::new(Mutex::new(router));
        let connections = Arc::new(AtomicUsize::new(0));

        let (shared, counter) = (Arc::clone(&router), Arc::clone(&connections));
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(serve(stream, Arc::clone(&shared)));
            }
        });
        Self {
            port,
            router,
            connections,
        }
    }

    fn adapter(&self, password: &str) -> MikrotikAdapter {
        let config = PanelConfig::new("r1", "core", PanelType::Mikrotik)
            .with_host("127.0.0.1", Some(self.port))
            .with_login("admin", password);
        MikrotikAdapter::configure(&config).unwrap()
    }

    fn hotspot_adapter(&self) -> MikrotikAdapter {
        let config = PanelConfig::new("r1", "core", PanelType::Mikrotik)
            .with_host("127.0.0.1", Some(self.port))
            .with_login("admin", "pw")
            .with_extras(serde_json::json!({ "service": "hotspot", "server": "hs1" }));
        MikrotikAdapter::configure(&config).unwrap()
    }

    fn paths(&self) -> Vec<String> {
        self.router
            .lock()
            .unwrap()
            .commands
            .iter()
            .map(|c| c[0].clone())
            .collect()
    }

    fn command(&self, path: &str) -> Vec<String> {
        self.router
            .lock()
            .unwrap()
            .commands
            .iter()
            .find(|c| c[0] == path)
            .cloned()
            .unwrap()
    }
}

async fn serve(mut stream: TcpStream, router: Arc<Mutex<FakeRouter>>) {
    let mut buf = BytesMut::with_capacity(1024);
    let mut decoder = SentenceDecoder::new();
    loop {
        while let Some(words) = decoder.decode(&mut buf).unwrap() {
            let replies = router.lock().unwrap().handle(&words);
            for sentence in replies {
                let bytes = encode_sentence(&sentence).unwrap();
                if stream.write_all(&bytes).await.is_err() {
                    return;
                }
            }
        }
        match stream.read_buf(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(_) => {}
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[tokio::test]
async fn test_create_user_generates_password_and_stores_expiry() {
    let harness = Harness::start(FakeRouter::default()).await;
    let adapter = harness.adapter("pw");

    let expiry = Expiry::from_unix_secs(1_893_456_000);
    let created = adapter
        .create_user(&UserSpec::new("alice").with_expiry(expiry).with_data_limit(5_000))
        .await
        .unwrap();

    let secret = created.secret.unwrap();
    assert_eq!(secret.len(), 12);
    assert_eq!(created.user.username, "alice");
    assert_eq!(created.user.expiry, expiry);
    assert_eq!(created.user.data_limit_bytes, 5_000);
    assert!(created.user.enabled);
    assert_eq!(created.user.identity, BackendIdentity::RouterId("*1".into()));
    assert!(created.access_link.is_none());

    let add = harness.command("/ppp/secret/add");
    assert!(add.contains(&"=name=alice".to_owned()));
    assert!(add.contains(&format!("=password={secret}")));
    assert!(add.contains(&"=comment=expires=1893456000 limit=5000".to_owned()));
    assert!(adapter.session_issued_at().await.is_some());
}

#[tokio::test]
async fn test_create_existing_user_is_duplicate() {
    let harness = Harness::start(FakeRouter::with_secret("alice", "")).await;
    let err = harness
        .adapter("pw")
        .create_user(&UserSpec::new("alice"))
        .await
        .unwrap_err();
    assert!(matches!(err, PanelError::DuplicateUser { ref username } if username == "alice"));
    assert!(!harness.paths().contains(&"/ppp/secret/add".to_owned()));
}

#[tokio::test]
async fn test_delete_absent_user_is_idempotent() {
    let harness = Harness::start(FakeRouter::with_secret("alice", "")).await;
    let adapter = harness.adapter("pw");

    assert!(!adapter.delete_user("ghost").await.unwrap());
    assert!(!harness.paths().contains(&"/ppp/secret/remove".to_owned()));

    assert!(adapter.delete_user("alice").await.unwrap());
    assert!(!adapter.delete_user("alice").await.unwrap());
}

#[tokio::test]
async fn test_update_and_disable_rewrite_comment_and_flag() {
    let harness = Harness::start(FakeRouter::with_secret("bob", "vip expires=1893456000")).await;
    let adapter = harness.adapter("pw");

    let updated = adapter
        .update_user(
            "bob",
            &UserPatch {
                expiry: Some(Expiry::Never),
                data_limit_bytes: Some(1_000),
                ..UserPatch::default()
            },
        )
        .await
        .unwrap();
    assert!(updated.expiry.is_never());
    assert_eq!(updated.data_limit_bytes, 1_000);
    assert!(harness.command("/ppp/secret/set").contains(&"=comment=vip limit=1000".to_owned()));

    adapter.disable_user("bob").await.unwrap();
    assert!(!adapter.get_user("bob").await.unwrap().enabled);
    adapter.enable_user("bob").await.unwrap();
    assert!(adapter.get_user("bob").await.unwrap().enabled);
}

#[tokio::test]
async fn test_missing_user_writes_are_not_found() {
    let harness = Harness::start(FakeRouter::default()).await;
    let err = harness.adapter("pw").disable_user("ghost").await.unwrap_err();
    assert!(matches!(err, PanelError::UserNotFound { .. }));
}

#[tokio::test]
async fn test_ppp_reset_is_unsupported_without_connecting() {
    let harness = Harness::start(FakeRouter::with_secret("alice", "")).await;
    let err = harness.adapter("pw").reset_user_data("alice").await.unwrap_err();
    assert!(matches!(
        err,
        PanelError::UnsupportedOperation {
            operation: Capability::ResetUserData,
            panel_type: PanelType::Mikrotik,
        }
    ));
    assert_eq!(harness.connections.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_wrong_password_is_authentication_error() {
    let harness = Harness::start(FakeRouter::default()).await;
    let adapter = harness.adapter("nope");

    let err = adapter.create_user(&UserSpec::new("alice")).await.unwrap_err();
    assert!(matches!(err, PanelError::Authentication { .. }), "got {err:?}");
    assert!(!adapter.test_connection().await);
    assert!(adapter.get_user("alice").await.is_none());
}

#[tokio::test]
async fn test_panel_info_reads_system_resource() {
    let harness = Harness::start(FakeRouter::default()).await;
    let adapter = harness.adapter("pw");

    assert!(adapter.test_connection().await);
    let info = adapter.panel_info().await;
    assert!(info.reachable);
    assert_eq!(info.version.as_deref(), Some("7.14.2 (stable)"));
    assert_eq!(info.uptime_secs, Some(93_600));
    assert_eq!(info.memory_used, Some(700));
    assert_eq!(info.details.get("identity").map(String::as_str), Some("core"));

    let stats = adapter.system_stats().await;
    assert_eq!(stats.total_users, Some(0));
    assert_eq!(stats.cpu_percent, Some(12.0));
}

#[tokio::test]
async fn test_unreachable_router_degrades_reads() {
    // Bind then drop so the port refuses connections.
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    };
    let config = PanelConfig::new("r1", "core", PanelType::Mikrotik)
        .with_host("127.0.0.1", Some(port))
        .with_login("admin", "pw");
    let adapter = MikrotikAdapter::configure(&config).unwrap();

    assert!(adapter.get_all_users().await.is_empty());
    assert!(!adapter.panel_info().await.reachable);
    let err = adapter.delete_user("alice").await.unwrap_err();
    assert!(matches!(err, PanelError::BackendUnavailable { .. }), "got {err:?}");
}

#[tokio::test]
async fn test_hotspot_limit_and_counter_reset() {
    let mut router = FakeRouter::default();
    router.insert(&Attributes::from([
        ("name".to_owned(), "carol".to_owned()),
        ("password".to_owned(), "x".to_owned()),
        ("disabled".to_owned(), "no".to_owned()),
        ("comment".to_owned(), "lobby".to_owned()),
        ("bytes-in".to_owned(), "700".to_owned()),
        ("bytes-out".to_owned(), "300".to_owned()),
    ]));
    let harness = Harness::start(router).await;
    let adapter = harness.hotspot_adapter();

    let created = adapter
        .create_user(&UserSpec::new("dan").with_data_limit(5_000))
        .await
        .unwrap();
    assert_eq!(created.user.data_limit_bytes, 5_000);
    let add = harness.command("/ip/hotspot/user/add");
    assert!(add.contains(&"=limit-bytes-total=5000".to_owned()));
    assert!(add.contains(&"=server=hs1".to_owned()));
    assert!(add.contains(&"=comment=".to_owned()));

    let carol = adapter.get_user("carol").await.unwrap();
    assert_eq!((carol.used_upload, carol.used_download), (700, 300));

    adapter.reset_user_data("carol").await.unwrap();
    let reset = harness.command("/ip/hotspot/user/reset-counters");
    assert!(reset.contains(&"=.id=*1".to_owned()));
    assert_eq!(adapter.get_user("carol").await.unwrap().used_total(), 0);

    let patch = UserPatch {
        data_limit_bytes: Some(9_000),
        ..UserPatch::default()
    };
    let updated = adapter.update_user("carol", &patch).await.unwrap();
    assert_eq!(updated.data_limit_bytes, 9_000);
    let set = harness.command("/ip/hotspot/user/set");
    assert!(set.contains(&"=limit-bytes-total=9000".to_owned()));
    assert!(set.contains(&"=comment=lobby".to_owned()));
    assert!(!harness.paths().iter().any(|p| p.starts_with("/ppp/")));
}
