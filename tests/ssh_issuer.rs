//! Token issuance against an in-process SSH server on the loopback
//! interface.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use russh::keys::{decode_secret_key, PrivateKey, PublicKey};
use russh::server::{self, Auth, Msg, Session};
use russh::{Channel, ChannelId, CryptoVec};
use tempfile::TempDir;
use tokio::net::TcpListener;

use lagoon_cli::config::{ConfigStorage, ProfileFields, ProfileStore};
use lagoon_cli::session::{Error, SessionContext, SshTokenIssuer, TokenIssuer, TokenValidator};
use lagoon_cli::ssh::{
    FsKeyFiles, KeyMaterialResolver, KeySelection, SystemAgent, TerminalPrompt,
};
use lagoon_cli::Profile;

fn fixture(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(name)
}

fn load_key(name: &str) -> PrivateKey {
    let data = std::fs::read_to_string(fixture(name)).unwrap();
    decode_secret_key(&data, None).unwrap()
}

/// What the fake token service answers to `exec`
#[derive(Clone)]
struct Reply {
    stdout: &'static str,
    stderr: &'static str,
    exit_status: u32,
}

#[derive(Clone)]
struct TokenService {
    authorized: Option<PublicKey>,
    reply: Reply,
    users: Arc<Mutex<Vec<String>>>,
    commands: Arc<Mutex<Vec<String>>>,
}

impl server::Handler for TokenService {
    type Error = russh::Error;

    async fn auth_publickey(&mut self, user: &str, key: &PublicKey) -> Result<Auth, Self::Error> {
        self.users.lock().unwrap().push(user.to_string());
        match &self.authorized {
            Some(allowed) if allowed.key_data() == key.key_data() => Ok(Auth::Accept),
            _ => Ok(Auth::reject()),
        }
    }

    async fn channel_open_session(
        &mut self,
        _channel: Channel<Msg>,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        Ok(true)
    }

    async fn exec_request(
        &mut self,
        channel: ChannelId,
        data: &[u8],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        self.commands
            .lock()
            .unwrap()
            .push(String::from_utf8_lossy(data).into_owned());
        session.channel_success(channel)?;
        if !self.reply.stdout.is_empty() {
            session.data(channel, CryptoVec::from_slice(self.reply.stdout.as_bytes()))?;
        }
        if !self.reply.stderr.is_empty() {
            session.extended_data(channel, 1, CryptoVec::from_slice(self.reply.stderr.as_bytes()))?;
        }
        session.exit_status_request(channel, self.reply.exit_status)?;
        session.eof(channel)?;
        session.close(channel)?;
        Ok(())
    }
}

/// Serve a single connection with `service`
async fn spawn_server(service: TokenService) -> SocketAddr {
    let config = server::Config {
        auth_rejection_time: Duration::from_millis(10),
        auth_rejection_time_initial: Some(Duration::ZERO),
        inactivity_timeout: Some(Duration::from_secs(10)),
        keys: vec![load_key("host_ed25519")],
        ..Default::default()
    };
    let config = Arc::new(config);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        if let Ok(session) = server::run_stream(config, socket, service).await {
            let _ = session.await;
        }
    });
    addr
}

struct Harness {
    users: Arc<Mutex<Vec<String>>>,
    commands: Arc<Mutex<Vec<String>>>,
    addr: SocketAddr,
}

impl Harness {
    async fn start(authorize_client: bool, reply: Reply) -> Self {
        let users = Arc::new(Mutex::new(Vec::new()));
        let commands = Arc::new(Mutex::new(Vec::new()));
        let authorized = authorize_client.then(|| load_key("id_ed25519_plain").public_key().clone());
        let addr = spawn_server(TokenService {
            authorized,
            reply,
            users: Arc::clone(&users),
            commands: Arc::clone(&commands),
        })
        .await;
        Self {
            users,
            commands,
            addr,
        }
    }

    fn profile(&self) -> Profile {
        Profile::new(
            self.addr.ip().to_string(),
            self.addr.port().to_string(),
            "https://api.example/graphql",
        )
    }
}

fn resolver() -> KeyMaterialResolver {
    KeyMaterialResolver::new(
        Box::new(SystemAgent),
        Box::new(FsKeyFiles),
        Arc::new(TerminalPrompt),
    )
}

fn client_key() -> KeySelection {
    KeySelection::explicit(fixture("id_ed25519_plain"))
}

fn issuer() -> SshTokenIssuer {
    SshTokenIssuer::default().with_timeouts(Duration::from_secs(5), Duration::from_secs(5))
}

#[tokio::test]
async fn test_issue_returns_trimmed_output() {
    let h = Harness::start(
        true,
        Reply {
            stdout: "  eyJhbGciOi.payload.sig\n",
            stderr: "",
            exit_status: 0,
        },
    )
    .await;

    let key = resolver().resolve_selection(&client_key()).await.unwrap();
    let token = issuer().issue(&h.profile(), key).await.unwrap();

    assert_eq!(token.as_str(), "eyJhbGciOi.payload.sig");
    assert_eq!(h.users.lock().unwrap().as_slice(), ["lagoon"]);
    assert_eq!(h.commands.lock().unwrap().as_slice(), ["token"]);
}

#[tokio::test]
async fn test_rejected_key_is_auth_rejected() {
    let h = Harness::start(
        false,
        Reply {
            stdout: "never sent",
            stderr: "",
            exit_status: 0,
        },
    )
    .await;

    let key = resolver().resolve_selection(&client_key()).await.unwrap();
    let err = issuer().issue(&h.profile(), key).await.unwrap_err();

    assert!(matches!(err, Error::AuthRejected(_)), "got {:?}", err);
    assert!(h.commands.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_failing_token_command_keeps_stored_token() {
    let h = Harness::start(
        true,
        Reply {
            stdout: "",
            stderr: "token service unavailable\n",
            exit_status: 1,
        },
    )
    .await;

    let dir = TempDir::new().unwrap();
    let storage = ConfigStorage::with_path(dir.path().join("lagoon.yml"));
    let mut store = ProfileStore::open(storage.clone()).await.unwrap();
    let profile = h.profile();
    let mut fields = ProfileFields::connection(
        profile.hostname.as_str(),
        profile.port.as_str(),
        profile.api_endpoint.as_str(),
    );
    fields.token = Some("old".to_string());
    store.upsert("local", fields).await.unwrap();

    let validator = TokenValidator::new(resolver(), Box::new(issuer()), client_key());
    let mut session = SessionContext::new(store, validator);

    let err = session.login("local").await.unwrap_err();
    match &err {
        Error::RemoteCommand(msg) => assert!(msg.contains("token service unavailable"), "{}", msg),
        other => panic!("unexpected error: {:?}", other),
    }
    assert_eq!(h.commands.lock().unwrap().as_slice(), ["token"]);

    let reloaded = ProfileStore::open(storage).await.unwrap();
    assert_eq!(reloaded.get("local").and_then(|p| p.token()), Some("old"));
}

#[tokio::test]
async fn test_unreachable_host_is_transport_error() {
    // Bind then drop to get a port nobody listens on
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let profile = Profile::new(addr.ip().to_string(), addr.port().to_string(), "https://api");
    let key = resolver().resolve_selection(&client_key()).await.unwrap();
    let err = issuer().issue(&profile, key).await.unwrap_err();

    assert!(matches!(err, Error::Transport(_)), "got {:?}", err);
}
