//! SSH Key Material Resolution
//!
//! Turns "which key should I use" into a ready [`KeyHandle`]:
//! 1. the SSH Agent, when allowed and holding at least one key
//! 2. the key file at the preferred path, unencrypted
//! 3. the same file decrypted with an interactively entered passphrase
//!    (two prompts at most)
//!
//! Agent access, key file reads and the passphrase prompt sit behind small
//! traits so the resolution order can be exercised without a terminal or a
//! running agent.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use russh::client::Handle;
use russh::keys::key::PrivateKeyWithHashAlg;
use russh::keys::PrivateKey;
use thiserror::Error;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use super::agent::SystemAgent;
use super::client::ClientHandler;
use super::error::SshError;

/// Passphrase prompts before giving up on an encrypted key
pub const PASSPHRASE_ATTEMPTS: usize = 2;

/// Errors that can occur while resolving key material
#[derive(Debug, Error)]
pub enum KeyError {
    #[error("Key file {path} could not be read: {source}")]
    NotFound {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Unusable key material: {0}")]
    AuthMaterial(String),

    #[error("Passphrase prompt failed: {0}")]
    Prompt(#[source] io::Error),
}

/// A live agent connection able to answer signing requests
#[async_trait]
pub trait KeyAgent: Send {
    fn key_count(&self) -> usize;

    /// Offer each agent key to the server. `Ok(false)` means every key was
    /// rejected.
    async fn authenticate(
        &mut self,
        handle: &mut Handle<ClientHandler>,
        username: &str,
    ) -> Result<bool, SshError>;
}

/// Opens agent connections
#[async_trait]
pub trait AgentConnector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn KeyAgent>, SshError>;
}

/// Reads private key files
#[async_trait]
pub trait KeyFileSource: Send + Sync {
    async fn read(&self, path: &Path) -> io::Result<String>;
}

/// Asks the operator for a key passphrase without echoing it
pub trait PassphrasePrompt: Send + Sync {
    fn prompt(&self, key_path: &Path) -> io::Result<Zeroizing<String>>;
}

/// Key files on the local filesystem
#[derive(Debug, Clone, Copy, Default)]
pub struct FsKeyFiles;

#[async_trait]
impl KeyFileSource for FsKeyFiles {
    async fn read(&self, path: &Path) -> io::Result<String> {
        tokio::fs::read_to_string(path).await
    }
}

/// Hidden-input prompt on the controlling terminal
#[derive(Debug, Clone, Copy, Default)]
pub struct TerminalPrompt;

impl PassphrasePrompt for TerminalPrompt {
    fn prompt(&self, key_path: &Path) -> io::Result<Zeroizing<String>> {
        dialoguer::Password::new()
            .with_prompt(format!("Enter passphrase for '{}'", key_path.display()))
            .allow_empty_password(true)
            .interact()
            .map(Zeroizing::new)
            .map_err(|e| io::Error::other(e.to_string()))
    }
}

/// Resolved credential for one authentication attempt.
///
/// Dropping the handle releases whatever it holds (the agent socket, the
/// decrypted key).
pub enum KeyHandle {
    Agent(Box<dyn KeyAgent>),
    File { path: PathBuf, key: Arc<PrivateKey> },
}

impl KeyHandle {
    pub fn is_agent(&self) -> bool {
        matches!(self, KeyHandle::Agent(_))
    }

    pub fn describe(&self) -> String {
        match self {
            KeyHandle::Agent(agent) => format!("ssh-agent ({} key(s))", agent.key_count()),
            KeyHandle::File { path, key } => format!("{} ({})", path.display(), key.algorithm()),
        }
    }

    /// Authenticate `username` on an established transport.
    ///
    /// Returns `Ok(false)` when the server rejected the key(s).
    pub async fn authenticate(
        &mut self,
        handle: &mut Handle<ClientHandler>,
        username: &str,
    ) -> Result<bool, SshError> {
        match self {
            KeyHandle::Agent(agent) => agent.authenticate(handle, username).await,
            KeyHandle::File { key, .. } => {
                let hash_alg = if key.algorithm().is_rsa() {
                    handle.best_supported_rsa_hash().await?.flatten()
                } else {
                    None
                };
                let result = handle
                    .authenticate_publickey(username, PrivateKeyWithHashAlg::new(key.clone(), hash_alg))
                    .await?;
                Ok(result.success())
            }
        }
    }
}

impl std::fmt::Debug for KeyHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("KeyHandle").field(&self.describe()).finish()
    }
}

/// Which key the operator asked for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySelection {
    pub path: PathBuf,
    pub allow_agent: bool,
}

impl KeySelection {
    /// `~/.ssh/id_rsa`, agent first
    pub fn default_key() -> Self {
        Self {
            path: default_key_path(),
            allow_agent: true,
        }
    }

    /// An explicitly chosen key file; the agent is never consulted
    pub fn explicit(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            allow_agent: false,
        }
    }

    pub fn from_flag(path: Option<PathBuf>) -> Self {
        path.map(Self::explicit).unwrap_or_else(Self::default_key)
    }
}

/// Resolves key material in agent → file → passphrase order
pub struct KeyMaterialResolver {
    agent: Box<dyn AgentConnector>,
    files: Box<dyn KeyFileSource>,
    prompt: Arc<dyn PassphrasePrompt>,
}

impl KeyMaterialResolver {
    pub fn new(
        agent: Box<dyn AgentConnector>,
        files: Box<dyn KeyFileSource>,
        prompt: Arc<dyn PassphrasePrompt>,
    ) -> Self {
        Self { agent, files, prompt }
    }

    /// System agent, local files, terminal prompt
    pub fn system() -> Self {
        Self::new(Box::new(SystemAgent), Box::new(FsKeyFiles), Arc::new(TerminalPrompt))
    }

    pub async fn resolve_selection(&self, selection: &KeySelection) -> Result<KeyHandle, KeyError> {
        self.resolve(&selection.path, selection.allow_agent).await
    }

    pub async fn resolve(&self, preferred_path: &Path, allow_agent: bool) -> Result<KeyHandle, KeyError> {
        if allow_agent {
            match self.agent.connect().await {
                Ok(agent) if agent.key_count() > 0 => {
                    info!("Using SSH Agent with {} key(s)", agent.key_count());
                    return Ok(KeyHandle::Agent(agent));
                }
                Ok(_) => debug!("SSH Agent holds no keys, falling back to key file"),
                Err(e) => debug!("SSH Agent unavailable ({}), falling back to key file", e),
            }
        }

        let path = expand_tilde(preferred_path);
        debug!("Loading key from: {:?}", path);
        let key_data = self
            .files
            .read(&path)
            .await
            .map_err(|source| KeyError::NotFound {
                path: path.clone(),
                source,
            })?;
        let key_data = Zeroizing::new(key_data);

        match decode_key(&key_data, None).await {
            Ok(key) => return Ok(file_handle(path, key)),
            Err(DecodeFailure::Encrypted) => {
                info!("Key {:?} is passphrase protected", path);
            }
            Err(DecodeFailure::Invalid(msg)) => {
                return Err(KeyError::AuthMaterial(format!(
                    "failed to parse {}: {}",
                    path.display(),
                    msg
                )))
            }
        }

        for attempt in 1..=PASSPHRASE_ATTEMPTS {
            let passphrase = self.ask_passphrase(&path).await?;
            match decode_key(&key_data, Some(passphrase)).await {
                Ok(key) => return Ok(file_handle(path, key)),
                Err(e) => warn!(
                    "Could not decrypt {:?} (attempt {}/{}): {}",
                    path, attempt, PASSPHRASE_ATTEMPTS, e
                ),
            }
        }

        Err(KeyError::AuthMaterial(format!(
            "could not decrypt {} after {} passphrase attempts",
            path.display(),
            PASSPHRASE_ATTEMPTS
        )))
    }

    async fn ask_passphrase(&self, path: &Path) -> Result<Zeroizing<String>, KeyError> {
        let prompt = Arc::clone(&self.prompt);
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || prompt.prompt(&path))
            .await
            .map_err(|e| KeyError::Prompt(io::Error::other(e.to_string())))?
            .map_err(KeyError::Prompt)
    }
}

fn file_handle(path: PathBuf, key: PrivateKey) -> KeyHandle {
    info!("Loaded {} key from {:?}", key.algorithm(), path);
    KeyHandle::File {
        path,
        key: Arc::new(key),
    }
}

#[derive(Debug, Error)]
enum DecodeFailure {
    #[error("key is encrypted")]
    Encrypted,

    #[error("{0}")]
    Invalid(String),
}

/// Decode off the async runtime; bcrypt-pbkdf is deliberately slow
async fn decode_key(
    key_data: &Zeroizing<String>,
    passphrase: Option<Zeroizing<String>>,
) -> Result<PrivateKey, DecodeFailure> {
    let key_data = key_data.clone();
    tokio::task::spawn_blocking(move || decode_key_sync(&key_data, passphrase.as_deref().map(String::as_str)))
        .await
        .map_err(|e| DecodeFailure::Invalid(format!("Task join error: {}", e)))?
}

fn decode_key_sync(key_data: &str, passphrase: Option<&str>) -> Result<PrivateKey, DecodeFailure> {
    // Legacy PEM keys announce encryption in a header
    let pem_encrypted = key_data.contains("Proc-Type: 4,ENCRYPTED")
        || key_data.contains("BEGIN ENCRYPTED PRIVATE KEY");
    if pem_encrypted && passphrase.is_none() {
        return Err(DecodeFailure::Encrypted);
    }

    russh::keys::decode_secret_key(key_data, passphrase).map_err(|e| match e {
        russh::keys::Error::KeyIsEncrypted => DecodeFailure::Encrypted,
        other => DecodeFailure::Invalid(other.to_string()),
    })
}

/// `~/.ssh/id_rsa`
pub fn default_key_path() -> PathBuf {
    let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
    home.join(".ssh").join("id_rsa")
}

/// Expand ~ to home directory
pub fn expand_tilde(path: &Path) -> PathBuf {
    let path_str = path.to_string_lossy();

    if let Some(stripped) = path_str.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    } else if path_str == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }

    path.to_path_buf()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn fixture(name: &str) -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("tests/fixtures")
            .join(name)
    }

    struct FakeAgent {
        keys: usize,
    }

    #[async_trait]
    impl KeyAgent for FakeAgent {
        fn key_count(&self) -> usize {
            self.keys
        }

        async fn authenticate(
            &mut self,
            _handle: &mut Handle<ClientHandler>,
            _username: &str,
        ) -> Result<bool, SshError> {
            Ok(self.keys > 0)
        }
    }

    enum AgentMode {
        Keys(usize),
        Unreachable,
    }

    struct FakeConnector {
        mode: AgentMode,
        connects: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl AgentConnector for FakeConnector {
        async fn connect(&self) -> Result<Box<dyn KeyAgent>, SshError> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            match self.mode {
                AgentMode::Keys(keys) => Ok(Box::new(FakeAgent { keys })),
                AgentMode::Unreachable => Err(SshError::AgentNotAvailable("no socket".to_string())),
            }
        }
    }

    struct CountingFiles {
        reads: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl KeyFileSource for CountingFiles {
        async fn read(&self, path: &Path) -> io::Result<String> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            FsKeyFiles.read(path).await
        }
    }

    struct ScriptedPrompt {
        answers: Mutex<Vec<&'static str>>,
        asked: Arc<AtomicUsize>,
    }

    impl PassphrasePrompt for ScriptedPrompt {
        fn prompt(&self, _key_path: &Path) -> io::Result<Zeroizing<String>> {
            self.asked.fetch_add(1, Ordering::SeqCst);
            let mut answers = self.answers.lock().unwrap();
            if answers.is_empty() {
                return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "no more answers"));
            }
            Ok(Zeroizing::new(answers.remove(0).to_string()))
        }
    }

    struct Harness {
        resolver: KeyMaterialResolver,
        connects: Arc<AtomicUsize>,
        reads: Arc<AtomicUsize>,
        asked: Arc<AtomicUsize>,
    }

    fn harness(mode: AgentMode, answers: Vec<&'static str>) -> Harness {
        let connects = Arc::new(AtomicUsize::new(0));
        let reads = Arc::new(AtomicUsize::new(0));
        let asked = Arc::new(AtomicUsize::new(0));
        let resolver = KeyMaterialResolver::new(
            Box::new(FakeConnector {
                mode,
                connects: connects.clone(),
            }),
            Box::new(CountingFiles { reads: reads.clone() }),
            Arc::new(ScriptedPrompt {
                answers: Mutex::new(answers),
                asked: asked.clone(),
            }),
        );
        Harness {
            resolver,
            connects,
            reads,
            asked,
        }
    }

    #[tokio::test]
    async fn test_agent_with_keys_skips_file() {
        let h = harness(AgentMode::Keys(2), vec![]);

        let handle = h
            .resolver
            .resolve(&fixture("id_ed25519_plain"), true)
            .await
            .unwrap();

        assert!(handle.is_agent());
        assert_eq!(h.reads.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_empty_agent_falls_through_to_file() {
        let h = harness(AgentMode::Keys(0), vec![]);

        let handle = h
            .resolver
            .resolve(&fixture("id_ed25519_plain"), true)
            .await
            .unwrap();

        assert!(!handle.is_agent());
        assert_eq!(h.reads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unreachable_agent_falls_through_to_file() {
        let h = harness(AgentMode::Unreachable, vec![]);

        let handle = h
            .resolver
            .resolve(&fixture("id_ed25519_plain"), true)
            .await
            .unwrap();

        assert!(!handle.is_agent());
    }

    #[tokio::test]
    async fn test_agent_disallowed_is_never_contacted() {
        let h = harness(AgentMode::Keys(1), vec![]);

        let handle = h
            .resolver
            .resolve(&fixture("id_ed25519_plain"), false)
            .await
            .unwrap();

        assert!(!handle.is_agent());
        assert_eq!(h.connects.load(Ordering::SeqCst), 0);
        assert_eq!(h.asked.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_missing_file_is_key_not_found() {
        let h = harness(AgentMode::Unreachable, vec![]);

        let err = h
            .resolver
            .resolve(&fixture("does_not_exist"), true)
            .await
            .unwrap_err();

        assert!(matches!(err, KeyError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_garbage_file_is_auth_material_error() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("id_rsa");
        std::fs::write(&path, "not a key").unwrap();
        let h = harness(AgentMode::Unreachable, vec!["unused"]);

        let err = h.resolver.resolve(&path, false).await.unwrap_err();

        assert!(matches!(err, KeyError::AuthMaterial(_)));
        assert_eq!(h.asked.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_encrypted_key_correct_passphrase() {
        let h = harness(AgentMode::Unreachable, vec!["correct horse"]);

        let handle = h
            .resolver
            .resolve(&fixture("id_ed25519_locked"), false)
            .await
            .unwrap();

        assert!(!handle.is_agent());
        assert_eq!(h.asked.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_encrypted_key_second_prompt_succeeds() {
        let h = harness(AgentMode::Unreachable, vec!["wrong", "correct horse"]);

        let handle = h.resolver.resolve(&fixture("id_ed25519_locked"), false).await;

        assert!(handle.is_ok());
        assert_eq!(h.asked.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_encrypted_key_two_wrong_passphrases() {
        let h = harness(AgentMode::Unreachable, vec!["wrong", "still wrong", "correct horse"]);

        let err = h
            .resolver
            .resolve(&fixture("id_ed25519_locked"), false)
            .await
            .unwrap_err();

        assert!(matches!(err, KeyError::AuthMaterial(_)));
        assert_eq!(h.asked.load(Ordering::SeqCst), PASSPHRASE_ATTEMPTS);
    }

    #[test]
    fn test_key_selection_from_flag() {
        let explicit = KeySelection::from_flag(Some(PathBuf::from("/keys/deploy")));
        assert!(!explicit.allow_agent);
        assert_eq!(explicit.path, PathBuf::from("/keys/deploy"));

        let default = KeySelection::from_flag(None);
        assert!(default.allow_agent);
        assert!(default.path.ends_with(".ssh/id_rsa"));
    }

    #[test]
    fn test_expand_tilde() {
        let path = expand_tilde(Path::new("~/.ssh/id_rsa"));
        assert!(!path.to_string_lossy().starts_with('~'));
    }
}
