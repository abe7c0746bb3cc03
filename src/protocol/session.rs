//! Secure session: X25519 key agreement, HKDF-SHA256 key schedule and a
//! ChaCha20-Poly1305 channel with sliding-window replay protection.
//!
//! ## Key schedule
//! ```text
//! shared = X25519(own_private, peer_public)
//! okm    = HKDF-SHA256(salt, shared).expand("ToS-UE5 v1", 64)
//! okm[0..32]  server -> client
//! okm[32..64] client -> server
//! ```
//! The client transmits with the client->server key and the server mirrors
//! it, so one side's `tx_key` is always the other's `rx_key`.
//!
//! ## Nonces
//! `connection_id (u32 LE) || sequence (u64 LE)`. `seq_tx` advances exactly
//! once per sealed payload and never moves backwards.

use crate::core::packet::{PUBLIC_KEY_SIZE, SALT_SIZE};
use crate::error::{constants, ProtocolError, Result};
use crate::utils::compression::{maybe_compress, maybe_decompress};
use crate::utils::metrics::global_metrics;
use crate::utils::replay_window::ReplayWindow;
use chacha20poly1305::aead::{Aead, Payload};
use chacha20poly1305::{ChaCha20Poly1305, KeyInit, Nonce};
use hkdf::Hkdf;
use rand_core::{OsRng, RngCore};
use sha2::Sha256;
use std::time::{Duration, Instant};
use tracing::{debug, instrument, warn};
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::Zeroize;

/// HKDF info string for the initial key pair.
pub const KDF_INFO: &[u8] = b"ToS-UE5 v1";

/// HKDF info prefix for rekeying; the epoch follows as u64 LE.
pub const REKEY_INFO: &[u8] = b"rekey";

pub const KEY_SIZE: usize = 32;

pub const NONCE_SIZE: usize = 12;

/// Poly1305 tag appended to every sealed payload.
pub const TAG_SIZE: usize = 16;

/// Sealed payloads above this size are offered to the compressor.
pub const COMPRESSION_THRESHOLD: usize = 512;

pub const DEFAULT_REKEY_BYTES: u64 = 1 << 30;

pub const DEFAULT_REKEY_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Which end of the key agreement this session belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

/// X25519 keypair for the client side of the handshake.
///
/// The public half travels in the `Connect` packet; the private half is
/// consumed by [`SecureSession::initialize_as_client`].
pub struct ClientKeyPair {
    secret: StaticSecret,
    public: [u8; PUBLIC_KEY_SIZE],
}

impl ClientKeyPair {
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret).to_bytes();
        Self { secret, public }
    }

    pub fn public(&self) -> &[u8; PUBLIC_KEY_SIZE] {
        &self.public
    }

    pub fn private_bytes(&self) -> [u8; KEY_SIZE] {
        self.secret.to_bytes()
    }
}

impl std::fmt::Debug for ClientKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientKeyPair")
            .field("public", &self.public)
            .finish_non_exhaustive()
    }
}

/// Established AEAD channel state for one connection.
pub struct SecureSession {
    tx_key: [u8; KEY_SIZE],
    rx_key: [u8; KEY_SIZE],
    salt: [u8; SALT_SIZE],
    role: Role,
    connection_id: u32,
    seq_tx: u64,
    replay: ReplayWindow,
    epoch: u64,
    bytes_transmitted: u64,
    established_at: Instant,
    rekey_bytes_threshold: u64,
    rekey_interval: Duration,
    compression_threshold: usize,
}

fn fixed<const N: usize>(bytes: &[u8]) -> Result<[u8; N]> {
    bytes
        .try_into()
        .map_err(|_| ProtocolError::KeyAgreement(constants::ERR_KEY_LENGTH))
}

/// Expand 64 bytes of key material and split it into (s2c, c2s).
fn expand_pair(salt: &[u8], ikm: &[u8], info: &[u8]) -> Result<([u8; KEY_SIZE], [u8; KEY_SIZE])> {
    let hk = Hkdf::<Sha256>::new(Some(salt), ikm);
    let mut okm = [0u8; KEY_SIZE * 2];
    hk.expand(info, &mut okm)
        .map_err(|_| ProtocolError::KeyAgreement(constants::ERR_KDF_EXPAND))?;

    let mut s2c = [0u8; KEY_SIZE];
    let mut c2s = [0u8; KEY_SIZE];
    s2c.copy_from_slice(&okm[..KEY_SIZE]);
    c2s.copy_from_slice(&okm[KEY_SIZE..]);
    okm.zeroize();
    Ok((s2c, c2s))
}

impl SecureSession {
    fn from_shared(
        role: Role,
        shared: &[u8],
        salt: [u8; SALT_SIZE],
        connection_id: u32,
    ) -> Result<Self> {
        let (s2c, c2s) = expand_pair(&salt, shared, KDF_INFO)?;
        let (tx_key, rx_key) = match role {
            Role::Client => (c2s, s2c),
            Role::Server => (s2c, c2s),
        };

        Ok(Self {
            tx_key,
            rx_key,
            salt,
            role,
            connection_id,
            seq_tx: 0,
            replay: ReplayWindow::new(),
            epoch: 0,
            bytes_transmitted: 0,
            established_at: Instant::now(),
            rekey_bytes_threshold: DEFAULT_REKEY_BYTES,
            rekey_interval: DEFAULT_REKEY_INTERVAL,
            compression_threshold: COMPRESSION_THRESHOLD,
        })
    }

    /// Derive the client half of a session from the server's
    /// `ConnectionAccepted` material.
    ///
    /// # Errors
    /// `ProtocolError::KeyAgreement` when a key or the salt has the wrong
    /// length, or when the server key is low-order.
    #[instrument(skip(client_private, server_public, salt))]
    pub fn initialize_as_client(
        client_private: &[u8],
        server_public: &[u8],
        salt: &[u8],
        connection_id: u32,
    ) -> Result<Self> {
        let mut private = fixed::<KEY_SIZE>(client_private)?;
        let server_public = fixed::<PUBLIC_KEY_SIZE>(server_public)?;
        let salt = fixed::<SALT_SIZE>(salt)?;

        let secret = StaticSecret::from(private);
        private.zeroize();
        let shared = secret.diffie_hellman(&PublicKey::from(server_public));
        if !shared.was_contributory() {
            warn!(security = true, connection_id, "non-contributory server key");
            return Err(ProtocolError::KeyAgreement(constants::ERR_NON_CONTRIBUTORY));
        }

        let session = Self::from_shared(Role::Client, shared.as_bytes(), salt, connection_id)?;
        debug!(connection_id, "client session keys derived");
        Ok(session)
    }

    /// Answer a client's public key: generates the server keypair and salt
    /// and returns them with the server half of the session.
    ///
    /// # Errors
    /// Same conditions as [`initialize_as_client`](Self::initialize_as_client).
    #[instrument(skip(client_public))]
    pub fn create_as_server(
        client_public: &[u8],
        connection_id: u32,
    ) -> Result<([u8; PUBLIC_KEY_SIZE], [u8; SALT_SIZE], Self)> {
        let client_public = fixed::<PUBLIC_KEY_SIZE>(client_public)?;

        let secret = StaticSecret::random_from_rng(OsRng);
        let server_public = PublicKey::from(&secret).to_bytes();
        let mut salt = [0u8; SALT_SIZE];
        OsRng.fill_bytes(&mut salt);

        let shared = secret.diffie_hellman(&PublicKey::from(client_public));
        if !shared.was_contributory() {
            warn!(security = true, connection_id, "non-contributory client key");
            return Err(ProtocolError::KeyAgreement(constants::ERR_NON_CONTRIBUTORY));
        }

        let session = Self::from_shared(Role::Server, shared.as_bytes(), salt, connection_id)?;
        debug!(connection_id, "server session keys derived");
        Ok((server_public, salt, session))
    }

    /// Override the rekey thresholds (defaults: 1 GiB, 60 minutes).
    pub fn with_rekey_policy(mut self, bytes: u64, interval: Duration) -> Self {
        self.rekey_bytes_threshold = bytes;
        self.rekey_interval = interval;
        self
    }

    pub fn with_compression_threshold(mut self, threshold: usize) -> Self {
        self.compression_threshold = threshold;
        self
    }

    pub fn generate_nonce(&self, sequence: u64) -> [u8; NONCE_SIZE] {
        let mut nonce = [0u8; NONCE_SIZE];
        nonce[..4].copy_from_slice(&self.connection_id.to_le_bytes());
        nonce[4..].copy_from_slice(&sequence.to_le_bytes());
        nonce
    }

    fn seal(&self, sequence: u64, plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
        let cipher = ChaCha20Poly1305::new_from_slice(&self.tx_key)
            .map_err(|_| ProtocolError::EncryptionFailure)?;
        let nonce = self.generate_nonce(sequence);
        cipher
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: plaintext,
                    aad,
                },
            )
            .map_err(|_| ProtocolError::EncryptionFailure)
    }

    /// Seal `plaintext` under the current `seq_tx`, then advance it.
    ///
    /// The sequence used is `seq_tx()` as read before the call.
    pub fn encrypt_payload(&mut self, plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
        let sealed = self.seal(self.seq_tx, plaintext, aad)?;
        self.seq_tx += 1;
        self.bytes_transmitted += sealed.len() as u64;
        Ok(sealed)
    }

    /// Seal at an explicit sequence. `seq_tx` moves past `sequence` if it was
    /// not already beyond it, so the internal counter never reuses it.
    pub fn encrypt_payload_with_sequence(
        &mut self,
        plaintext: &[u8],
        aad: &[u8],
        sequence: u64,
    ) -> Result<Vec<u8>> {
        let sealed = self.seal(sequence, plaintext, aad)?;
        self.seq_tx = self.seq_tx.max(sequence.saturating_add(1));
        self.bytes_transmitted += sealed.len() as u64;
        Ok(sealed)
    }

    /// Seal, then compress the sealed bytes when they exceed the compression
    /// threshold ([`COMPRESSION_THRESHOLD`] unless overridden) and the result
    /// is strictly smaller.
    ///
    /// Returns the wire payload and whether it was compressed.
    pub fn encrypt_payload_compressed(
        &mut self,
        plaintext: &[u8],
        aad: &[u8],
    ) -> Result<(Vec<u8>, bool)> {
        let sealed = self.encrypt_payload(plaintext, aad)?;
        Ok(maybe_compress(&sealed, self.compression_threshold))
    }

    pub fn is_sequence_valid(&self, sequence: u64) -> bool {
        self.replay.is_valid(sequence)
    }

    pub fn update_replay_window(&mut self, sequence: u64) {
        self.replay.update(sequence);
    }

    /// Open a payload sealed by the peer at `sequence`.
    ///
    /// The replay window is only advanced after authentication succeeds.
    ///
    /// # Errors
    /// `ProtocolError::ReplayDetected` for a replayed or expired sequence and
    /// `ProtocolError::DecryptionFailure` when authentication fails.
    pub fn decrypt_payload(&mut self, ciphertext: &[u8], aad: &[u8], sequence: u64) -> Result<Vec<u8>> {
        if !self.is_sequence_valid(sequence) {
            global_metrics().replay_rejection();
            warn!(
                security = true,
                connection_id = self.connection_id,
                sequence,
                highest = self.replay.highest(),
                "replayed secure datagram rejected"
            );
            return Err(ProtocolError::ReplayDetected(sequence));
        }

        let cipher = ChaCha20Poly1305::new_from_slice(&self.rx_key)
            .map_err(|_| ProtocolError::DecryptionFailure)?;
        let nonce = self.generate_nonce(sequence);
        let plaintext = cipher
            .decrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: ciphertext,
                    aad,
                },
            )
            .map_err(|_| {
                global_metrics().decrypt_failure();
                warn!(
                    security = true,
                    connection_id = self.connection_id,
                    sequence,
                    "secure datagram failed authentication"
                );
                ProtocolError::DecryptionFailure
            })?;

        self.update_replay_window(sequence);
        Ok(plaintext)
    }

    /// Decompress when `compressed` is set, then [`decrypt_payload`](Self::decrypt_payload).
    pub fn decrypt_payload_compressed(
        &mut self,
        payload: &[u8],
        aad: &[u8],
        sequence: u64,
        compressed: bool,
    ) -> Result<Vec<u8>> {
        let sealed = maybe_decompress(payload, compressed)?;
        self.decrypt_payload(&sealed, aad, sequence)
    }

    pub fn should_rekey(&self) -> bool {
        self.bytes_transmitted >= self.rekey_bytes_threshold
            || self.established_at.elapsed() >= self.rekey_interval
    }

    /// Replace both keys with ones derived from the current pair.
    ///
    /// Both ends must call this at the same point in the stream; the new
    /// keys depend only on the old keys, the salt and the rekey count.
    /// Resets `seq_tx`, the replay window and the rekey counters.
    pub fn perform_rekey(&mut self) -> Result<()> {
        let (s2c, c2s) = match self.role {
            Role::Client => (&self.rx_key, &self.tx_key),
            Role::Server => (&self.tx_key, &self.rx_key),
        };
        let mut ikm = [0u8; KEY_SIZE * 2];
        ikm[..KEY_SIZE].copy_from_slice(s2c);
        ikm[KEY_SIZE..].copy_from_slice(c2s);

        let next_epoch = self.epoch + 1;
        let mut info = Vec::with_capacity(REKEY_INFO.len() + 8);
        info.extend_from_slice(REKEY_INFO);
        info.extend_from_slice(&next_epoch.to_le_bytes());

        let derived = expand_pair(&self.salt, &ikm, &info);
        ikm.zeroize();
        let (new_s2c, new_c2s) = derived?;

        self.tx_key.zeroize();
        self.rx_key.zeroize();
        (self.tx_key, self.rx_key) = match self.role {
            Role::Client => (new_c2s, new_s2c),
            Role::Server => (new_s2c, new_c2s),
        };

        self.epoch = next_epoch;
        self.seq_tx = 0;
        self.replay.reset();
        self.bytes_transmitted = 0;
        self.established_at = Instant::now();
        debug!(connection_id = self.connection_id, epoch = self.epoch, "session rekeyed");
        Ok(())
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn connection_id(&self) -> u32 {
        self.connection_id
    }

    /// Next sequence `encrypt_payload` will use.
    pub fn seq_tx(&self) -> u64 {
        self.seq_tx
    }

    /// Highest sequence accepted from the peer.
    pub fn seq_rx_highest(&self) -> u64 {
        self.replay.highest()
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Sealed bytes produced since the session was established or rekeyed.
    pub fn bytes_transmitted(&self) -> u64 {
        self.bytes_transmitted
    }

    pub fn salt(&self) -> &[u8; SALT_SIZE] {
        &self.salt
    }
}

impl Drop for SecureSession {
    fn drop(&mut self) {
        self.tx_key.zeroize();
        self.rx_key.zeroize();
        self.salt.zeroize();
    }
}

impl std::fmt::Debug for SecureSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecureSession")
            .field("role", &self.role)
            .field("connection_id", &self.connection_id)
            .field("seq_tx", &self.seq_tx)
            .field("seq_rx_highest", &self.replay.highest())
            .field("epoch", &self.epoch)
            .finish_non_exhaustive()
    }
}
