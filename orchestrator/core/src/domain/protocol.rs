// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Reality Protocol Configuration
//!
//! Generates the cryptographic parameters of a VLESS/Reality endpoint and
//! renders them into the Xray server document and the client connection
//! string.
//!
//! Every call to [`ProtocolTemplate::generate`] yields a fresh X25519 key pair
//! and a fresh 3-byte short id; the rendered document always has the same
//! layout. Keys are encoded as unpadded URL-safe base64, the short id as hex.
//!
//! # Usage
//!
//! ```ignore
//! let template = ProtocolTemplate::generate("www.speedtest.net")?;
//! let document = template.render()?;
//! let link = template.connection_string("10.0.0.5".parse()?);
//! ```

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use handlebars::Handlebars;
use rand_core::{OsRng, RngCore};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use thiserror::Error;
use uuid::Uuid;
use x25519_dalek::{PublicKey, StaticSecret};

/// Port the Reality inbound listens on
pub const REALITY_PORT: u16 = 443;

const FLOW: &str = "xtls-rprx-vision";
const LINK_LABEL: &str = "xray";
const SHORT_ID_LEN: usize = 3;

/// Base Xray server document with `{{...}}` placeholders
pub const BASE_DOCUMENT: &str = include_str!("../../templates/xray_reality.json.hbs");

#[derive(Debug, Error)]
pub enum ProtocolConfigError {
    #[error("Entropy source failure: {0}")]
    Entropy(String),

    #[error("Failed to render protocol document: {0}")]
    Render(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TemplateId(pub Uuid);

impl TemplateId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TemplateId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TemplateId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A Reality configuration: identity, camouflage domain and key material.
///
/// The template id doubles as the VLESS client id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolTemplate {
    pub id: TemplateId,
    pub fake_domain: String,
    pub private_key: String,
    pub public_key: String,
    pub short_id: String,
    pub base: String,
}

#[derive(Serialize)]
struct RenderContext<'a> {
    client_id: String,
    flow: &'a str,
    fake_domain: &'a str,
    private_key: &'a str,
    short_id: &'a str,
    port: u16,
}

impl ProtocolTemplate {
    /// Generate a fresh configuration for `fake_domain`.
    ///
    /// `fake_domain` carries no scheme, e.g. `www.speedtest.net`.
    pub fn generate(fake_domain: &str) -> Result<Self, ProtocolConfigError> {
        let (private_key, public_key) = generate_key_pair()?;

        let mut short_id = [0u8; SHORT_ID_LEN];
        OsRng
            .try_fill_bytes(&mut short_id)
            .map_err(|e| ProtocolConfigError::Entropy(e.to_string()))?;

        Ok(Self {
            id: TemplateId::new(),
            fake_domain: fake_domain.to_string(),
            private_key: URL_SAFE_NO_PAD.encode(private_key),
            public_key: URL_SAFE_NO_PAD.encode(public_key),
            short_id: hex::encode(short_id),
            base: BASE_DOCUMENT.to_string(),
        })
    }

    /// Render the Xray server document.
    pub fn render(&self) -> Result<String, ProtocolConfigError> {
        let mut handlebars = Handlebars::new();
        handlebars.register_escape_fn(handlebars::no_escape);
        handlebars.set_strict_mode(true);

        let context = RenderContext {
            client_id: self.id.to_string(),
            flow: FLOW,
            fake_domain: &self.fake_domain,
            private_key: &self.private_key,
            short_id: &self.short_id,
            port: REALITY_PORT,
        };

        handlebars
            .render_template(&self.base, &context)
            .map_err(|e| ProtocolConfigError::Render(e.to_string()))
    }

    /// Client-facing `vless://` link for a server reachable at `ip`.
    pub fn connection_string(&self, ip: IpAddr) -> String {
        format!(
            "vless://{}@{}?flow={}&type=raw&security=reality&sni={}&pbk={}&sid={}#{}",
            self.id,
            SocketAddr::new(ip, REALITY_PORT),
            FLOW,
            self.fake_domain,
            self.public_key,
            self.short_id,
            LINK_LABEL,
        )
    }
}

/// Clamped X25519 scalar and its public point.
fn generate_key_pair() -> Result<([u8; 32], [u8; 32]), ProtocolConfigError> {
    let mut scalar = [0u8; 32];
    OsRng
        .try_fill_bytes(&mut scalar)
        .map_err(|e| ProtocolConfigError::Entropy(e.to_string()))?;

    scalar[0] &= 248;
    scalar[31] &= 127;
    scalar[31] |= 64;

    let secret = StaticSecret::from(scalar);
    let public = PublicKey::from(&secret);
    Ok((scalar, public.to_bytes()))
}
