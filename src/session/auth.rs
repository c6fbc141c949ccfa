//! Authentication header construction (spec §4.5). Digest implements the
//! full RFC 2617 `MD5` `HA1`/`HA2`/`response` computation with
//! nonce-count and client nonce; NTLM is deliberately limited to the
//! Type-1 negotiate message per the spec's open-question resolution
//! (SPEC_FULL.md §9.1) — a Type-2 challenge is not handled here.

use base64::Engine;
use md5::{Digest, Md5};
use rand::RngCore;

#[derive(Debug, Clone)]
pub enum AuthScheme {
    Basic {
        username: String,
        password: String,
    },
    Bearer {
        token: String,
    },
    Digest {
        username: String,
        password: String,
        realm: String,
        nonce: String,
        qop: Option<String>,
        opaque: Option<String>,
        algorithm: Option<String>,
    },
    /// Type-1 negotiate only; see module docs.
    Ntlm {
        domain: String,
        workstation: String,
    },
}

fn md5_hex(input: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

/// Builds the `Authorization` header value for one request. `method` and
/// `uri` are only consumed by Digest, which binds the response hash to
/// them.
pub fn build_authorization_header(scheme: &AuthScheme, method: &str, uri: &str) -> String {
    match scheme {
        AuthScheme::Basic { username, password } => {
            let raw = format!("{username}:{password}");
            let encoded = base64::engine::general_purpose::STANDARD.encode(raw);
            format!("Basic {encoded}")
        }
        AuthScheme::Bearer { token } => format!("Bearer {token}"),
        AuthScheme::Digest {
            username,
            password,
            realm,
            nonce,
            qop,
            opaque,
            algorithm,
        } => {
            let ha1 = md5_hex(&format!("{username}:{realm}:{password}"));
            let ha2 = md5_hex(&format!("{method}:{uri}"));
            let nc = "00000001";
            let cnonce = generate_cnonce();

            let response = match qop.as_deref() {
                Some(qop_value) => md5_hex(&format!("{ha1}:{nonce}:{nc}:{cnonce}:{qop_value}:{ha2}")),
                None => md5_hex(&format!("{ha1}:{nonce}:{ha2}")),
            };

            let mut header = format!(
                "Digest username=\"{username}\", realm=\"{realm}\", nonce=\"{nonce}\", uri=\"{uri}\", response=\"{response}\""
            );
            if let Some(qop_value) = qop {
                header.push_str(&format!(", qop={qop_value}, nc={nc}, cnonce=\"{cnonce}\""));
            }
            if let Some(opaque_value) = opaque {
                header.push_str(&format!(", opaque=\"{opaque_value}\""));
            }
            if let Some(algorithm_value) = algorithm {
                header.push_str(&format!(", algorithm={algorithm_value}"));
            }
            header
        }
        AuthScheme::Ntlm { domain, workstation } => {
            let message = build_ntlm_type1(domain, workstation);
            let encoded = base64::engine::general_purpose::STANDARD.encode(message);
            format!("NTLM {encoded}")
        }
    }
}

fn generate_cnonce() -> String {
    let mut bytes = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

const NTLM_SIGNATURE: &[u8] = b"NTLMSSP\0";
const NTLM_NEGOTIATE_MESSAGE_TYPE: u32 = 1;
const NTLM_FLAGS: u32 = 0x0000_8207; // NEGOTIATE_UNICODE | NEGOTIATE_OEM | REQUEST_TARGET | NEGOTIATE_NTLM

/// Builds a minimal Type-1 NTLM negotiate message (domain/workstation are
/// embedded, matching the reference implementation's Type-1 stub rather
/// than a full handshake).
fn build_ntlm_type1(domain: &str, workstation: &str) -> Vec<u8> {
    let mut msg = Vec::new();
    msg.extend_from_slice(NTLM_SIGNATURE);
    msg.extend_from_slice(&NTLM_NEGOTIATE_MESSAGE_TYPE.to_le_bytes());
    msg.extend_from_slice(&NTLM_FLAGS.to_le_bytes());

    let header_len = 32;
    let domain_bytes = domain.as_bytes();
    let workstation_bytes = workstation.as_bytes();

    // domain security buffer
    msg.extend_from_slice(&(domain_bytes.len() as u16).to_le_bytes());
    msg.extend_from_slice(&(domain_bytes.len() as u16).to_le_bytes());
    msg.extend_from_slice(&(header_len as u32).to_le_bytes());

    // workstation security buffer
    let workstation_offset = header_len + domain_bytes.len();
    msg.extend_from_slice(&(workstation_bytes.len() as u16).to_le_bytes());
    msg.extend_from_slice(&(workstation_bytes.len() as u16).to_le_bytes());
    msg.extend_from_slice(&(workstation_offset as u32).to_le_bytes());

    msg.extend_from_slice(domain_bytes);
    msg.extend_from_slice(workstation_bytes);
    msg
}
