// ─── Player Identity ───
// The identity value object handed to launch. No auth protocol lives here;
// premium profiles arrive already tokenized, offline profiles are synthesized.

use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Public client id substituted for `${clientid}` when none is supplied.
pub const DEFAULT_CLIENT_ID: &str = "00000000402B5328";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum IdentityKind {
    Offline,
    Premium,
}

/// Everything the game argument composer substitutes for the `${auth_*}`
/// placeholders.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerIdentity {
    pub kind: IdentityKind,
    pub username: String,
    pub uuid: String,
    pub access_token: String,
    pub xuid: String,
    pub user_type: String,
    pub client_id: String,
}

impl Default for PlayerIdentity {
    fn default() -> Self {
        Self::offline("Player")
    }
}

impl PlayerIdentity {
    /// Offline profile with the conventional md5-derived uuid, stable per
    /// username so worlds keep their owner across sessions.
    pub fn offline(username: &str) -> Self {
        let username = username.trim();
        Self {
            kind: IdentityKind::Offline,
            username: username.to_string(),
            uuid: offline_uuid(username).hyphenated().to_string(),
            access_token: "offline_access_token".into(),
            xuid: "0".into(),
            user_type: "legacy".into(),
            client_id: DEFAULT_CLIENT_ID.into(),
        }
    }

    /// Premium profile from externally supplied credentials.
    pub fn premium(username: &str, uuid: &str, access_token: &str, xuid: &str) -> Self {
        Self {
            kind: IdentityKind::Premium,
            username: username.trim().to_string(),
            uuid: uuid.to_string(),
            access_token: access_token.to_string(),
            xuid: xuid.to_string(),
            user_type: "msa".into(),
            client_id: DEFAULT_CLIENT_ID.into(),
        }
    }

    /// Fill anything blank with a safe default and force the uuid into
    /// canonical form. Runs right before argument composition, so whatever a
    /// collaborator hands over is usable by the time it reaches the JVM.
    pub fn sanitized(mut self) -> Self {
        if self.username.trim().is_empty() {
            self.username = "Player".into();
        }
        self.uuid = match canonical_uuid(&self.uuid) {
            Some(canonical) => canonical,
            None => offline_uuid(&self.username).hyphenated().to_string(),
        };
        if self.access_token.trim().is_empty() {
            self.access_token = "offline_access_token".into();
        }
        if self.xuid.trim().is_empty() {
            self.xuid = "0".into();
        }
        if self.user_type.trim().is_empty() {
            self.user_type = match self.kind {
                IdentityKind::Offline => "legacy".into(),
                IdentityKind::Premium => "msa".into(),
            };
        }
        if self.client_id.trim().is_empty() {
            self.client_id = DEFAULT_CLIENT_ID.into();
        }
        self
    }
}

/// Canonical hyphenated-lowercase form, accepting hyphenless and uppercase
/// input. `None` for anything that is not a uuid at all, and for the nil
/// uuid, which some callers use as an "unset" marker.
pub fn canonical_uuid(raw: &str) -> Option<String> {
    let parsed = Uuid::parse_str(raw.trim()).ok()?;
    if parsed.is_nil() {
        return None;
    }
    Some(parsed.hyphenated().to_string())
}

/// The uuid the vanilla server derives for offline players:
/// `md5("OfflinePlayer:" + name)` with the version and variant bits of a
/// name-based uuid.
pub fn offline_uuid(username: &str) -> Uuid {
    let mut hasher = Md5::new();
    hasher.update(b"OfflinePlayer:");
    hasher.update(username.as_bytes());
    let mut bytes: [u8; 16] = hasher.finalize().into();
    bytes[6] = (bytes[6] & 0x0f) | 0x30;
    bytes[8] = (bytes[8] & 0x3f) | 0x80;
    Uuid::from_bytes(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offline_uuid_matches_the_vanilla_derivation() {
        assert_eq!(
            offline_uuid("Notch").hyphenated().to_string(),
            "b50ad385-829d-3141-a216-7e7d7539ba7f"
        );
        assert_eq!(
            offline_uuid("Alex").hyphenated().to_string(),
            "36532b5e-c442-3dbb-a24c-c7e55d0f979a"
        );
    }

    #[test]
    fn offline_uuid_carries_name_based_version_and_variant_bits() {
        let id = offline_uuid("whoever");
        assert_eq!(id.get_version_num(), 3);
        let variant_nibble = id.hyphenated().to_string().as_bytes()[19] as char;
        assert!(matches!(variant_nibble, '8' | '9' | 'a' | 'b'));
    }

    #[test]
    fn canonical_uuid_normalizes_case_and_hyphens() {
        assert_eq!(
            canonical_uuid("B50AD385829D3141A2167E7D7539BA7F").as_deref(),
            Some("b50ad385-829d-3141-a216-7e7d7539ba7f")
        );
        assert_eq!(
            canonical_uuid(" b50ad385-829d-3141-a216-7e7d7539ba7f ").as_deref(),
            Some("b50ad385-829d-3141-a216-7e7d7539ba7f")
        );
        assert!(canonical_uuid("not-a-uuid").is_none());
        assert!(canonical_uuid("00000000-0000-0000-0000-000000000000").is_none());
    }

    #[test]
    fn sanitizing_replaces_a_broken_uuid_with_the_offline_derivation() {
        let identity = PlayerIdentity {
            uuid: "garbage".into(),
            ..PlayerIdentity::offline("Alex")
        }
        .sanitized();
        assert_eq!(identity.uuid, "36532b5e-c442-3dbb-a24c-c7e55d0f979a");
        assert_eq!(identity.user_type, "legacy");
    }

    #[test]
    fn blank_fields_get_safe_defaults() {
        let identity = PlayerIdentity {
            kind: IdentityKind::Premium,
            username: "  ".into(),
            uuid: String::new(),
            access_token: String::new(),
            xuid: String::new(),
            user_type: String::new(),
            client_id: String::new(),
        }
        .sanitized();
        assert_eq!(identity.username, "Player");
        assert_eq!(identity.user_type, "msa");
        assert_eq!(identity.client_id, DEFAULT_CLIENT_ID);
        assert_eq!(
            identity.uuid,
            offline_uuid("Player").hyphenated().to_string()
        );
    }
}
