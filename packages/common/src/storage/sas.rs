use chrono::{DateTime, TimeZone, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;

use super::error::StorageError;
use super::traits::SasPermissions;

type HmacSha256 = Hmac<Sha256>;

/// What a verified SAS URL grants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SasGrant {
    pub container: String,
    pub key: String,
    pub expires_at: DateTime<Utc>,
    pub permissions: SasPermissions,
}

/// Signs and verifies `base_url/container/key?se=..&sp=..&sig=..` URLs.
#[derive(Clone)]
pub struct SasSigner {
    base_url: String,
    signing_key: Vec<u8>,
}

impl std::fmt::Debug for SasSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SasSigner")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl SasSigner {
    pub fn new(base_url: impl Into<String>, signing_key: impl AsRef<[u8]>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            signing_key: signing_key.as_ref().to_vec(),
        }
    }

    pub fn sign(
        &self,
        container: &str,
        key: &str,
        expires_at: DateTime<Utc>,
        permissions: SasPermissions,
    ) -> Result<String, StorageError> {
        let expiry = expires_at.timestamp();
        let sig = self.signature(container, key, expiry, &permissions.as_str())?;
        Ok(format!(
            "{}/{}/{}?se={}&sp={}&sig={}",
            self.base_url, container, key, expiry, permissions, sig
        ))
    }

    /// Check signature and expiry of a URL produced by [`SasSigner::sign`].
    pub fn verify(&self, url: &str, now: DateTime<Utc>) -> Result<SasGrant, StorageError> {
        let rest = url
            .strip_prefix(&self.base_url)
            .and_then(|r| r.strip_prefix('/'))
            .ok_or_else(|| StorageError::Signature("foreign base url".into()))?;
        let (path, query) = rest
            .split_once('?')
            .ok_or_else(|| StorageError::Signature("missing query".into()))?;
        let (container, key) = path
            .split_once('/')
            .ok_or_else(|| StorageError::Signature("missing blob key".into()))?;

        let mut expiry = None;
        let mut perms = None;
        let mut sig = None;
        for pair in query.split('&') {
            match pair.split_once('=') {
                Some(("se", v)) => expiry = v.parse::<i64>().ok(),
                Some(("sp", v)) => perms = Some(v),
                Some(("sig", v)) => sig = Some(v),
                _ => {}
            }
        }
        let (Some(expiry), Some(perms), Some(sig)) = (expiry, perms, sig) else {
            return Err(StorageError::Signature("incomplete query".into()));
        };

        let mac = self.mac(container, key, expiry, perms)?;
        let provided = hex::decode(sig).map_err(|e| StorageError::Signature(e.to_string()))?;
        mac.verify_slice(&provided)
            .map_err(|_| StorageError::Signature("signature mismatch".into()))?;

        let expires_at = Utc
            .timestamp_opt(expiry, 0)
            .single()
            .ok_or_else(|| StorageError::Signature("bad expiry".into()))?;
        if expires_at <= now {
            return Err(StorageError::Signature("url expired".into()));
        }

        let permissions = SasPermissions::parse(perms)
            .ok_or_else(|| StorageError::Signature("bad permissions".into()))?;

        Ok(SasGrant {
            container: container.to_string(),
            key: key.to_string(),
            expires_at,
            permissions,
        })
    }

    fn signature(
        &self,
        container: &str,
        key: &str,
        expiry: i64,
        perms: &str,
    ) -> Result<String, StorageError> {
        let mac = self.mac(container, key, expiry, perms)?;
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    fn mac(
        &self,
        container: &str,
        key: &str,
        expiry: i64,
        perms: &str,
    ) -> Result<HmacSha256, StorageError> {
        let mut mac = HmacSha256::new_from_slice(&self.signing_key)
            .map_err(|e| StorageError::Signature(e.to_string()))?;
        mac.update(format!("{container}\n{key}\n{expiry}\n{perms}").as_bytes());
        Ok(mac)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn signer() -> SasSigner {
        SasSigner::new("https://cdn.example.com/blobs/", "secret")
    }

    #[test]
    fn test_sign_then_verify() {
        let now = Utc::now();
        let url = signer()
            .sign("private-files", "ab/c.zip", now + Duration::minutes(5), SasPermissions::READ)
            .unwrap();
        assert!(url.starts_with("https://cdn.example.com/blobs/private-files/ab/c.zip?se="));

        let grant = signer().verify(&url, now).unwrap();
        assert_eq!(grant.container, "private-files");
        assert_eq!(grant.key, "ab/c.zip");
        assert!(grant.permissions.read);
        assert!(!grant.permissions.write);
    }

    #[test]
    fn test_tampered_permissions_rejected() {
        let now = Utc::now();
        let url = signer()
            .sign("c", "k.bin", now + Duration::minutes(5), SasPermissions::READ)
            .unwrap();
        let tampered = url.replace("sp=r", "sp=rwd");
        assert!(matches!(
            signer().verify(&tampered, now),
            Err(StorageError::Signature(_))
        ));
    }

    #[test]
    fn test_expired_url_rejected() {
        let now = Utc::now();
        let url = signer()
            .sign("c", "k.bin", now - Duration::seconds(1), SasPermissions::READ)
            .unwrap();
        assert!(signer().verify(&url, now).is_err());
    }

    #[test]
    fn test_other_key_rejected() {
        let now = Utc::now();
        let url = signer()
            .sign("c", "k.bin", now + Duration::minutes(1), SasPermissions::READ)
            .unwrap();
        let other = SasSigner::new("https://cdn.example.com/blobs", "different");
        assert!(other.verify(&url, now).is_err());
    }
}
