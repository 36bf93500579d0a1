//! Users and SSH keys
//!
//! A user may claim the organization they belong to. The claim stays
//! unapproved until a staff user approves it.

use base64::{
    engine::general_purpose::{STANDARD, STANDARD_NO_PAD},
    Engine as _,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::{StructureError, StructureResult};

/// A platform user.
///
/// # Examples
///
/// ```
/// use conductor_structure::User;
///
/// let user = User::new("alice", "alice@example.com").with_full_name("Alice Liddell");
/// assert!(user.is_active);
/// assert!(!user.is_staff);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    /// Unique user ID
    pub id: Uuid,

    /// Login name (unique)
    pub username: String,

    /// Email address
    pub email: String,

    /// Full name
    #[serde(default)]
    pub full_name: String,

    /// Name in the native language
    #[serde(default)]
    pub native_name: String,

    /// National identification number
    pub civil_number: Option<String>,

    /// Phone number
    #[serde(default)]
    pub phone_number: String,

    /// Job title
    #[serde(default)]
    pub job_title: String,

    /// Claimed organization name
    #[serde(default)]
    pub organization: String,

    /// Whether the organization claim was approved
    #[serde(default)]
    pub organization_approved: bool,

    /// Staff users bypass permission scoping
    #[serde(default)]
    pub is_staff: bool,

    /// Support users can see everything but change nothing
    #[serde(default)]
    pub is_support: bool,

    /// Inactive users cannot authenticate
    pub is_active: bool,

    /// Registration timestamp
    pub date_joined: DateTime<Utc>,
}

impl User {
    /// Creates a new active, non-staff user.
    pub fn new(username: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            id: Uuid::now_v7(),
            username: username.into(),
            email: email.into(),
            full_name: String::new(),
            native_name: String::new(),
            civil_number: None,
            phone_number: String::new(),
            job_title: String::new(),
            organization: String::new(),
            organization_approved: false,
            is_staff: false,
            is_support: false,
            is_active: true,
            date_joined: Utc::now(),
        }
    }

    /// Set the full name.
    pub fn with_full_name(mut self, name: impl Into<String>) -> Self {
        self.full_name = name.into();
        self
    }

    /// Set the civil number.
    pub fn with_civil_number(mut self, number: impl Into<String>) -> Self {
        self.civil_number = Some(number.into());
        self
    }

    /// Set the phone number.
    pub fn with_phone_number(mut self, phone: impl Into<String>) -> Self {
        self.phone_number = phone.into();
        self
    }

    /// Set the job title.
    pub fn with_job_title(mut self, title: impl Into<String>) -> Self {
        self.job_title = title.into();
        self
    }

    /// Mark the user as staff.
    pub fn staff(mut self) -> Self {
        self.is_staff = true;
        self
    }

    /// Mark the user as support.
    pub fn support(mut self) -> Self {
        self.is_support = true;
        self
    }

    /// Staff and support users see every object regardless of roles.
    pub fn is_unrestricted(&self) -> bool {
        self.is_staff || self.is_support
    }

    /// Claim membership in an organization.
    ///
    /// The claim is stored unapproved. A user with an approved organization
    /// has to remove it first.
    pub fn claim_organization(&mut self, organization: impl Into<String>) -> StructureResult<()> {
        if self.organization_approved {
            return Err(StructureError::Conflict(
                "User has approved organization. Remove it before claiming a new one.".to_string(),
            ));
        }
        let organization = organization.into();
        if organization.trim().is_empty() {
            return Err(StructureError::validation(
                "organization",
                "This field may not be blank.",
            ));
        }
        self.organization = organization;
        self.organization_approved = false;
        Ok(())
    }

    /// Approve the claimed organization.
    pub fn approve_organization(&mut self) -> StructureResult<()> {
        if self.organization.is_empty() {
            return Err(StructureError::Conflict(
                "User has not claimed any organization.".to_string(),
            ));
        }
        self.organization_approved = true;
        Ok(())
    }

    /// Reject the claimed organization.
    pub fn reject_organization(&mut self) {
        self.organization.clear();
        self.organization_approved = false;
    }

    /// Remove the organization, approved or not.
    pub fn remove_organization(&mut self) {
        self.reject_organization();
    }

    /// Flat record used when passing users to backends.
    pub fn to_record(&self) -> UserRecord {
        UserRecord {
            username: self.username.clone(),
            email: self.email.clone(),
        }
    }
}

/// Serialized form of a user handed to backends.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserRecord {
    /// Login name
    pub username: String,
    /// Email address
    pub email: String,
}

impl UserRecord {
    /// Rebuild a minimal user from its record.
    pub fn into_user(self) -> User {
        User::new(self.username, self.email)
    }
}

/// SSH public key owned by a user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SshPublicKey {
    /// Unique key ID
    pub id: Uuid,

    /// Owner
    pub user_id: Uuid,

    /// Key name
    pub name: String,

    /// OpenSSH public key line, e.g. `ssh-ed25519 AAAA... comment`
    pub public_key: String,

    /// `SHA256:` fingerprint of the decoded key blob
    pub fingerprint: String,
}

impl SshPublicKey {
    /// Parse and fingerprint an OpenSSH public key line.
    ///
    /// # Errors
    ///
    /// `StructureError::Validation` if the line has no key blob or the blob
    /// is not valid base64.
    pub fn new(
        user_id: Uuid,
        name: impl Into<String>,
        public_key: impl Into<String>,
    ) -> StructureResult<Self> {
        let public_key = public_key.into();
        let fingerprint = fingerprint(&public_key)?;
        Ok(Self {
            id: Uuid::now_v7(),
            user_id,
            name: name.into(),
            public_key,
            fingerprint,
        })
    }

    /// Flat record used when pushing keys to backends.
    pub fn to_record(&self) -> SshKeyRecord {
        SshKeyRecord {
            name: self.name.clone(),
            user_id: self.user_id,
            fingerprint: self.fingerprint.clone(),
            public_key: self.public_key.clone(),
            uuid: self.id.simple().to_string(),
        }
    }
}

/// Serialized form of an SSH key handed to backends.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SshKeyRecord {
    /// Key name
    pub name: String,
    /// Owner
    pub user_id: Uuid,
    /// Key fingerprint
    pub fingerprint: String,
    /// Public key line
    pub public_key: String,
    /// Key ID as 32 hex digits
    pub uuid: String,
}

impl SshKeyRecord {
    /// Rebuild the key from its record.
    pub fn into_key(self) -> StructureResult<SshPublicKey> {
        let id = Uuid::parse_str(&self.uuid)
            .map_err(|e| StructureError::validation("uuid", e.to_string()))?;
        let mut key = SshPublicKey::new(self.user_id, self.name, self.public_key)?;
        key.id = id;
        Ok(key)
    }
}

fn fingerprint(public_key: &str) -> StructureResult<String> {
    let blob = public_key
        .split_whitespace()
        .nth(1)
        .ok_or_else(|| StructureError::validation("public_key", "Key is not in OpenSSH format"))?;
    let decoded = STANDARD
        .decode(blob)
        .map_err(|e| StructureError::validation("public_key", format!("Invalid key data: {e}")))?;
    let digest = Sha256::digest(&decoded);
    Ok(format!("SHA256:{}", STANDARD_NO_PAD.encode(digest)))
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIGFiY2RlZmdoaWprbG1ub3BxcnN0dXZ3eHl6MDEyMzQ1 alice@laptop";

    #[test]
    fn test_fingerprint() {
        let key = SshPublicKey::new(Uuid::now_v7(), "laptop", KEY).unwrap();
        assert_eq!(
            key.fingerprint,
            "SHA256:mTB0raVQ96HxbqU8+YC8O/zgPOeWu+1fqOI7c73T7bk"
        );
    }

    #[test]
    fn test_invalid_key() {
        assert!(SshPublicKey::new(Uuid::now_v7(), "bad", "ssh-rsa").is_err());
        assert!(SshPublicKey::new(Uuid::now_v7(), "bad", "ssh-rsa !!!not-base64!!!").is_err());
    }

    #[test]
    fn test_key_record_round_trip() {
        let key = SshPublicKey::new(Uuid::now_v7(), "laptop", KEY).unwrap();
        let record = key.to_record();
        assert_eq!(record.uuid.len(), 32);

        let restored = record.into_key().unwrap();
        assert_eq!(restored.id, key.id);
        assert_eq!(restored.fingerprint, key.fingerprint);
    }

    #[test]
    fn test_organization_claim_flow() {
        let mut user = User::new("bob", "bob@example.com");
        user.claim_organization("Acme").unwrap();
        assert_eq!(user.organization, "Acme");
        assert!(!user.organization_approved);

        // unapproved claims can be replaced
        user.claim_organization("Globex").unwrap();
        user.approve_organization().unwrap();
        assert!(user.organization_approved);

        let err = user.claim_organization("Initech").unwrap_err();
        assert_eq!(
            err.to_string(),
            "User has approved organization. Remove it before claiming a new one."
        );
        assert_eq!(err.status_code(), 409);

        user.remove_organization();
        assert!(user.organization.is_empty());
        user.claim_organization("Initech").unwrap();
    }

    #[test]
    fn test_reject_organization() {
        let mut user = User::new("carol", "carol@example.com");
        user.claim_organization("Acme").unwrap();
        user.reject_organization();
        assert!(user.organization.is_empty());
        assert!(user.approve_organization().is_err());
    }

    #[test]
    fn test_unrestricted() {
        assert!(User::new("s", "s@x").staff().is_unrestricted());
        assert!(User::new("s", "s@x").support().is_unrestricted());
        assert!(!User::new("u", "u@x").is_unrestricted());
    }
}
