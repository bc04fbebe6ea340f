//! Group metadata record

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

use lib_identity::FINGERPRINT_HEX_LEN;

/// JSON record at `"dht:group:{uuid}"`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GroupMetadata {
    pub uuid: String,
    pub name: String,
    pub description: String,
    /// Fingerprint of the user who created the group
    pub creator: String,
    pub created_at: u64,
    /// Incremented on every metadata write
    pub version: u64,
    /// Incremented on every key rotation; starts at 1
    pub gsk_version: u32,
    /// Ordered member fingerprints; the creator is always present
    pub members: Vec<String>,
}

impl GroupMetadata {
    /// Structural invariants every stored record satisfies
    pub fn validate(&self) -> Result<()> {
        if self.gsk_version < 1 {
            return Err(anyhow!("gsk_version must be at least 1"));
        }
        if !self.members.contains(&self.creator) {
            return Err(anyhow!("creator must be a member"));
        }
        for member in &self.members {
            if member.len() != FINGERPRINT_HEX_LEN
                || !member.chars().all(|c| c.is_ascii_hexdigit())
            {
                return Err(anyhow!("invalid member fingerprint"));
            }
        }
        let mut seen = std::collections::HashSet::new();
        for member in &self.members {
            if !seen.insert(member) {
                return Err(anyhow!("duplicate member {}", member));
            }
        }
        Ok(())
    }

    pub fn is_member(&self, fingerprint: &str) -> bool {
        self.members.iter().any(|m| m == fingerprint)
    }

    pub fn is_creator(&self, fingerprint: &str) -> bool {
        self.creator == fingerprint
    }

    /// Whether `fingerprint` may update the record or add members
    pub fn can_update(&self, fingerprint: &str) -> bool {
        self.is_creator(fingerprint) || self.is_member(fingerprint)
    }

    /// Whether `fingerprint` may remove `target` from the group
    pub fn can_remove(&self, fingerprint: &str, target: &str) -> bool {
        self.is_creator(fingerprint) || fingerprint == target
    }

    /// Whether `fingerprint` may delete the group entirely
    pub fn can_delete(&self, fingerprint: &str) -> bool {
        self.is_creator(fingerprint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fp(tag: u8) -> String {
        format!("{:02x}", tag).repeat(64)
    }

    fn sample() -> GroupMetadata {
        GroupMetadata {
            uuid: "00000000-0000-4000-8000-000000000000".into(),
            name: "test group".into(),
            description: String::new(),
            creator: fp(1),
            created_at: 1_700_000_000,
            version: 1,
            gsk_version: 1,
            members: vec![fp(1), fp(2)],
        }
    }

    #[test]
    fn test_valid_metadata() {
        sample().validate().unwrap();
    }

    #[test]
    fn test_creator_must_be_member() {
        let mut meta = sample();
        meta.members.retain(|m| *m != meta.creator);
        assert!(meta.validate().is_err());
    }

    #[test]
    fn test_duplicate_member_rejected() {
        let mut meta = sample();
        meta.members.push(fp(2));
        assert!(meta.validate().is_err());
    }

    #[test]
    fn test_gsk_version_floor() {
        let mut meta = sample();
        meta.gsk_version = 0;
        assert!(meta.validate().is_err());
    }

    #[test]
    fn test_authorization_matrix() {
        let meta = sample();
        let creator = fp(1);
        let member = fp(2);
        let outsider = fp(9);

        assert!(meta.can_update(&creator));
        assert!(meta.can_update(&member));
        assert!(!meta.can_update(&outsider));

        assert!(meta.can_remove(&creator, &member));
        assert!(meta.can_remove(&member, &member));
        assert!(!meta.can_remove(&member, &creator));

        assert!(meta.can_delete(&creator));
        assert!(!meta.can_delete(&member));
    }
}
