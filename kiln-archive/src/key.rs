use kiln_hash::{Digest, as_hex};

/// Split a build id's hex form into the `AA/BB/REST` shape every backend
/// keys archives by — two levels of fan-out directories so no single
/// directory ends up with one entry per build.
pub struct ArchiveKey {
    pub aa: String,
    pub bb: String,
    pub rest: String,
}

impl ArchiveKey {
    pub fn derive(build_id: Digest) -> Self {
        let hex = as_hex(build_id.as_bytes());
        debug_assert!(hex.len() > 4, "hex digest too short to split");
        ArchiveKey {
            aa: hex[0..2].to_owned(),
            bb: hex[2..4].to_owned(),
            rest: hex[4..].to_owned(),
        }
    }

    pub fn file_name(&self) -> String {
        format!("{}.tgz", self.rest)
    }

    /// `AA/BB/REST.tgz`, as used to build both filesystem paths and URLs.
    pub fn relative_path(&self) -> String {
        format!("{}/{}/{}", self.aa, self.bb, self.file_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_into_three_parts() {
        let build_id = kiln_hash::sha1_bytes(b"pkg");
        let key = ArchiveKey::derive(build_id);
        let hex = as_hex(build_id.as_bytes());
        assert_eq!(format!("{}{}{}", key.aa, key.bb, key.rest), hex);
        assert_eq!(key.relative_path(), format!("{}/{}/{}.tgz", key.aa, key.bb, key.rest));
    }
}
