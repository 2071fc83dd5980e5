use serde::{Deserialize, Serialize};

use crate::digest::Digest;
use crate::media_type::MediaType;
use crate::name::Name;

/// A single content-addressed layer referenced by a manifest.
///
/// `from` identifies the source repository when this layer was mounted
/// (cross-repo) rather than uploaded directly, per spec §3.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Layer {
    pub media_type: MediaType,
    pub digest: Digest,
    pub size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<Name>,
}

impl Layer {
    pub fn new(media_type: MediaType, digest: Digest, size: u64) -> Self {
        Self {
            media_type,
            digest,
            size,
            from: None,
        }
    }

    pub fn mounted_from(mut self, source: Name) -> Self {
        self.from = Some(source);
        self
    }
}

/// A model manifest: a config layer plus an ordered list of content layers,
/// serialized following the Docker image manifest v2 shape (spec §3, §6).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(rename = "schemaVersion")]
    pub schema_version: u32,
    #[serde(rename = "mediaType")]
    pub media_type: String,
    pub config: Layer,
    pub layers: Vec<Layer>,
}

pub const MANIFEST_MEDIA_TYPE: &str = "application/vnd.docker.distribution.manifest.v2+json";

impl Manifest {
    pub fn new(config: Layer, layers: Vec<Layer>) -> Self {
        Self {
            schema_version: 2,
            media_type: MANIFEST_MEDIA_TYPE.to_string(),
            config,
            layers,
        }
    }

    /// Every digest referenced by this manifest: the config layer plus each
    /// content layer, in declaration order.
    pub fn digests(&self) -> impl Iterator<Item = &Digest> {
        std::iter::once(&self.config.digest).chain(self.layers.iter().map(|l| &l.digest))
    }

    /// The content-addressed digest used to name links to this manifest:
    /// the sha256 of its own canonical JSON serialization (spec §3).
    pub fn self_digest(&self) -> Result<Digest, serde_json::Error> {
        let bytes = serde_json::to_vec(self)?;
        Ok(Digest::of(&bytes))
    }

    /// Build a delete-map of digests present in `self` but absent from
    /// `updated` — layers superseded by a newer pull, used for pruning
    /// (spec §4.4 step 2/5).
    pub fn superseded_by<'a>(&'a self, updated: &Manifest) -> Vec<&'a Digest> {
        self.digests()
            .filter(|d| !updated.digests().any(|u| u == *d))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::digest::Digest;

    fn layer(byte: u8, size: u64) -> Layer {
        Layer::new(MediaType::Model, Digest::of(&[byte]), size)
    }

    #[test]
    fn digests_include_config_first() {
        let m = Manifest::new(layer(0, 10), vec![layer(1, 20), layer(2, 30)]);
        let ds: Vec<_> = m.digests().collect();
        assert_eq!(ds.len(), 3);
        assert_eq!(ds[0], &m.config.digest);
    }

    #[test]
    fn serializes_to_docker_v2_shape() {
        let m = Manifest::new(layer(0, 10), vec![layer(1, 20)]);
        let v = serde_json::to_value(&m).unwrap();
        assert_eq!(v["schemaVersion"], 2);
        assert_eq!(v["mediaType"], MANIFEST_MEDIA_TYPE);
        assert!(v["layers"].is_array());
    }

    #[test]
    fn superseded_by_finds_dropped_layers() {
        let old = Manifest::new(layer(0, 10), vec![layer(1, 20), layer(2, 30)]);
        let new = Manifest::new(layer(0, 10), vec![layer(1, 20)]);
        let pruned = old.superseded_by(&new);
        assert_eq!(pruned, vec![&layer(2, 30).digest]);
    }

    #[test]
    fn self_digest_is_stable_for_identical_manifests() {
        let a = Manifest::new(layer(0, 10), vec![layer(1, 20)]);
        let b = Manifest::new(layer(0, 10), vec![layer(1, 20)]);
        assert_eq!(a.self_digest().unwrap(), b.self_digest().unwrap());
    }
}
